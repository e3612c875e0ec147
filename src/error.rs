//! Error types for blockdat
//!
//! Provides a unified error type for all container operations.

use thiserror::Error;

/// Result type alias using DatError
pub type Result<T> = std::result::Result<T, DatError>;

/// Unified error type for container operations
#[derive(Debug, Error)]
pub enum DatError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Header Errors
    // -------------------------------------------------------------------------
    #[error("Bad magic number {found:#010x}, not a block container")]
    BadMagic { found: u32 },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // -------------------------------------------------------------------------
    // Block Chain Errors
    // -------------------------------------------------------------------------
    #[error("Block offset {offset:#010x} does not begin on a block boundary")]
    Alignment { offset: u32 },

    #[error("Block offset {offset:#010x} is outside the data area (file size {file_size:#010x})")]
    OutOfRange { offset: u32, file_size: u32 },

    #[error("Block chain starting at {head:#010x} contains free block {offset:#010x}")]
    FreeBlockInChain { head: u32, offset: u32 },

    #[error("Block chain starting at {head:#010x} exceeds {limit} blocks")]
    ChainTooLong { head: u32, limit: u32 },

    #[error("Chain at {head:#010x} holds {available} bytes, {expected} expected")]
    TruncatedData { head: u32, expected: u32, available: u64 },

    // -------------------------------------------------------------------------
    // Allocator Errors
    // -------------------------------------------------------------------------
    #[error("Free list corrupt: block {offset:#010x} has pointer {pointer:#010x}")]
    FreeListCorrupt { offset: u32, pointer: u32 },

    #[error("Failed to allocate enough space: {required} bytes required, {available} available")]
    AllocationShortfall { required: u64, available: u64 },

    #[error("Container cannot grow to {requested} bytes")]
    AddressSpaceExhausted { requested: u64 },

    // -------------------------------------------------------------------------
    // Directory Errors
    // -------------------------------------------------------------------------
    #[error("Key {0:#010x} not found")]
    KeyNotFound(u32),

    #[error("Key {0:#010x} already exists")]
    DuplicateKey(u32),

    #[error("Directory node at {node:#010x} has no free slot")]
    DirectoryFull { node: u32 },

    #[error("Directory corrupt: {0}")]
    DirectoryCorrupt(String),

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    #[error("Container inconsistent: {0}")]
    Inconsistent(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DatError {
    /// Whether the error means the container itself can no longer be trusted.
    ///
    /// Misses, duplicates and truncated records only concern one record.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DatError::KeyNotFound(_)
                | DatError::DuplicateKey(_)
                | DatError::TruncatedData { .. }
                | DatError::DirectoryFull { .. }
                | DatError::Config(_)
        )
    }
}
