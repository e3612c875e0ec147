//! Configuration for blockdat
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{DatError, Result};
use crate::header::{MAX_FILE_SIZE, MIN_BLOCK_SIZE};

/// Default block size for new containers (bytes, including the 4-byte pointer)
pub const DEFAULT_BLOCK_SIZE: u32 = 0x400;

/// Default size of one free-space extension
pub const DEFAULT_GROWTH_CHUNK: u32 = 1024 * 1024;

/// Main configuration for a container handle
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Host File
    // -------------------------------------------------------------------------
    /// Path of the container file
    pub path: PathBuf,

    /// Create the container when `path` does not exist
    pub create_if_missing: bool,

    /// fsync the host file after every header flush
    pub sync_on_flush: bool,

    // -------------------------------------------------------------------------
    // Layout (only used when creating)
    // -------------------------------------------------------------------------
    /// Bytes per block, next pointer included
    pub block_size: u32,

    /// Opaque content classification stamped into a new header
    pub content_type: u32,

    /// Opaque content sub-classification stamped into a new header
    pub content_subtype: u32,

    // -------------------------------------------------------------------------
    // Allocator
    // -------------------------------------------------------------------------
    /// The file grows by whole multiples of this many bytes of blocks
    pub growth_chunk_bytes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./portal.dat"),
            create_if_missing: false,
            sync_on_flush: true,
            block_size: DEFAULT_BLOCK_SIZE,
            content_type: 0,
            content_subtype: 0,
            growth_chunk_bytes: DEFAULT_GROWTH_CHUNK, // 1 MiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the layout parameters for consistency
    pub fn validate(&self) -> Result<()> {
        if self.block_size % 4 != 0 {
            return Err(DatError::Config(format!(
                "block size {:#x} is not a multiple of 4",
                self.block_size
            )));
        }
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(DatError::Config(format!(
                "block size {:#x} cannot hold the header region (minimum {:#x})",
                self.block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.block_size >= MAX_FILE_SIZE {
            return Err(DatError::Config(format!(
                "block size {:#x} exceeds the addressable range",
                self.block_size
            )));
        }
        if self.growth_chunk_bytes < self.block_size {
            return Err(DatError::Config(format!(
                "growth chunk of {} bytes is smaller than one block",
                self.growth_chunk_bytes
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the container path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Create the container if it does not exist yet
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    /// fsync after header flushes
    pub fn sync_on_flush(mut self, sync: bool) -> Self {
        self.config.sync_on_flush = sync;
        self
    }

    /// Set the block size for new containers
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the content type for new containers
    pub fn content_type(mut self, content_type: u32) -> Self {
        self.config.content_type = content_type;
        self
    }

    /// Set the content subtype for new containers
    pub fn content_subtype(mut self, content_subtype: u32) -> Self {
        self.config.content_subtype = content_subtype;
        self
    }

    /// Set the free-space extension chunk (in bytes)
    pub fn growth_chunk_bytes(mut self, bytes: u32) -> Self {
        self.config.growth_chunk_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
