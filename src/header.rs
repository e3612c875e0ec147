//! Container Header
//!
//! Nine little-endian u32 words at a fixed offset inside block 0.
//!
//! ```text
//! 0x12c ┌──────────┬───────────┬──────────┬─────────────┬────────────────┐
//!       │ Magic    │ BlockSize │ FileSize │ ContentType │ ContentSubtype │
//!       ├──────────┴──┬────────┴──────┬───┴─────────────┼────────────────┤
//!       │ FirstFree   │ LastFree      │ FreeBlockCount  │ RootOffset     │
//! 0x150 └─────────────┴───────────────┴─────────────────┴────────────────┘
//! ```

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{DatError, Result};

/// Magic constant identifying a container ("BT" little-endian)
pub const MAGIC: u32 = 0x0000_5442;

/// Byte offset of the header inside the host file
pub const HEADER_OFFSET: u64 = 0x12c;

/// Header size: 9 x u32 = 36 bytes
pub const HEADER_SIZE: usize = 36;

/// Smallest block size whose block 0 still holds the whole header
pub const MIN_BLOCK_SIZE: u32 = (HEADER_OFFSET as u32) + HEADER_SIZE as u32;

/// Bit marking a next pointer as belonging to the free list
pub const FREE_BIT: u32 = 0x8000_0000;

/// Offsets must stay below the free bit
pub const MAX_FILE_SIZE: u32 = FREE_BIT;

/// In-memory copy of the container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub block_size: u32,
    pub file_size: u32,
    pub content_type: u32,
    pub content_subtype: u32,
    pub first_free_block: u32,
    pub last_free_block: u32,
    pub free_block_count: u32,
    pub root_offset: u32,
}

impl Header {
    /// Header for a container holding only block 0
    pub fn new(block_size: u32, content_type: u32, content_subtype: u32) -> Self {
        Self {
            block_size,
            file_size: block_size,
            content_type,
            content_subtype,
            first_free_block: 0,
            last_free_block: 0,
            free_block_count: 0,
            root_offset: 0,
        }
    }

    /// Decode the header words, checking the magic number
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(DatError::InvalidHeader(format!(
                "expected {} header bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(DatError::BadMagic { found: magic });
        }

        Ok(Self {
            block_size: buf.get_u32_le(),
            file_size: buf.get_u32_le(),
            content_type: buf.get_u32_le(),
            content_subtype: buf.get_u32_le(),
            first_free_block: buf.get_u32_le(),
            last_free_block: buf.get_u32_le(),
            free_block_count: buf.get_u32_le(),
            root_offset: buf.get_u32_le(),
        })
    }

    /// Encode the header words, magic first
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(self.block_size);
        buf.put_u32_le(self.file_size);
        buf.put_u32_le(self.content_type);
        buf.put_u32_le(self.content_subtype);
        buf.put_u32_le(self.first_free_block);
        buf.put_u32_le(self.last_free_block);
        buf.put_u32_le(self.free_block_count);
        buf.put_u32_le(self.root_offset);
        out
    }

    /// Structural checks performed at open
    pub fn validate(&self) -> Result<()> {
        let bs = self.block_size;
        if bs < MIN_BLOCK_SIZE || bs % 4 != 0 || bs >= MAX_FILE_SIZE {
            return Err(DatError::InvalidHeader(format!("unusable block size {:#x}", bs)));
        }
        if self.file_size < bs || self.file_size % bs != 0 || self.file_size > MAX_FILE_SIZE {
            return Err(DatError::InvalidHeader(format!(
                "file size {:#x} is not a whole number of {:#x}-byte blocks",
                self.file_size, bs
            )));
        }
        if (self.first_free_block == 0) != (self.last_free_block == 0) {
            return Err(DatError::InvalidHeader(format!(
                "free list ends disagree: first {:#x}, last {:#x}",
                self.first_free_block, self.last_free_block
            )));
        }
        for (name, offset) in [
            ("first free block", self.first_free_block),
            ("last free block", self.last_free_block),
        ] {
            if offset != 0 && !self.is_block_offset(offset) {
                return Err(DatError::InvalidHeader(format!(
                    "{} offset {:#x} is not a data block",
                    name, offset
                )));
            }
        }
        if !self.is_block_offset(self.root_offset) {
            return Err(DatError::InvalidHeader(format!(
                "root directory offset {:#x} is not a data block",
                self.root_offset
            )));
        }
        Ok(())
    }

    /// Payload bytes per block
    pub fn payload_size(&self) -> u32 {
        self.block_size - 4
    }

    /// Total number of blocks in the file, block 0 included
    pub fn block_count(&self) -> u32 {
        self.file_size / self.block_size
    }

    /// Bytes available on the free list
    pub fn free_space(&self) -> u64 {
        self.free_block_count as u64 * self.payload_size() as u64
    }

    /// Aligned and inside `[block_size, file_size)`
    pub fn is_block_offset(&self, offset: u32) -> bool {
        offset % self.block_size == 0 && offset >= self.block_size && offset < self.file_size
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blockSize: {}, fileSize: {}, contentType: {:08x}, contentSubtype: {:08x}, \
             firstFreeBlock: {:08x}, lastFreeBlock: {:08x}, freeBlockCount: {}, \
             rootOffset: {:08x}, freeSpace: {}",
            self.block_size,
            self.file_size,
            self.content_type,
            self.content_subtype,
            self.first_free_block,
            self.last_free_block,
            self.free_block_count,
            self.root_offset,
            self.free_space()
        )
    }
}
