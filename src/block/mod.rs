//! Block I/O Module
//!
//! Fixed-size blocks addressed by byte offset inside the host file.
//!
//! ## Responsibilities
//! - Read and write whole blocks
//! - Follow and validate block chains
//! - Own the cached header and persist it on flush or drop
//!
//! ## Block Format
//! ```text
//! ┌──────────────────────┬─────────────────────────────────────┐
//! │ Next (4)             │ Payload (block_size - 4)            │
//! │ bit 31 = free block  │ zero padded after the last byte     │
//! └──────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! A chain ends at a block whose next pointer is 0 (or `FREE_BIT` alone on
//! the free list). Block 0 holds the header and is never part of a chain.

mod chain;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::BufMut;

use crate::config::DEFAULT_GROWTH_CHUNK;
use crate::error::{DatError, Result};
use crate::header::{Header, FREE_BIT, HEADER_OFFSET, HEADER_SIZE};

pub use chain::{ChainBlock, ChainIter};

/// Outcome of writing a byte stream into a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWrite {
    /// First block written
    pub head: u32,
    /// Number of blocks written
    pub blocks: u32,
    /// Pointer that followed the last written block before it was terminated
    pub next: u32,
}

/// The host file viewed as an array of blocks
///
/// ## Ownership
/// - The header is read once at open and is authoritative afterwards
/// - Every mutation goes through `&mut self`, so one handle is one writer
/// - A dirty header is written back by `flush()` or, failing that, on drop
pub struct BlockFile {
    /// Host file handle
    file: File,

    /// Cached header state
    header: Header,

    /// Header changed since the last flush
    dirty: bool,

    /// Free-list extension chunk in bytes
    growth_chunk: u32,

    /// fsync after writing the header
    sync_on_flush: bool,
}

impl BlockFile {
    /// Open an existing container, validating its header
    pub fn open(mut file: File) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(HEADER_OFFSET))?;
        file.read_exact(&mut raw)?;

        let header = Header::decode(&raw)?;
        header.validate()?;

        let len = file.metadata()?.len();
        if len < header.file_size as u64 {
            return Err(DatError::InvalidHeader(format!(
                "host file is {} bytes, header declares {}",
                len, header.file_size
            )));
        }

        Ok(Self {
            file,
            header,
            dirty: false,
            growth_chunk: DEFAULT_GROWTH_CHUNK,
            sync_on_flush: true,
        })
    }

    /// Lay out block 0 of a new container in an empty file
    ///
    /// The returned file has no free blocks and no root directory yet.
    pub fn create(mut file: File, header: Header) -> Result<Self> {
        let mut block_zero = vec![0u8; header.block_size as usize];
        let start = HEADER_OFFSET as usize;
        block_zero[start..start + HEADER_SIZE].copy_from_slice(&header.encode());

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&block_zero)?;

        Ok(Self {
            file,
            header,
            dirty: true,
            growth_chunk: DEFAULT_GROWTH_CHUNK,
            sync_on_flush: true,
        })
    }

    /// Set the free-list extension chunk
    pub fn with_growth_chunk(mut self, bytes: u32) -> Self {
        self.growth_chunk = bytes;
        self
    }

    /// fsync after header flushes
    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    /// Payload bytes per block
    pub fn payload_size(&self) -> u32 {
        self.header.payload_size()
    }

    pub fn growth_chunk(&self) -> u32 {
        self.growth_chunk
    }

    /// Whether the cached header differs from the one on disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mutable header access; marks the header dirty
    pub(crate) fn header_mut(&mut self) -> &mut Header {
        self.dirty = true;
        &mut self.header
    }

    // =========================================================================
    // Raw Block Access
    // =========================================================================

    /// Read the next-pointer word of a block
    pub fn read_pointer(&mut self, offset: u32) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_raw(offset as u64, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Read the payload of a block
    pub fn read_payload(&mut self, offset: u32) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; self.payload_size() as usize];
        self.read_raw(offset as u64 + 4, &mut payload)?;
        Ok(payload)
    }

    /// Write a whole block: pointer word, payload, zero padding
    pub(crate) fn write_block(&mut self, offset: u32, pointer: u32, payload: &[u8]) -> Result<()> {
        let block_size = self.block_size() as usize;
        debug_assert!(payload.len() <= block_size - 4);

        let mut block = Vec::with_capacity(block_size);
        block.put_u32_le(pointer);
        block.put_slice(payload);
        block.resize(block_size, 0);

        tracing::trace!("write block {:#010x} -> {:#010x} ({} bytes)", offset, pointer, payload.len());
        self.write_raw(offset as u64, &block)
    }

    pub(crate) fn read_raw(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub(crate) fn write_raw(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Validate one link of the chain starting at `head`
    ///
    /// Checks, in order: free bit, block alignment, data-area range.
    pub fn check_link(&self, head: u32, offset: u32) -> Result<()> {
        if offset & FREE_BIT != 0 {
            return Err(DatError::FreeBlockInChain { head, offset });
        }
        if offset % self.header.block_size != 0 {
            return Err(DatError::Alignment { offset });
        }
        if offset < self.header.block_size || offset >= self.header.file_size {
            return Err(DatError::OutOfRange {
                offset,
                file_size: self.header.file_size,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Chains
    // =========================================================================

    /// Walk the links of a live chain without reading payloads
    pub fn chain(&mut self, head: u32) -> ChainIter<'_> {
        ChainIter::new(self, head, false)
    }

    /// Walk a live chain, reading each block's payload
    pub fn chain_with_payload(&mut self, head: u32) -> ChainIter<'_> {
        ChainIter::new(self, head, true)
    }

    /// Read the bytes stored in the chain at `offset`
    ///
    /// The concatenated payload must cover `expected_len`; anything past it
    /// in the final block is padding and is dropped.
    pub fn read_chain(&mut self, offset: u32, expected_len: u32) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for block in self.chain_with_payload(offset) {
            data.extend_from_slice(&block?.payload);
        }

        if data.len() < expected_len as usize {
            return Err(DatError::TruncatedData {
                head: offset,
                expected: expected_len,
                available: data.len() as u64,
            });
        }
        data.truncate(expected_len as usize);
        Ok(data)
    }

    /// Write `data` into the chain beginning at `offset`
    ///
    /// Interior blocks keep their next pointers and the final block is
    /// terminated with 0. At least one block is always written, so an empty
    /// stream still owns a head block.
    ///
    /// When `offset` is the free-list head the consumed blocks are taken off
    /// the free list. The caller guarantees the destination has capacity for
    /// `data`, either an existing chain of the same size or space reserved
    /// with `ensure_capacity`.
    pub fn write_chain(&mut self, offset: u32, data: &[u8]) -> Result<ChainWrite> {
        let payload = self.payload_size() as usize;
        let from_free_list = offset != 0 && offset == self.header.first_free_block;
        let limit = self.header.block_count();

        let mut current = offset;
        let mut remaining = data;
        let mut blocks = 0u32;

        loop {
            self.check_link(offset, current)?;
            let word = self.read_pointer(current)?;
            if from_free_list && word & FREE_BIT == 0 {
                return Err(DatError::FreeListCorrupt {
                    offset: current,
                    pointer: word,
                });
            }

            let next = word & !FREE_BIT;
            let is_last = remaining.len() <= payload;

            if !is_last && next == 0 {
                let available = (blocks as u64 + 1) * payload as u64;
                return Err(if from_free_list {
                    DatError::AllocationShortfall {
                        required: data.len() as u64,
                        available,
                    }
                } else {
                    DatError::TruncatedData {
                        head: offset,
                        expected: data.len() as u32,
                        available,
                    }
                });
            }
            if !from_free_list && !is_last && word & FREE_BIT != 0 {
                return Err(DatError::FreeBlockInChain { head: offset, offset: word });
            }

            let (chunk, rest) = remaining.split_at(remaining.len().min(payload));
            self.write_block(current, if is_last { 0 } else { next }, chunk)?;
            blocks += 1;

            if is_last {
                if from_free_list {
                    self.consume_free_blocks(blocks, next);
                }
                return Ok(ChainWrite {
                    head: offset,
                    blocks,
                    next,
                });
            }

            if blocks >= limit {
                return Err(DatError::ChainTooLong { head: offset, limit });
            }
            current = next;
            remaining = rest;
        }
    }

    // =========================================================================
    // Header Persistence
    // =========================================================================

    /// Write the header back if it changed
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let raw = self.header.encode();
        self.write_raw(HEADER_OFFSET, &raw)?;
        if self.sync_on_flush {
            self.file.sync_all()?;
        }
        self.dirty = false;

        tracing::debug!("Header flushed: {}", self.header);
        Ok(())
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("Failed to persist container header on drop: {}", e);
            }
        }
    }
}
