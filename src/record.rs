//! Record Store
//!
//! Moves opaque record bytes in and out of block chains.

use crate::block::{BlockFile, ChainWrite};
use crate::directory::Entry;
use crate::error::Result;

/// Reads and writes record payloads
pub struct RecordStore<'a> {
    blocks: &'a mut BlockFile,
}

impl<'a> RecordStore<'a> {
    pub fn new(blocks: &'a mut BlockFile) -> Self {
        Self { blocks }
    }

    /// The bytes of the record described by `entry`
    pub fn read(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        self.blocks.read_chain(entry.offset, entry.size)
    }

    /// Overwrite the chain at `offset` with `data`
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<ChainWrite> {
        self.blocks.write_chain(offset, data)
    }

    /// Store `data` in new blocks taken from the free list
    pub fn write_new(&mut self, data: &[u8]) -> Result<ChainWrite> {
        self.blocks.allocate_chain(data)
    }
}
