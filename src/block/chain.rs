//! Chain Iterator
//!
//! Lazily follows next pointers from a head block.

use crate::error::{DatError, Result};

use super::BlockFile;

/// One block visited while walking a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    /// Offset of this block
    pub offset: u32,
    /// Raw next-pointer word stored in this block
    pub next: u32,
    /// Payload bytes (empty unless requested)
    pub payload: Vec<u8>,
}

/// Iterator over the blocks of a live chain
///
/// Every link is validated before it is read, and the walk stops with
/// `ChainTooLong` after as many steps as the file has blocks, so a cyclic
/// chain cannot spin forever. The iterator is fused after the first error.
pub struct ChainIter<'a> {
    blocks: &'a mut BlockFile,
    head: u32,
    next: u32,
    steps: u32,
    limit: u32,
    with_payload: bool,
    failed: bool,
}

impl<'a> ChainIter<'a> {
    pub(super) fn new(blocks: &'a mut BlockFile, head: u32, with_payload: bool) -> Self {
        let limit = blocks.header().block_count();
        Self {
            blocks,
            head,
            next: head,
            steps: 0,
            limit,
            with_payload,
            failed: false,
        }
    }

    /// Number of blocks visited so far
    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn visit(&mut self, offset: u32) -> Result<ChainBlock> {
        self.blocks.check_link(self.head, offset)?;
        if self.steps >= self.limit {
            return Err(DatError::ChainTooLong {
                head: self.head,
                limit: self.limit,
            });
        }
        self.steps += 1;

        let next = self.blocks.read_pointer(offset)?;
        let payload = if self.with_payload {
            self.blocks.read_payload(offset)?
        } else {
            Vec::new()
        };
        Ok(ChainBlock { offset, next, payload })
    }
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<ChainBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next == 0 {
            return None;
        }

        match self.visit(self.next) {
            Ok(block) => {
                self.next = block.next;
                Some(Ok(block))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
