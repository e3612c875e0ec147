//! Free-List Allocator
//!
//! Tracks unused blocks as one singly linked chain whose ends and length
//! live in the header.
//!
//! ## Ordering
//! - Extension appends new blocks after `last_free_block` (queue order)
//! - Reclaimed chains are pushed in front of `first_free_block` (stack order)
//! - Allocation always consumes from `first_free_block`
//!
//! So the most recently freed blocks are reused first, and freshly grown
//! space is only reached once they are gone.
//!
//! ## Accounting
//! `free_block_count` is credited by extension and debited by allocation.
//! Reclaimed blocks are linked into the chain but not credited, so the count
//! is a lower bound of the chain length and `ensure_capacity` never relies on
//! space it has not counted.

use bytes::BufMut;

use crate::block::{BlockFile, ChainWrite};
use crate::error::{DatError, Result};
use crate::header::{FREE_BIT, MAX_FILE_SIZE};

impl BlockFile {
    /// Bytes available on the free list: `free_block_count * (block_size - 4)`
    pub fn free_space_bytes(&self) -> u64 {
        self.header().free_space()
    }

    /// Blocks added per growth chunk
    pub fn blocks_per_chunk(&self) -> u32 {
        (self.growth_chunk() / self.block_size()).max(1)
    }

    /// Grow the free list until it holds at least `length` bytes
    ///
    /// The deficit is rounded up to whole growth chunks. Returns the number
    /// of blocks added (0 when the space was already there).
    pub fn ensure_capacity(&mut self, length: u64) -> Result<u32> {
        let free = self.free_space_bytes();
        if length <= free {
            return Ok(0);
        }

        let needed = length - free;
        let per_chunk = self.blocks_per_chunk() as u64;
        let bytes_per_extension = per_chunk * self.payload_size() as u64;
        let extensions = (needed + bytes_per_extension - 1) / bytes_per_extension;
        let count = per_chunk * extensions;

        tracing::debug!(
            "Extending free list: need {} more bytes, adding {} blocks ({} extensions)",
            needed,
            count,
            extensions
        );

        let count = u32::try_from(count).map_err(|_| DatError::AddressSpaceExhausted {
            requested: self.header().file_size as u64 + count * self.block_size() as u64,
        })?;
        self.add_free_blocks(count)?;

        let available = self.free_space_bytes();
        if length > available {
            return Err(DatError::AllocationShortfall {
                required: length,
                available,
            });
        }
        Ok(count)
    }

    /// Append `count` new free blocks at the end of the file
    ///
    /// The new run is linked after the current tail of the free list, or
    /// becomes the whole list when it was empty.
    pub fn add_free_blocks(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let block_size = self.block_size();
        let first_new = self.header().file_size;
        let new_size = first_new as u64 + count as u64 * block_size as u64;
        if new_size > MAX_FILE_SIZE as u64 {
            return Err(DatError::AddressSpaceExhausted { requested: new_size });
        }

        // Link the old tail to the first new block
        let old_tail = self.header().last_free_block;
        if old_tail != 0 {
            self.write_block(old_tail, first_new | FREE_BIT, &[])?;
        }

        // Write the new run one growth chunk at a time
        let per_batch = self.blocks_per_chunk();
        let mut written = 0u32;
        while written < count {
            let batch = per_batch.min(count - written);
            let batch_start = first_new + written * block_size;

            let mut region = Vec::with_capacity(batch as usize * block_size as usize);
            for i in 0..batch {
                let index = written + i;
                let offset = first_new + index * block_size;
                let next = if index + 1 < count { offset + block_size } else { 0 };
                region.put_u32_le(next | FREE_BIT);
                region.resize(region.len() + (block_size - 4) as usize, 0);
            }

            self.write_raw(batch_start as u64, &region)?;
            written += batch;
        }

        let last_new = first_new + (count - 1) * block_size;
        let header = self.header_mut();
        if header.first_free_block == 0 {
            header.first_free_block = first_new;
        }
        header.last_free_block = last_new;
        header.free_block_count += count;
        header.file_size = new_size as u32;

        tracing::debug!(
            "Added {} free blocks at {:#010x}..{:#010x}, file size now {}",
            count,
            first_new,
            last_new,
            new_size
        );
        Ok(())
    }

    /// Write `data` into freshly reserved free blocks
    ///
    /// Reserves capacity first, then writes at the free-list head. Even an
    /// empty stream consumes one block.
    pub fn allocate_chain(&mut self, data: &[u8]) -> Result<ChainWrite> {
        self.ensure_capacity((data.len() as u64).max(1))?;

        let head = self.header().first_free_block;
        if head == 0 {
            return Err(DatError::AllocationShortfall {
                required: data.len() as u64,
                available: 0,
            });
        }
        self.write_chain(head, data)
    }

    /// Take `blocks` blocks off the front of the free list
    ///
    /// `next` is the free block that followed the last consumed one.
    pub(crate) fn consume_free_blocks(&mut self, blocks: u32, next: u32) {
        let header = self.header_mut();
        header.free_block_count = header.free_block_count.saturating_sub(blocks);
        header.first_free_block = next;
        if next == 0 {
            header.last_free_block = 0;
        }
    }

    /// Return the chain at `head` to the free list
    ///
    /// Every block gets the free bit and a zeroed payload; the last one links
    /// to the old free-list head, and `head` becomes the new free-list head.
    /// The chain is fully validated before anything is rewritten, so freeing
    /// an already free chain fails with `FreeBlockInChain`. Returns the
    /// number of blocks reclaimed.
    pub fn reclaim(&mut self, head: u32) -> Result<u32> {
        if head == 0 {
            return Ok(0);
        }

        let offsets = self
            .chain(head)
            .map(|block| block.map(|b| b.offset))
            .collect::<Result<Vec<u32>>>()?;

        let old_head = self.header().first_free_block;
        for (i, &offset) in offsets.iter().enumerate() {
            let next = offsets.get(i + 1).copied().unwrap_or(old_head);
            self.write_block(offset, next | FREE_BIT, &[])?;
        }

        let tail = offsets.last().copied().unwrap_or(head);
        let header = self.header_mut();
        header.first_free_block = head;
        if header.last_free_block == 0 {
            header.last_free_block = tail;
        }

        tracing::debug!("Reclaimed {} blocks starting at {:#010x}", offsets.len(), head);
        Ok(offsets.len() as u32)
    }
}
