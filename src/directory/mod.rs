//! Directory Module
//!
//! The key index: a multiway search tree whose nodes are fixed-size pages
//! stored in block chains.
//!
//! ## Node Format (1244 bytes, little-endian)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Subdirectory offsets: 62 x u32            (248 bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Entry count: u32                          (4 bytes)     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Entries: 62 x [Id u32][Offset u32][Size u32][Time u32]  │
//! │   first `count` used, ascending by Id, rest zero        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Gaps
//! A node with `n` entries has `n + 1` gaps. Gap `i < n` holds keys below
//! entry `i`, gap `n` holds keys above the last entry. Gap `i` is stored in
//! subdirectory slot `i`; a full node has no slot for gap 62, which is
//! therefore always empty.

mod tree;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::block::BlockFile;
use crate::error::{DatError, Result};

pub use tree::{Directory, Located};

/// Maximum entries per node (and number of subdirectory slots)
pub const FANOUT: usize = 62;

/// Entry size: identifier + offset + size + timestamp
pub const ENTRY_SIZE: usize = 16;

/// Byte offset of the entry count inside a node
pub const COUNT_OFFSET: usize = FANOUT * 4;

/// Serialized node size: 62*4 + 4 + 62*16 = 1244 bytes
pub const NODE_SIZE: usize = COUNT_OFFSET + 4 + FANOUT * ENTRY_SIZE;

/// Index metadata of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Record key
    pub identifier: u32,
    /// Head block of the record's chain
    pub offset: u32,
    /// Record length in bytes
    pub size: u32,
    /// Modification time (unix seconds)
    pub timestamp: u32,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "identifier: {:08x}, offset: {:08x}, size: {:08x}, mtime: {:08x}",
            self.identifier, self.offset, self.size, self.timestamp
        )
    }
}

/// One decoded directory page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Where the node lives in the file
    pub offset: u32,
    /// Subdirectory slots (0 = absent)
    pub subdirectories: [u32; FANOUT],
    /// Entries in strictly ascending identifier order
    pub entries: Vec<Entry>,
}

impl DirectoryNode {
    /// An empty leaf that will live at `offset`
    pub fn empty(offset: u32) -> Self {
        Self {
            offset,
            subdirectories: [0; FANOUT],
            entries: Vec::new(),
        }
    }

    /// Read and decode the node stored at `offset`
    pub fn load(blocks: &mut BlockFile, offset: u32) -> Result<Self> {
        let data = blocks.read_chain(offset, NODE_SIZE as u32)?;
        Self::decode(offset, &data)
    }

    /// Encode and write the node back to its own chain
    pub fn store(&self, blocks: &mut BlockFile) -> Result<()> {
        blocks.write_chain(self.offset, &self.encode())?;
        Ok(())
    }

    /// Decode a node page
    ///
    /// Rejects counts above the fanout and entries out of order.
    pub fn decode(offset: u32, data: &[u8]) -> Result<Self> {
        if data.len() < NODE_SIZE {
            return Err(DatError::DirectoryCorrupt(format!(
                "node at {:#010x} is {} bytes, expected {}",
                offset,
                data.len(),
                NODE_SIZE
            )));
        }

        let mut buf = &data[..NODE_SIZE];
        let mut subdirectories = [0u32; FANOUT];
        for slot in subdirectories.iter_mut() {
            *slot = buf.get_u32_le();
        }

        let count = buf.get_u32_le() as usize;
        if count > FANOUT {
            return Err(DatError::DirectoryCorrupt(format!(
                "node at {:#010x} claims {} entries",
                offset, count
            )));
        }

        let mut entries: Vec<Entry> = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = Entry {
                identifier: buf.get_u32_le(),
                offset: buf.get_u32_le(),
                size: buf.get_u32_le(),
                timestamp: buf.get_u32_le(),
            };
            if let Some(prev) = entries.last() {
                if prev.identifier >= entry.identifier {
                    return Err(DatError::DirectoryCorrupt(format!(
                        "node at {:#010x}: {:#010x} follows {:#010x}",
                        offset, entry.identifier, prev.identifier
                    )));
                }
            }
            entries.push(entry);
        }

        Ok(Self {
            offset,
            subdirectories,
            entries,
        })
    }

    /// Encode the full fixed-size page
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NODE_SIZE);
        for &slot in &self.subdirectories {
            buf.put_u32_le(slot);
        }
        buf.put_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32_le(entry.identifier);
            buf.put_u32_le(entry.offset);
            buf.put_u32_le(entry.size);
            buf.put_u32_le(entry.timestamp);
        }
        buf.resize(NODE_SIZE, 0);
        buf.freeze()
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= FANOUT
    }

    /// No subdirectory slot is in use
    pub fn is_leaf(&self) -> bool {
        self.subdirectories.iter().all(|&slot| slot == 0)
    }

    /// Position of `key`: `Ok(index)` on a match, `Err(gap)` otherwise
    pub fn search(&self, key: u32) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |e| e.identifier)
    }

    /// Subdirectory in gap `index`, 0 when absent
    pub fn gap(&self, index: usize) -> u32 {
        if index < FANOUT {
            self.subdirectories[index]
        } else {
            0
        }
    }

    /// The `len() + 1` gaps of this node
    pub fn gaps(&self) -> Vec<u32> {
        (0..=self.entries.len()).map(|i| self.gap(i)).collect()
    }

    /// Whether one more entry fits without pushing a subdirectory off the page
    pub fn has_room(&self) -> bool {
        let n = self.entries.len();
        n + 1 < FANOUT || (n + 1 == FANOUT && self.gap(n) == 0)
    }

    /// Insert `entry` at `index`, splitting empty gap `index` into two
    pub fn insert_at(&mut self, index: usize, entry: Entry) -> Result<()> {
        if self.gap(index) != 0 {
            return Err(DatError::DirectoryCorrupt(format!(
                "insert into occupied gap {} of node {:#010x}",
                index, self.offset
            )));
        }
        if !self.has_room() {
            return Err(DatError::DirectoryFull { node: self.offset });
        }

        let mut gaps = self.gaps();
        gaps.insert(index, 0);
        self.entries.insert(index, entry);
        self.set_gaps(&gaps)
    }

    /// Remove entry `index`, merging its two gaps
    ///
    /// At most one of the two gaps may hold a subdirectory.
    pub fn remove_at(&mut self, index: usize) -> Result<Entry> {
        let mut gaps = self.gaps();
        let (left, right) = (gaps[index], gaps[index + 1]);
        if left != 0 && right != 0 {
            return Err(DatError::DirectoryCorrupt(format!(
                "entry {} of node {:#010x} has subdirectories on both sides",
                index, self.offset
            )));
        }

        let entry = self.entries.remove(index);
        gaps[index] = left | right;
        gaps.remove(index + 1);
        self.set_gaps(&gaps)?;
        Ok(entry)
    }

    fn set_gaps(&mut self, gaps: &[u32]) -> Result<()> {
        if gaps.iter().skip(FANOUT).any(|&g| g != 0) {
            return Err(DatError::DirectoryFull { node: self.offset });
        }
        self.subdirectories = [0; FANOUT];
        for (slot, &gap) in self.subdirectories.iter_mut().zip(gaps) {
            *slot = gap;
        }
        Ok(())
    }
}
