//! Consistency Checker
//!
//! Walks the whole container and verifies its structural invariants:
//! - every directory node and record chain is a valid live chain
//! - directory keys respect the search-tree bounds of their position
//! - no block is owned twice, and no block is both live and free
//! - every free-list block carries the free bit and the list ends at
//!   `last_free_block`
//! - the free chain is at least as long as `free_block_count`
//!
//! Blocks reachable from neither side are reported, not rejected: an
//! interrupted replacement leaks its old chain that way.

use std::collections::BTreeSet;

use crate::block::BlockFile;
use crate::directory::DirectoryNode;
use crate::error::{DatError, Result};
use crate::header::FREE_BIT;

/// What a full check found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Directory nodes visited
    pub directory_nodes: u32,
    /// Directory entries visited
    pub records: u32,
    /// Blocks owned by directory nodes and records
    pub live_blocks: u32,
    /// Blocks on the free chain
    pub free_blocks: u32,
    /// Free-chain blocks beyond `free_block_count` (reclaimed, not credited)
    pub uncounted_free_blocks: u32,
    /// Blocks neither live nor free
    pub leaked_blocks: Vec<u32>,
}

impl CheckReport {
    /// No leaked blocks
    pub fn is_clean(&self) -> bool {
        self.leaked_blocks.is_empty()
    }
}

/// Check the container behind `blocks`
pub fn check(blocks: &mut BlockFile) -> Result<CheckReport> {
    let header = *blocks.header();
    let payload = header.payload_size() as u64;
    let mut report = CheckReport::default();
    let mut live = BTreeSet::new();

    // -------------------------------------------------------------------------
    // Directory and records
    // -------------------------------------------------------------------------
    // (node offset, exclusive lower key bound, exclusive upper key bound)
    let mut stack: Vec<(u32, Option<u32>, Option<u32>)> = vec![(header.root_offset, None, None)];

    while let Some((offset, lower, upper)) = stack.pop() {
        report.directory_nodes += 1;
        claim_chain(blocks, &mut live, offset, "directory node")?;
        let node = DirectoryNode::load(blocks, offset)?;

        for entry in &node.entries {
            let key = entry.identifier;
            if lower.map_or(false, |l| key <= l) || upper.map_or(false, |u| key >= u) {
                return Err(DatError::DirectoryCorrupt(format!(
                    "key {:#010x} in node {:#010x} is outside its subtree bounds",
                    key, offset
                )));
            }

            let blocks_used = claim_chain(blocks, &mut live, entry.offset, "record")?;
            let available = blocks_used as u64 * payload;
            if available < entry.size as u64 {
                return Err(DatError::TruncatedData {
                    head: entry.offset,
                    expected: entry.size,
                    available,
                });
            }
            report.records += 1;
        }

        if node.subdirectories.iter().skip(node.len() + 1).any(|&slot| slot != 0) {
            return Err(DatError::DirectoryCorrupt(format!(
                "node {:#010x} uses subdirectory slots past its last gap",
                offset
            )));
        }

        for (i, gap) in node.gaps().into_iter().enumerate() {
            if gap == 0 {
                continue;
            }
            let lo = if i == 0 {
                lower
            } else {
                Some(node.entries[i - 1].identifier)
            };
            let hi = node.entries.get(i).map(|e| e.identifier).or(upper);
            stack.push((gap, lo, hi));
        }
    }
    report.live_blocks = live.len() as u32;

    // -------------------------------------------------------------------------
    // Free list
    // -------------------------------------------------------------------------
    let mut free = BTreeSet::new();
    let mut current = header.first_free_block;
    let mut tail = 0;

    while current != 0 {
        if !header.is_block_offset(current) {
            return Err(DatError::Inconsistent(format!(
                "free list reaches {:#010x}, outside the data area",
                current
            )));
        }
        if live.contains(&current) {
            return Err(DatError::Inconsistent(format!(
                "block {:#010x} is both live and free",
                current
            )));
        }
        if !free.insert(current) {
            return Err(DatError::Inconsistent(format!(
                "free list visits {:#010x} twice",
                current
            )));
        }

        let word = blocks.read_pointer(current)?;
        if word & FREE_BIT == 0 {
            return Err(DatError::FreeListCorrupt {
                offset: current,
                pointer: word,
            });
        }
        tail = current;
        current = word & !FREE_BIT;
    }

    if tail != header.last_free_block {
        return Err(DatError::Inconsistent(format!(
            "free list ends at {:#010x}, header says {:#010x}",
            tail, header.last_free_block
        )));
    }

    report.free_blocks = free.len() as u32;
    if report.free_blocks < header.free_block_count {
        return Err(DatError::Inconsistent(format!(
            "free list holds {} blocks, header counts {}",
            report.free_blocks, header.free_block_count
        )));
    }
    report.uncounted_free_blocks = report.free_blocks - header.free_block_count;

    // -------------------------------------------------------------------------
    // Coverage
    // -------------------------------------------------------------------------
    report.leaked_blocks = (1..header.block_count())
        .map(|i| i * header.block_size)
        .filter(|offset| !live.contains(offset) && !free.contains(offset))
        .collect();

    if !report.leaked_blocks.is_empty() {
        tracing::warn!("{} blocks are neither live nor free", report.leaked_blocks.len());
    }
    Ok(report)
}

/// Mark every block of a live chain as owned; returns the chain length
fn claim_chain(blocks: &mut BlockFile, live: &mut BTreeSet<u32>, head: u32, what: &str) -> Result<u32> {
    let mut count = 0;
    for block in blocks.chain(head) {
        let block = block?;
        if !live.insert(block.offset) {
            return Err(DatError::Inconsistent(format!(
                "block {:#010x} of {} {:#010x} is already owned",
                block.offset, what, head
            )));
        }
        count += 1;
    }
    Ok(count)
}
