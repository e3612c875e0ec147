//! Directory Tree
//!
//! Search, insertion and removal over persisted directory nodes.
//!
//! Traversal is an offset-following loop: load a node, inspect it, compute
//! the next offset. Only the current node (plus, while removing, one parent
//! offset) is held at a time. There is no rebalancing; a full node grows new
//! children in its empty gaps instead of splitting.

use crate::block::BlockFile;
use crate::error::{DatError, Result};

use super::{DirectoryNode, Entry, FANOUT};

/// A matched entry together with the node that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub node: DirectoryNode,
    pub index: usize,
}

impl Located {
    pub fn entry(&self) -> &Entry {
        &self.node.entries[self.index]
    }

    pub fn entry_mut(&mut self) -> &mut Entry {
        &mut self.node.entries[self.index]
    }
}

/// Where a descent stopped
struct Descent {
    /// Node offset and gap index we came through
    parent: Option<(u32, usize)>,
    node: DirectoryNode,
    /// `Ok(index)` on a match, `Err(gap)` at an empty gap
    position: std::result::Result<usize, usize>,
}

/// The directory tree rooted at the header's root offset
pub struct Directory<'a> {
    blocks: &'a mut BlockFile,
}

impl<'a> Directory<'a> {
    pub fn new(blocks: &'a mut BlockFile) -> Self {
        Self { blocks }
    }

    /// Offset of the root node
    pub fn root(&self) -> u32 {
        self.blocks.header().root_offset
    }

    /// Upper bound on nodes along any path (one per block)
    fn node_limit(&self) -> u32 {
        self.blocks.header().block_count()
    }

    /// Follow the search path for `key` until it matches or hits an empty gap
    fn descend(&mut self, key: u32) -> Result<Descent> {
        let root = self.root();
        self.descend_from(root, key)
    }

    fn descend_from(&mut self, start: u32, key: u32) -> Result<Descent> {
        let mut offset = start;
        let mut parent = None;

        for _ in 0..self.node_limit() {
            let node = DirectoryNode::load(self.blocks, offset)?;
            match node.search(key) {
                Ok(index) => {
                    return Ok(Descent {
                        parent,
                        node,
                        position: Ok(index),
                    })
                }
                Err(gap) => {
                    let subdirectory = node.gap(gap);
                    if subdirectory == 0 {
                        return Ok(Descent {
                            parent,
                            node,
                            position: Err(gap),
                        });
                    }
                    parent = Some((node.offset, gap));
                    offset = subdirectory;
                }
            }
        }

        Err(DatError::DirectoryCorrupt(format!(
            "search for {:#010x} from {:#010x} does not terminate",
            key, start
        )))
    }

    /// Find the entry for `key`
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn lookup(&mut self, key: u32) -> Result<Option<Located>> {
        let descent = self.descend(key)?;
        Ok(descent.position.ok().map(|index| Located {
            node: descent.node,
            index,
        }))
    }

    /// Write a located node back after its entry was changed
    pub fn update(&mut self, located: &Located) -> Result<()> {
        located.node.store(self.blocks)
    }

    /// Add an entry for a new key
    ///
    /// The entry lands in the node where the search ends. If that node has
    /// no room, a new child node is allocated in the empty gap. A full node
    /// has no slot for a gap after its last entry, so a key beyond it takes
    /// the last entry's place and the displaced entry moves down into the
    /// last gap, where it is the largest key.
    pub fn insert(&mut self, entry: Entry) -> Result<()> {
        let descent = self.descend(entry.identifier)?;
        let gap = match descent.position {
            Ok(_) => return Err(DatError::DuplicateKey(entry.identifier)),
            Err(gap) => gap,
        };

        let mut node = descent.node;
        let mut gap = gap;
        let mut pending = entry;

        for _ in 0..self.node_limit() {
            if node.has_room() {
                node.insert_at(gap, pending)?;
                return node.store(self.blocks);
            }
            if gap < FANOUT {
                return self.grow_child(node, gap, pending);
            }

            // Full node, key above every entry
            let last = FANOUT - 1;
            pending = std::mem::replace(&mut node.entries[last], pending);
            let subdirectory = node.gap(last);
            if subdirectory == 0 {
                return self.grow_child(node, last, pending);
            }
            node.store(self.blocks)?;

            tracing::debug!(
                "Pushed {:#010x} down from full node {:#010x}",
                pending.identifier,
                node.offset
            );

            let descent = self.descend_from(subdirectory, pending.identifier)?;
            gap = descent.position.err().ok_or_else(|| {
                DatError::DirectoryCorrupt(format!(
                    "{:#010x} appears twice in the directory",
                    pending.identifier
                ))
            })?;
            node = descent.node;
        }

        Err(DatError::DirectoryFull { node: node.offset })
    }

    /// Give `node` a new child in empty gap `gap` holding just `entry`
    fn grow_child(&mut self, mut node: DirectoryNode, gap: usize, entry: Entry) -> Result<()> {
        let mut child = DirectoryNode::empty(0);
        child.entries.push(entry);
        let written = self.blocks.allocate_chain(&child.encode())?;

        node.subdirectories[gap] = written.head;
        node.store(self.blocks)?;

        tracing::debug!(
            "New directory node {:#010x} under {:#010x} gap {} for {:#010x}",
            written.head,
            node.offset,
            gap,
            entry.identifier
        );
        Ok(())
    }

    /// Remove the entry for `key` and return it
    ///
    /// An entry with a subdirectory on both sides is replaced by its in-order
    /// predecessor. Nodes left empty are unlinked and their blocks reclaimed.
    /// The record's own data chain is left to the caller.
    pub fn remove(&mut self, key: u32) -> Result<Entry> {
        let descent = self.descend(key)?;
        let index = descent.position.map_err(|_| DatError::KeyNotFound(key))?;
        let mut node = descent.node;

        let (left, right) = (node.gap(index), node.gap(index + 1));
        if left == 0 || right == 0 {
            let removed = node.remove_at(index)?;
            self.settle(node, descent.parent)?;
            return Ok(removed);
        }

        // Predecessor: last entry of the rightmost node under the left gap
        let removed = node.entries[index];
        let mut parent = (node.offset, index);
        let mut offset = left;
        let mut steps = 0;
        let mut holder = loop {
            let candidate = DirectoryNode::load(self.blocks, offset)?;
            let trailing = candidate.gap(candidate.len());
            if trailing == 0 {
                break candidate;
            }
            steps += 1;
            if steps > self.node_limit() {
                return Err(DatError::DirectoryCorrupt(format!(
                    "predecessor walk from {:#010x} does not terminate",
                    left
                )));
            }
            parent = (candidate.offset, candidate.len());
            offset = trailing;
        };

        if holder.is_empty() {
            return Err(DatError::DirectoryCorrupt(format!(
                "node {:#010x} has neither entries nor subdirectories",
                holder.offset
            )));
        }
        let last = holder.len() - 1;
        node.entries[index] = holder.remove_at(last)?;
        node.store(self.blocks)?;
        self.settle(holder, Some(parent))?;

        Ok(removed)
    }

    /// Persist a node after a removal, unlinking it if it became empty
    fn settle(&mut self, node: DirectoryNode, parent: Option<(u32, usize)>) -> Result<()> {
        if !node.is_empty() {
            return node.store(self.blocks);
        }

        let only_child = node.gap(0);
        match parent {
            Some((parent_offset, gap)) => {
                let mut parent = DirectoryNode::load(self.blocks, parent_offset)?;
                parent.subdirectories[gap] = only_child;
                parent.store(self.blocks)?;
            }
            None if only_child != 0 => {
                self.blocks.header_mut().root_offset = only_child;
            }
            // An empty root leaf stays in place
            None => return node.store(self.blocks),
        }

        tracing::debug!("Unlinked empty directory node {:#010x}", node.offset);
        self.blocks.reclaim(node.offset)?;
        Ok(())
    }

    /// All entries in ascending key order
    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        enum Visit {
            Node(u32),
            Entry(Entry),
        }

        let limit = self.node_limit();
        let mut visited = 0u32;
        let mut out = Vec::new();
        let mut stack = vec![Visit::Node(self.root())];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Entry(entry) => out.push(entry),
                Visit::Node(0) => {}
                Visit::Node(offset) => {
                    visited += 1;
                    if visited > limit {
                        return Err(DatError::DirectoryCorrupt(
                            "directory has more nodes than the file has blocks".to_string(),
                        ));
                    }

                    let node = DirectoryNode::load(self.blocks, offset)?;
                    let gaps = node.gaps();
                    stack.push(Visit::Node(gaps[node.len()]));
                    for i in (0..node.len()).rev() {
                        stack.push(Visit::Entry(node.entries[i]));
                        stack.push(Visit::Node(gaps[i]));
                    }
                }
            }
        }

        Ok(out)
    }
}
