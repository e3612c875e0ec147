//! Container Module
//!
//! The engine handle that coordinates all components.
//!
//! ## Responsibilities
//! - Open, create and close the host file
//! - Route lookups through the directory and reads through the record store
//! - Run the replacement protocol so the index and free list stay consistent
//! - Insert and remove records

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Buf;

use crate::block::BlockFile;
use crate::check::{self, CheckReport};
use crate::config::Config;
use crate::directory::{Directory, DirectoryNode, Entry, Located};
use crate::error::{DatError, Result};
use crate::header::Header;
use crate::record::RecordStore;

/// Key of the record holding the container's data version
pub const VERSION_RECORD: u32 = 0xFFFF_0001;

/// Steps of the replacement protocol, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStage {
    Idle,
    CapacityEnsured,
    DataWritten,
    DirectoryRewritten,
    OldFreed,
}

impl fmt::Display for ReplaceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplaceStage::Idle => "idle",
            ReplaceStage::CapacityEnsured => "capacity ensured",
            ReplaceStage::DataWritten => "data written",
            ReplaceStage::DirectoryRewritten => "directory rewritten",
            ReplaceStage::OldFreed => "old chain freed",
        };
        f.write_str(name)
    }
}

/// An open container
///
/// ## Concurrency Model: single owner
///
/// Every operation, reads included, takes `&mut self` because they all move
/// the one file cursor. Share a container across threads through
/// [`SharedContainer`](crate::shared::SharedContainer).
///
/// ## Durability
/// The header is cached in memory and written back by `flush()`/`close()`.
/// Dropping the handle flushes as well; `close()` is the way to see the
/// error if that write fails.
pub struct Container {
    /// Handle configuration
    config: Config,

    /// Block layer, owning the host file and header state
    blocks: BlockFile,

    /// Data version read from `VERSION_RECORD`
    cached_version: Option<u32>,
}

impl Container {
    /// Open an existing container
    ///
    /// Creates it instead when `create_if_missing` is set and the path does
    /// not exist.
    pub fn open(config: Config) -> Result<Self> {
        if config.create_if_missing && !config.path.exists() {
            return Self::create(config);
        }

        let file = OpenOptions::new().read(true).write(true).open(&config.path)?;
        let blocks = BlockFile::open(file)?
            .with_growth_chunk(config.growth_chunk_bytes)
            .with_sync_on_flush(config.sync_on_flush);

        tracing::info!("Opened container {}: {}", config.path.display(), blocks.header());

        Ok(Self {
            config,
            blocks,
            cached_version: None,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified path
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().path(path).build();
        Self::open(config)
    }

    /// Create a new container at `config.path`
    ///
    /// Fails if the file already exists. The new container has one growth
    /// chunk of free space and an empty root directory.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&config.path)?;

        let header = Header::new(config.block_size, config.content_type, config.content_subtype);
        let mut blocks = BlockFile::create(file, header)?
            .with_growth_chunk(config.growth_chunk_bytes)
            .with_sync_on_flush(config.sync_on_flush);

        let root = blocks.allocate_chain(&DirectoryNode::empty(0).encode())?;
        blocks.header_mut().root_offset = root.head;
        blocks.flush()?;

        tracing::info!("Created container {}: {}", config.path.display(), blocks.header());

        Ok(Self {
            config,
            blocks,
            cached_version: None,
        })
    }

    // =========================================================================
    // Lookups and Reads
    // =========================================================================

    /// Directory entry for `key`, `None` when absent
    pub fn lookup(&mut self, key: u32) -> Result<Option<Entry>> {
        Ok(self.locate(key)?.map(|located| *located.entry()))
    }

    /// Entry for `key` together with the node that owns it
    pub fn locate(&mut self, key: u32) -> Result<Option<Located>> {
        Directory::new(&mut self.blocks).lookup(key)
    }

    /// Bytes of the record `key`, `None` when absent
    pub fn read(&mut self, key: u32) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Some(entry) => self.read_entry(&entry).map(Some),
            None => Ok(None),
        }
    }

    /// Bytes of the record described by `entry`
    pub fn read_entry(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        RecordStore::new(&mut self.blocks).read(entry)
    }

    /// All entries in ascending key order
    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        Directory::new(&mut self.blocks).entries()
    }

    /// The root directory node
    pub fn root(&mut self) -> Result<DirectoryNode> {
        let offset = self.blocks.header().root_offset;
        DirectoryNode::load(&mut self.blocks, offset)
    }

    /// Data version stored in the first word of `VERSION_RECORD`
    pub fn data_version(&mut self) -> Result<Option<u32>> {
        if let Some(version) = self.cached_version {
            return Ok(Some(version));
        }

        let entry = match self.lookup(VERSION_RECORD)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let data = self.read_entry(&entry)?;
        if data.len() < 4 {
            return Err(DatError::TruncatedData {
                head: entry.offset,
                expected: 4,
                available: data.len() as u64,
            });
        }

        let version = (&data[..]).get_u32_le();
        self.cached_version = Some(version);
        Ok(Some(version))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Replace the bytes of record `key`
    ///
    /// Fails with `KeyNotFound` when the key is absent. Returns the updated
    /// entry.
    pub fn replace(&mut self, key: u32, data: &[u8]) -> Result<Entry> {
        let located = self.locate(key)?.ok_or(DatError::KeyNotFound(key))?;
        self.replace_located(located, data)
    }

    /// Replace the bytes of an already located record
    ///
    /// New data goes into free blocks, the owning node is rewritten in
    /// place, and only then is the old chain reclaimed. An error between the
    /// last two steps leaks the old chain but leaves every lookup valid.
    pub fn replace_located(&mut self, mut located: Located, data: &[u8]) -> Result<Entry> {
        let key = located.entry().identifier;
        let mut stage = ReplaceStage::Idle;

        let result = self.run_replacement(&mut located, data, &mut stage);
        if let Err(e) = &result {
            tracing::warn!("Replacement of {:#010x} stopped after stage '{}': {}", key, stage, e);
        }
        result?;

        if key == VERSION_RECORD {
            self.cached_version = None;
        }
        Ok(*located.entry())
    }

    fn run_replacement(&mut self, located: &mut Located, data: &[u8], stage: &mut ReplaceStage) -> Result<()> {
        let size = record_size(data)?;

        self.blocks.ensure_capacity((data.len() as u64).max(1))?;
        *stage = ReplaceStage::CapacityEnsured;

        let old_head = located.entry().offset;
        let new_head = self.blocks.header().first_free_block;
        {
            let entry = located.entry_mut();
            entry.offset = new_head;
            entry.size = size;
        }
        RecordStore::new(&mut self.blocks).write(new_head, data)?;
        *stage = ReplaceStage::DataWritten;

        Directory::new(&mut self.blocks).update(located)?;
        *stage = ReplaceStage::DirectoryRewritten;

        self.blocks.reclaim(old_head)?;
        *stage = ReplaceStage::OldFreed;

        tracing::debug!(
            "Replaced {:#010x}: {:#010x} -> {:#010x}, {} bytes",
            located.entry().identifier,
            old_head,
            new_head,
            size
        );
        Ok(())
    }

    /// Add a new record
    ///
    /// Fails with `DuplicateKey` if `key` exists. The entry is stamped with
    /// the current time.
    pub fn insert(&mut self, key: u32, data: &[u8]) -> Result<Entry> {
        let size = record_size(data)?;
        if self.lookup(key)?.is_some() {
            return Err(DatError::DuplicateKey(key));
        }

        let written = RecordStore::new(&mut self.blocks).write_new(data)?;
        let entry = Entry {
            identifier: key,
            offset: written.head,
            size,
            timestamp: unix_now(),
        };

        if let Err(e) = Directory::new(&mut self.blocks).insert(entry) {
            self.blocks.reclaim(written.head)?;
            return Err(e);
        }

        if key == VERSION_RECORD {
            self.cached_version = None;
        }
        tracing::debug!("Inserted {}", entry);
        Ok(entry)
    }

    /// Remove record `key`, returning its former entry
    pub fn remove(&mut self, key: u32) -> Result<Entry> {
        let entry = Directory::new(&mut self.blocks).remove(key)?;
        self.blocks.reclaim(entry.offset)?;

        if key == VERSION_RECORD {
            self.cached_version = None;
        }
        tracing::debug!("Removed {}", entry);
        Ok(entry)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist the header if it changed
    pub fn flush(&mut self) -> Result<()> {
        self.blocks.flush()
    }

    /// Flush and close the container
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        tracing::info!("Closed container {}", self.config.path.display());
        Ok(())
    }

    /// Verify the container's structural invariants
    pub fn check(&mut self) -> Result<CheckReport> {
        check::check(&mut self.blocks)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn header(&self) -> &Header {
        self.blocks.header()
    }

    /// Bytes available on the free list
    pub fn free_space(&self) -> u64 {
        self.blocks.free_space_bytes()
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Low-level block access
    pub fn blocks(&mut self) -> &mut BlockFile {
        &mut self.blocks
    }
}

fn record_size(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len()).map_err(|_| DatError::AddressSpaceExhausted {
        requested: data.len() as u64,
    })
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
