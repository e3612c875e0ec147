//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use blockdat::directory::{DirectoryNode, Entry};
use blockdat::header::{Header, FREE_BIT, HEADER_OFFSET, HEADER_SIZE};
use blockdat::{Config, Container};
use tempfile::TempDir;

/// Block size used by every fixture
pub const BLOCK_SIZE: u32 = 0x400;

/// Payload bytes per fixture block
pub const PAYLOAD: u32 = BLOCK_SIZE - 4;

/// Key of the one record in the hand-built container
pub const SCENARIO_KEY: u32 = 0x4100_0000;

/// Head block of that record
pub const SCENARIO_RECORD: u32 = 0x800;

/// Root directory node of the hand-built container
pub const SCENARIO_ROOT: u32 = 0x1000;

/// Size of the record in the hand-built container
pub const SCENARIO_SIZE: u32 = 100;

/// Free blocks of the hand-built container, in list order
pub fn scenario_free_blocks() -> Vec<u32> {
    let mut free = vec![0x400, 0xC00];
    free.extend((6..16).map(|i| i * BLOCK_SIZE));
    free
}

pub fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("portal.dat");
    (temp_dir, path)
}

/// Config for a fresh container at `path`, growing 64 blocks at a time
pub fn small_config(path: &Path) -> Config {
    Config::builder()
        .path(path)
        .block_size(BLOCK_SIZE)
        .growth_chunk_bytes(64 * BLOCK_SIZE)
        .sync_on_flush(false)
        .build()
}

/// Create an empty container with the small growth chunk
pub fn create_container() -> (TempDir, Container) {
    let (temp_dir, path) = setup_temp_dir();
    let container = Container::create(small_config(&path)).unwrap();
    (temp_dir, container)
}

/// Deterministic record contents
pub fn record_bytes(seed: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (seed as usize).wrapping_mul(31).wrapping_add(i) as u8)
        .collect()
}

fn put_u32(image: &mut [u8], position: u32, value: u32) {
    let position = position as usize;
    image[position..position + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a 16-block container laid out by hand
///
/// ```text
/// 0x0000  header
/// 0x0400  free
/// 0x0800  record SCENARIO_KEY, 100 bytes of 0xAB
/// 0x0C00  free
/// 0x1000  root node, continued at 0x1400
/// 0x1800..0x3C00  free
/// ```
pub fn write_scenario(path: &Path, timestamp: u32) {
    let block_count = 16u32;
    let mut image = vec![0u8; (BLOCK_SIZE * block_count) as usize];

    let free = scenario_free_blocks();
    for (i, &offset) in free.iter().enumerate() {
        let next = free.get(i + 1).copied().unwrap_or(0);
        put_u32(&mut image, offset, next | FREE_BIT);
    }

    let record = SCENARIO_RECORD as usize;
    put_u32(&mut image, SCENARIO_RECORD, 0);
    image[record + 4..record + 4 + SCENARIO_SIZE as usize].fill(0xAB);

    let mut root = DirectoryNode::empty(SCENARIO_ROOT);
    root.entries.push(Entry {
        identifier: SCENARIO_KEY,
        offset: SCENARIO_RECORD,
        size: SCENARIO_SIZE,
        timestamp,
    });
    let encoded = root.encode();
    let (first, second) = encoded.split_at(PAYLOAD as usize);
    let node = SCENARIO_ROOT as usize;
    let continuation = node + BLOCK_SIZE as usize;
    put_u32(&mut image, SCENARIO_ROOT, SCENARIO_ROOT + BLOCK_SIZE);
    image[node + 4..node + 4 + first.len()].copy_from_slice(first);
    put_u32(&mut image, SCENARIO_ROOT + BLOCK_SIZE, 0);
    image[continuation + 4..continuation + 4 + second.len()].copy_from_slice(second);

    let header = Header {
        block_size: BLOCK_SIZE,
        file_size: BLOCK_SIZE * block_count,
        content_type: 0,
        content_subtype: 0,
        first_free_block: free[0],
        last_free_block: free[free.len() - 1],
        free_block_count: free.len() as u32,
        root_offset: SCENARIO_ROOT,
    };
    let start = HEADER_OFFSET as usize;
    image[start..start + HEADER_SIZE].copy_from_slice(&header.encode());

    fs::write(path, image).unwrap();
}

/// Open the hand-built container
pub fn open_scenario() -> (TempDir, Container) {
    let (temp_dir, path) = setup_temp_dir();
    write_scenario(&path, 0x5F00_0000);
    let config = Config::builder().path(&path).sync_on_flush(false).build();
    let container = Container::open(config).unwrap();
    (temp_dir, container)
}

/// Overwrite the little-endian word at `position` of the file at `path`
pub fn patch_u32(path: &Path, position: u32, value: u32) {
    let mut image = fs::read(path).unwrap();
    put_u32(&mut image, position, value);
    fs::write(path, image).unwrap();
}
