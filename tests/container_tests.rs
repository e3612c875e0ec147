//! Tests for the Container
//!
//! These tests verify:
//! - Record round-trips through create/insert/read
//! - The replacement protocol on a hand-built container
//! - Persistence across close/reopen and drop
//! - The data version record
//! - Consistency checks after long operation sequences
//! - Concurrent use through SharedContainer

mod common;

use std::fs;
use std::thread;

use blockdat::container::{ReplaceStage, VERSION_RECORD};
use blockdat::header::FREE_BIT;
use blockdat::{Config, Container, DatError, SharedContainer};
use common::{
    create_container, open_scenario, record_bytes, setup_temp_dir, small_config, PAYLOAD,
    SCENARIO_KEY, SCENARIO_RECORD, SCENARIO_SIZE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_create_then_open() {
    let (_temp, path) = setup_temp_dir();

    let container = Container::create(small_config(&path)).unwrap();
    let header = *container.header();
    container.close().unwrap();

    let container = Container::open(small_config(&path)).unwrap();
    assert_eq!(*container.header(), header);
    assert_eq!(
        fs::metadata(&path).unwrap().len(),
        header.file_size as u64
    );
}

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, path) = setup_temp_dir();
    Container::create(small_config(&path)).unwrap().close().unwrap();

    let result = Container::create(small_config(&path));
    assert!(matches!(result, Err(DatError::Io(_))));
}

#[test]
fn test_create_validates_config() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().path(&path).block_size(0x100).build();

    let result = Container::create(config);
    assert!(matches!(result, Err(DatError::Config(_))));
    assert!(!path.exists());
}

#[test]
fn test_open_create_if_missing() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder()
        .path(&path)
        .create_if_missing(true)
        .content_type(0x1234)
        .sync_on_flush(false)
        .build();

    let container = Container::open(config.clone()).unwrap();
    assert_eq!(container.header().content_type, 0x1234);
    container.close().unwrap();

    // Second open finds the file
    let container = Container::open(config).unwrap();
    assert_eq!(container.header().content_type, 0x1234);
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_insert_and_read_lengths() {
    let (_temp, mut container) = create_container();
    let lengths = [0usize, 1, PAYLOAD as usize, PAYLOAD as usize + 1, 5000];

    for (i, &len) in lengths.iter().enumerate() {
        let key = 0x4100_0000 + i as u32;
        let entry = container.insert(key, &record_bytes(key, len)).unwrap();
        assert_eq!(entry.size as usize, len);
    }

    for (i, &len) in lengths.iter().enumerate() {
        let key = 0x4100_0000 + i as u32;
        assert_eq!(container.read(key).unwrap().unwrap(), record_bytes(key, len));
    }
    assert!(container.check().unwrap().is_clean());
}

#[test]
fn test_read_missing_key() {
    let (_temp, mut container) = create_container();
    assert_eq!(container.read(1).unwrap(), None);
}

#[test]
fn test_replace_lengths() {
    let (_temp, mut container) = create_container();
    container.insert(1, b"seed").unwrap();

    for len in [3000usize, 0, PAYLOAD as usize, 1, PAYLOAD as usize * 2 + 1] {
        let data = record_bytes(len as u32, len);
        let entry = container.replace(1, &data).unwrap();
        assert_eq!(entry.size as usize, len);
        assert_eq!(container.read(1).unwrap().unwrap(), data);
    }
    assert!(container.check().unwrap().is_clean());
}

// =============================================================================
// Replacement Protocol Tests
// =============================================================================

#[test]
fn test_scenario_lookup() {
    let (_temp, mut container) = open_scenario();

    let entry = container.lookup(SCENARIO_KEY).unwrap().unwrap();
    assert_eq!(entry.offset, SCENARIO_RECORD);
    assert_eq!(entry.size, SCENARIO_SIZE);
    assert_eq!(
        container.read(SCENARIO_KEY).unwrap().unwrap(),
        vec![0xAB; SCENARIO_SIZE as usize]
    );
    assert_eq!(container.lookup(SCENARIO_KEY + 1).unwrap(), None);
}

#[test]
fn test_scenario_replace() {
    let (_temp, mut container) = open_scenario();
    let free_before = container.free_space();
    let timestamp = container.lookup(SCENARIO_KEY).unwrap().unwrap().timestamp;

    let data = record_bytes(7, 250);
    let entry = container.replace(SCENARIO_KEY, &data).unwrap();

    // New data came from the free-list head
    assert_eq!(entry.offset, 0x400);
    assert_eq!(entry.size, 250);
    assert_eq!(entry.timestamp, timestamp);
    assert_eq!(container.read(SCENARIO_KEY).unwrap().unwrap(), data);

    // One block consumed; the old block is back on the list but not counted
    assert_eq!(container.free_space(), free_before - PAYLOAD as u64);
    assert_eq!(container.header().first_free_block, SCENARIO_RECORD);
    let pointer = container.blocks().read_pointer(SCENARIO_RECORD).unwrap();
    assert_eq!(pointer, 0xC00 | FREE_BIT);

    // The new chain is a single terminated block
    let chain: Vec<_> = container
        .blocks()
        .chain(entry.offset)
        .map(|block| block.unwrap())
        .collect();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].next, 0);

    let report = container.check().unwrap();
    assert_eq!(report.uncounted_free_blocks, 1);
    assert!(report.is_clean());
}

#[test]
fn test_scenario_replace_multi_block() {
    let (_temp, mut container) = open_scenario();

    let data = record_bytes(3, 3000);
    let entry = container.replace(SCENARIO_KEY, &data).unwrap();

    let offsets: Vec<u32> = container
        .blocks()
        .chain(entry.offset)
        .map(|block| block.unwrap().offset)
        .collect();
    assert_eq!(offsets, vec![0x400, 0xC00, 0x1800]);
    assert_eq!(container.read(SCENARIO_KEY).unwrap().unwrap(), data);
    assert_eq!(container.header().first_free_block, SCENARIO_RECORD);
    assert_eq!(
        container.blocks().read_pointer(SCENARIO_RECORD).unwrap(),
        0x1C00 | FREE_BIT
    );
}

#[test]
fn test_scenario_replace_grows_file() {
    let (_temp, mut container) = open_scenario();
    let file_size = container.header().file_size;

    // Twelve free blocks are not enough for thirteen blocks of data
    let data = record_bytes(9, 13 * PAYLOAD as usize);
    container.replace(SCENARIO_KEY, &data).unwrap();

    assert_eq!(container.header().file_size, file_size + 1024 * 1024);
    assert_eq!(container.read(SCENARIO_KEY).unwrap().unwrap(), data);
    assert!(container.check().unwrap().is_clean());
}

#[test]
fn test_scenario_replace_persists() {
    let (_temp, mut container) = open_scenario();
    let path = container.path().to_path_buf();

    container.replace(SCENARIO_KEY, b"persisted").unwrap();
    let header = *container.header();
    container.close().unwrap();

    let mut container = Container::open_path(&path).unwrap();
    assert_eq!(*container.header(), header);
    assert_eq!(container.read(SCENARIO_KEY).unwrap().unwrap(), b"persisted");
}

#[test]
fn test_replace_missing_key() {
    let (_temp, mut container) = open_scenario();
    let header = *container.header();

    let result = container.replace(0x4200_0000, b"nothing");
    assert!(matches!(result, Err(DatError::KeyNotFound(0x4200_0000))));
    assert_eq!(*container.header(), header);
}

#[test]
fn test_replace_stage_names() {
    assert_eq!(ReplaceStage::DataWritten.to_string(), "data written");
    assert_eq!(ReplaceStage::OldFreed.to_string(), "old chain freed");
}

#[test]
fn test_repeated_replace_keeps_chains_disjoint() {
    let (_temp, mut container) = create_container();
    let mut rng = StdRng::seed_from_u64(0xB10C);

    for key in 0..8u32 {
        container.insert(key, &record_bytes(key, 100)).unwrap();
    }

    let mut latest: Vec<Vec<u8>> = (0..8u32).map(|key| record_bytes(key, 100)).collect();
    for step in 0..300u32 {
        let key = rng.gen_range(0..8u32);
        let data = record_bytes(step, rng.gen_range(0..4000usize));
        container.replace(key, &data).unwrap();
        latest[key as usize] = data;
    }

    let report = container.check().unwrap();
    assert_eq!(report.records, 8);
    assert!(report.is_clean());
    for key in 0..8u32 {
        assert_eq!(container.read(key).unwrap().unwrap(), latest[key as usize]);
    }
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_drop_flushes_header() {
    let (_temp, path) = setup_temp_dir();
    {
        let mut container = Container::create(small_config(&path)).unwrap();
        container.insert(0x10, b"kept").unwrap();
        assert!(container.blocks().is_dirty());
    }

    let mut container = Container::open(small_config(&path)).unwrap();
    assert_eq!(container.read(0x10).unwrap().unwrap(), b"kept");
    assert!(container.check().unwrap().is_clean());
}

#[test]
fn test_flush_clears_dirty() {
    let (_temp, mut container) = create_container();
    container.insert(1, b"a").unwrap();

    container.flush().unwrap();
    assert!(!container.blocks().is_dirty());
}

// =============================================================================
// Data Version Tests
// =============================================================================

#[test]
fn test_data_version() {
    let (_temp, mut container) = create_container();
    assert_eq!(container.data_version().unwrap(), None);

    let mut record = 7u32.to_le_bytes().to_vec();
    record.extend_from_slice(b"trailing");
    container.insert(VERSION_RECORD, &record).unwrap();
    assert_eq!(container.data_version().unwrap(), Some(7));

    container.replace(VERSION_RECORD, &9u32.to_le_bytes()).unwrap();
    assert_eq!(container.data_version().unwrap(), Some(9));

    container.remove(VERSION_RECORD).unwrap();
    assert_eq!(container.data_version().unwrap(), None);
}

#[test]
fn test_data_version_too_short() {
    let (_temp, mut container) = create_container();
    container.insert(VERSION_RECORD, &[1, 2]).unwrap();

    let result = container.data_version();
    assert!(matches!(result, Err(DatError::TruncatedData { expected: 4, .. })));
}

// =============================================================================
// Check Tests
// =============================================================================

#[test]
fn test_check_reports_leaked_chain() {
    let (_temp, mut container) = create_container();

    // Written but never indexed, as after an interrupted replacement
    let orphan = container.blocks().allocate_chain(&[1; 10]).unwrap();

    let report = container.check().unwrap();
    assert_eq!(report.leaked_blocks, vec![orphan.head]);
    assert!(!report.is_clean());
}

#[test]
fn test_check_detects_shared_block() {
    let (_temp, mut container) = create_container();
    container.insert(1, b"one").unwrap();
    container.insert(2, b"two").unwrap();

    // Point record 2 at record 1's block
    let mut located = container.locate(2).unwrap().unwrap();
    located.entry_mut().offset = container.lookup(1).unwrap().unwrap().offset;
    located.node.store(container.blocks()).unwrap();

    let result = container.check();
    assert!(matches!(result, Err(DatError::Inconsistent(_))));
}

#[test]
fn test_check_detects_free_list_overcount() {
    let (_temp, path) = setup_temp_dir();
    common::write_scenario(&path, 0);
    // Header claims thirteen free blocks, the list has twelve
    common::patch_u32(&path, 0x12c + 28, 13);

    let mut container = Container::open(Config::builder().path(&path).build()).unwrap();
    let result = container.check();
    assert!(matches!(result, Err(DatError::Inconsistent(_))));
}

#[test]
fn test_entry_display() {
    let (_temp, mut container) = open_scenario();
    let entry = container.lookup(SCENARIO_KEY).unwrap().unwrap();

    let line = entry.to_string();
    assert!(line.starts_with("identifier: 41000000, offset: 00000800, size: 00000064"));
}

// =============================================================================
// Shared Container Tests
// =============================================================================

#[test]
fn test_shared_container_threads() {
    let (_temp, mut container) = create_container();
    for key in 0..8u32 {
        container.insert(key, b"initial").unwrap();
    }

    let shared = SharedContainer::new(container);
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                for round in 0..50u32 {
                    for key in [t * 2, t * 2 + 1] {
                        let data = record_bytes(key * 1000 + round, 300 + round as usize * 20);
                        shared.replace(key, &data).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..8u32 {
        let expected = record_bytes(key * 1000 + 49, 300 + 49 * 20);
        assert_eq!(shared.read(key).unwrap().unwrap(), expected);
    }
    assert!(shared.check().unwrap().is_clean());

    let container = shared.into_inner().unwrap();
    container.close().unwrap();
}

#[test]
fn test_shared_container_batch() {
    let (_temp, container) = create_container();
    let shared = SharedContainer::new(container);

    let count = shared.with(|c| {
        c.insert(1, b"a")?;
        c.insert(2, b"b")?;
        c.entries().map(|entries| entries.len())
    });

    assert_eq!(count.unwrap(), 2);
    assert!(shared.lookup(2).unwrap().is_some());
}
