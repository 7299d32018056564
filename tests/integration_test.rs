use anyhow::Result;
use pagedb::access::{BPlusTree, DataType, RowId, Value};
use pagedb::database::{ReplacerKind, StorageConfig, StorageEngine};
use pagedb::storage::buffer::lru::LruReplacer;
use pagedb::storage::{BufferPoolManager, DiskManager, PageId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use tempfile::tempdir;

fn row_id(k: i32) -> RowId {
    RowId::new(PageId(k as u32), k as u32 % 7)
}

fn insert(index: &mut BPlusTree, k: i32) -> Result<bool> {
    let key = index.key_manager().serialize(&[Value::Int32(k)])?;
    index.insert(&key, row_id(k))
}

fn remove(index: &mut BPlusTree, k: i32) -> Result<bool> {
    let key = index.key_manager().serialize(&[Value::Int32(k)])?;
    index.remove(&key)
}

fn lookup(index: &BPlusTree, k: i32) -> Result<Option<RowId>> {
    let key = index.key_manager().serialize(&[Value::Int32(k)])?;
    index.get_value(&key)
}

fn scan(index: &BPlusTree) -> Result<Vec<i32>> {
    let mut keys = Vec::new();
    for entry in index.iter()? {
        let (key, _) = entry?;
        match index.key_manager().deserialize(key.data())?.first() {
            Some(Value::Int32(k)) => keys.push(*k),
            other => panic!("unexpected key column {:?}", other),
        }
    }
    Ok(keys)
}

#[test]
fn test_leaf_split_creates_internal_root() -> Result<()> {
    let dir = tempdir()?;
    let config = StorageConfig {
        leaf_max_size: Some(4),
        ..StorageConfig::default()
    };
    let engine = StorageEngine::create(&dir.path().join("split.db"), config)?;
    let mut index = engine.create_index(vec![DataType::Int32])?;

    for k in 1..=4 {
        assert!(insert(&mut index, k)?);
    }
    assert_eq!(index.height()?, 1);

    assert!(insert(&mut index, 5)?);
    assert_eq!(index.height()?, 2);
    assert_eq!(lookup(&index, 3)?, Some(row_id(3)));
    assert_eq!(lookup(&index, 9)?, None);

    // Left leaf keeps {1, 2}, the new right leaf holds {3, 4, 5}.
    let first_leaf = index.begin()?.page_id();
    let key = index.key_manager().serialize(&[Value::Int32(2)])?;
    assert_eq!(index.begin_at(&key)?.page_id(), first_leaf);
    let key = index.key_manager().serialize(&[Value::Int32(3)])?;
    let right = index.begin_at(&key)?;
    assert_ne!(right.page_id(), first_leaf);
    assert_eq!(right.slot(), 0);
    drop(right);

    assert_eq!(scan(&index)?, vec![1, 2, 3, 4, 5]);
    index.check_integrity()?;
    drop(index);
    engine.close()?;
    Ok(())
}

#[test]
fn test_lru_evicts_only_unpinned_frame() -> Result<()> {
    let dir = tempdir()?;
    let disk_manager = DiskManager::create(&dir.path().join("lru.db"))?;
    let buffer_pool = BufferPoolManager::new(disk_manager, Box::new(LruReplacer::new(2)), 2);

    let mut page_ids = Vec::new();
    for _ in 0..3 {
        let (page_id, _guard) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }
    let (a, b, c) = (page_ids[0], page_ids[1], page_ids[2]);

    let guard_a = buffer_pool.fetch_page(a)?;
    let _guard_b = buffer_pool.fetch_page(b)?;
    drop(guard_a);

    let _guard_c = buffer_pool.fetch_page(c)?;
    assert!(!buffer_pool.is_resident(a));
    assert!(buffer_pool.is_resident(b));
    assert!(buffer_pool.is_resident(c));
    Ok(())
}

#[test]
fn test_freed_page_is_reused_first() -> Result<()> {
    let dir = tempdir()?;
    let mut disk_manager = DiskManager::create(&dir.path().join("alloc.db"))?;

    let first = disk_manager.allocate_page()?;
    let second = disk_manager.allocate_page()?;
    let third = disk_manager.allocate_page()?;
    assert_eq!((first, second, third), (PageId(0), PageId(1), PageId(2)));

    assert!(disk_manager.deallocate_page(second)?);
    assert_eq!(disk_manager.allocate_page()?, second);
    assert_eq!(disk_manager.allocate_page()?, PageId(3));
    disk_manager.verify_consistency()?;
    Ok(())
}

#[test]
fn test_index_persists_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("persist.db");
    let config = StorageConfig {
        pool_size: 10,
        replacer: ReplacerKind::Clock,
        leaf_max_size: Some(8),
        internal_max_size: Some(6),
    };

    let index_id = {
        let engine = StorageEngine::create(&db_path, config.clone())?;
        let mut index = engine.create_index(vec![DataType::Int32])?;
        for k in (0..500).rev() {
            assert!(insert(&mut index, k)?);
        }
        for k in (0..500).step_by(3) {
            assert!(remove(&mut index, k)?);
        }
        let id = index.index_id();
        drop(index);
        engine.close()?;
        id
    };

    let engine = StorageEngine::open(&db_path, config)?;
    let index = engine.open_index(index_id)?;
    index.check_integrity()?;

    let expected: Vec<i32> = (0..500).filter(|k| k % 3 != 0).collect();
    assert_eq!(scan(&index)?, expected);
    assert_eq!(lookup(&index, 3)?, None);
    assert_eq!(lookup(&index, 4)?, Some(row_id(4)));
    Ok(())
}

#[test]
fn test_randomized_workload() -> Result<()> {
    let dir = tempdir()?;
    let config = StorageConfig {
        pool_size: 16,
        replacer: ReplacerKind::Lru,
        leaf_max_size: Some(6),
        internal_max_size: Some(5),
    };
    let engine = StorageEngine::create(&dir.path().join("random.db"), config)?;
    let mut index = engine.create_index(vec![DataType::Int32])?;
    let mut rng = StdRng::seed_from_u64(7);
    let mut present = BTreeSet::new();

    for round in 0..4 {
        let mut batch: Vec<i32> = (0..800).collect();
        batch.shuffle(&mut rng);
        for &k in &batch[..400] {
            assert_eq!(insert(&mut index, k)?, present.insert(k));
        }

        for _ in 0..300 {
            let k = rng.gen_range(0..800);
            assert_eq!(remove(&mut index, k)?, present.remove(&k), "round {}", round);
        }

        index.check_integrity()?;
        assert!(engine.buffer_pool().check_all_unpinned());
        assert_eq!(scan(&index)?, present.iter().copied().collect::<Vec<_>>());
    }

    for k in 0..800 {
        let expected = present.contains(&k).then(|| row_id(k));
        assert_eq!(lookup(&index, k)?, expected);
    }

    let remaining: Vec<i32> = present.iter().copied().collect();
    for k in remaining {
        assert!(remove(&mut index, k)?);
    }
    assert!(index.is_empty());
    assert!(index.iter()?.next().is_none());

    engine.flush()?;
    engine
        .buffer_pool()
        .with_disk_manager(|dm| dm.verify_consistency())?;
    // Catalog, index roots and the index metadata page.
    assert_eq!(
        engine
            .buffer_pool()
            .with_disk_manager(|dm| dm.allocated_pages()),
        3
    );
    drop(index);
    engine.close()?;
    Ok(())
}
