#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use strata::{Config, FileStore, HybridMap, MemoryStore, Result};
use tempfile::tempdir;

#[test]
fn round_trip_over_file_store() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileStore::open(dir.path().join("map.db"))?);
    let map = HybridMap::create(store, Config::default())?;

    for i in 0..300u32 {
        let key = format!("user:{i}");
        let value = format!("payload for user {i}");
        map.put(key.as_bytes(), value.as_bytes())?;
    }
    assert_eq!(map.len(), 300);

    for i in 0..300u32 {
        let key = format!("user:{i}");
        let value = map.get(key.as_bytes())?.expect("value present");
        assert_eq!(value, format!("payload for user {i}").as_bytes());
    }
    Ok(())
}

#[test]
fn update_keeps_count_and_replaces_value() -> Result<()> {
    let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::default())?;
    map.put(b"counter", b"1")?;
    map.put(b"counter", b"2")?;
    map.put(b"counter", b"a considerably longer third value")?;
    assert_eq!(map.len(), 1);
    assert_eq!(
        map.get(b"counter")?.expect("present"),
        b"a considerably longer third value"
    );
    Ok(())
}

#[test]
fn delete_then_lookup_misses() -> Result<()> {
    let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::default())?;
    for i in 0..64u32 {
        map.put(format!("k{i}").as_bytes(), b"v")?;
    }
    assert!(map.remove(b"k31")?);
    assert!(map.get(b"k31")?.is_none());
    assert!(!map.contains_key(b"k31")?);
    assert_eq!(map.len(), 63);

    assert!(!map.remove(b"never-inserted")?);
    assert_eq!(map.len(), 63, "absent-key removal must not change count");
    Ok(())
}

#[test]
fn ten_thousand_sequential_keys_range_query() -> Result<()> {
    let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::default())?;
    for i in 1..=10_000u64 {
        map.put(&i.to_be_bytes(), &i.to_le_bytes())?;
    }
    assert_eq!(map.len(), 10_000);

    let above = map.above(&5_000u64.to_be_bytes(), true)?;
    assert_eq!(above.len(), 5_001, "keys 5000..=10000");

    let below = map.below(&5_000u64.to_be_bytes(), false)?;
    assert_eq!(below.len(), 4_999, "keys 1..=4999");
    Ok(())
}

#[test]
fn iteration_ascends_within_each_bucket() -> Result<()> {
    // load_factor 1 keeps bucket count small so each bucket holds a
    // meaningful run of keys.
    let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::shallow())?;
    for i in 0..1_000u64 {
        map.put(&i.to_be_bytes(), b"v")?;
    }

    let mut total = 0usize;
    let mut previous: Option<Vec<u8>> = None;
    let mut bucket_breaks = 0usize;
    for entry in map.iter()? {
        let (key, _) = entry?;
        if let Some(ref prev) = previous {
            if *prev >= key {
                // A descending step can only happen at a bucket boundary.
                bucket_breaks += 1;
            }
        }
        previous = Some(key);
        total += 1;
    }
    assert_eq!(total, 1_000);
    assert!(
        bucket_breaks < 10,
        "at most one break per bucket boundary, saw {bucket_breaks}"
    );
    Ok(())
}

#[test]
fn load_factor_variants_agree() -> Result<()> {
    for config in [Config::shallow(), Config::default(), Config::deep()] {
        let map = HybridMap::create(Arc::new(MemoryStore::new()), config)?;
        for i in 0..200u32 {
            map.put(format!("key-{i}").as_bytes(), format!("{i}").as_bytes())?;
        }
        for i in (0..200u32).step_by(3) {
            map.remove(format!("key-{i}").as_bytes())?;
        }
        for i in 0..200u32 {
            let expected = i % 3 != 0;
            assert_eq!(map.contains_key(format!("key-{i}").as_bytes())?, expected);
        }
        assert_eq!(map.verify_count()?, map.len());
    }
    Ok(())
}

#[test]
fn compact_config_reclaims_slots() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let map = HybridMap::create(store.clone(), Config::compact())?;
    for i in 0..100u32 {
        map.put(format!("k{i}").as_bytes(), &[0u8; 1024])?;
    }
    let high_water = store.allocated_bytes();
    for i in 0..100u32 {
        map.remove(format!("k{i}").as_bytes())?;
    }
    for i in 0..100u32 {
        map.put(format!("k{i}").as_bytes(), &[1u8; 1024])?;
    }
    // Freed value slots are reused; the only growth is fresh skip nodes,
    // far below a second round of 1 KiB payloads.
    let grown = store.allocated_bytes() - high_water;
    assert!(
        grown < 100 * 512,
        "arena grew {grown} bytes despite dealloc reuse"
    );
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_ops_match_model(
        ops in prop::collection::vec(
            (
                prop::collection::vec(any::<u8>(), 1..24),
                prop::collection::vec(any::<u8>(), 0..96),
                any::<bool>(),
            ),
            1..120,
        )
    ) {
        let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::default())
            .expect("create map");
        let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

        for (key, value, is_remove) in ops {
            if is_remove {
                let removed = map.remove(&key).expect("remove");
                prop_assert_eq!(removed, model.remove(&key).is_some());
            } else {
                map.put(&key, &value).expect("put");
                model.insert(key, value);
            }
        }

        prop_assert_eq!(map.len(), model.len() as u64);
        for (key, value) in &model {
            let stored = map.get(key).expect("get").expect("present");
            prop_assert_eq!(&stored, value);
        }
    }
}
