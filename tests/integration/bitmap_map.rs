#![allow(missing_docs)]

use std::sync::Arc;

use strata::{BitmapMap, Config, FileStore, MemoryStore, Position, Result};
use tempfile::tempdir;

#[test]
fn round_trip_over_file_store() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileStore::open(dir.path().join("index.db"))?);
    let map = BitmapMap::create(store, Config::default())?;

    for i in 0..250u32 {
        map.put(format!("entity:{i}").as_bytes(), format!("{i}").as_bytes())?;
    }
    assert_eq!(map.len(), 250);
    for i in 0..250u32 {
        assert_eq!(
            map.get(format!("entity:{i}").as_bytes())?.expect("present"),
            format!("{i}").as_bytes()
        );
    }
    Ok(())
}

#[test]
fn update_and_delete_maintain_count() -> Result<()> {
    let map = BitmapMap::create(Arc::new(MemoryStore::new()), Config::default())?;
    map.put(b"a", b"1")?;
    map.put(b"b", b"2")?;
    map.put(b"a", b"replacement")?;
    assert_eq!(map.len(), 2, "update must not change count");

    assert!(map.remove(b"a")?);
    assert_eq!(map.len(), 1);
    assert!(map.get(b"a")?.is_none());
    assert!(!map.remove(b"a")?, "second remove misses");
    assert_eq!(map.len(), 1);
    Ok(())
}

#[test]
fn deep_chains_under_shallow_load_factor() -> Result<()> {
    // One radix level: ten buckets, so 500 keys force long chains.
    let map = BitmapMap::create(Arc::new(MemoryStore::new()), Config::shallow())?;
    for i in 0..500u32 {
        map.put(format!("key-{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    for i in (0..500u32).step_by(7) {
        assert!(map.remove(format!("key-{i}").as_bytes())?);
    }
    for i in 0..500u32 {
        let expected = i % 7 != 0;
        assert_eq!(map.contains_key(format!("key-{i}").as_bytes())?, expected);
    }
    Ok(())
}

#[test]
fn map_persists_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("index.db");
    let header_position;

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = BitmapMap::create(store, Config::default())?;
        header_position = map.header_position();
        for i in 0..100u32 {
            map.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        map.remove(b"k42")?;
        map.flush()?;
    }

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = BitmapMap::open(store, header_position, Config::default())?;
        assert_eq!(map.len(), 99);
        assert!(map.get(b"k42")?.is_none());
        for i in 0..100u32 {
            if i == 42 {
                continue;
            }
            assert_eq!(
                map.get(format!("k{i}").as_bytes())?.expect("present"),
                format!("v{i}").as_bytes()
            );
        }
    }
    Ok(())
}

#[test]
fn opening_garbage_header_position_fails() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileStore::open(dir.path().join("index.db"))?);
    let map = BitmapMap::create(store.clone(), Config::default())?;
    map.put(b"k", b"v")?;

    let err = BitmapMap::open(store, Position(999_999), Config::default())
        .expect_err("out-of-arena header must fail");
    assert!(matches!(err, strata::StrataError::Corruption(_)));
    Ok(())
}
