#![allow(missing_docs)]

use std::sync::Arc;

use strata::{Config, FileStore, HybridMap, MapOptions, Result};
use tempfile::tempdir;

#[test]
fn map_survives_reopen_through_store_root() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("strata.db");

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = HybridMap::open_or_create(store, Config::default())?;
        for i in 0..500u32 {
            map.put(format!("key-{i}").as_bytes(), format!("value-{i}").as_bytes())?;
        }
        map.remove(b"key-123")?;
        map.flush()?;
    }

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = HybridMap::open_or_create(store, Config::default())?;
        assert_eq!(map.len(), 499);
        assert!(map.get(b"key-123")?.is_none());
        for i in 0..500u32 {
            if i == 123 {
                continue;
            }
            assert_eq!(
                map.get(format!("key-{i}").as_bytes())?.expect("present"),
                format!("value-{i}").as_bytes()
            );
        }
        assert_eq!(map.verify_count()?, 499);
    }
    Ok(())
}

#[test]
fn reopen_without_flush_still_finds_structure() -> Result<()> {
    // Every structural mutation writes the map header eagerly, so the
    // index survives even when the superblock flush never happened.
    let dir = tempdir()?;
    let path = dir.path().join("strata.db");
    let header_position;

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = HybridMap::create(store, Config::default())?;
        header_position = map.header_position();
        for i in 0..50u32 {
            map.put(format!("k{i}").as_bytes(), b"v")?;
        }
        // No flush: superblock allocation tail is stale on disk.
    }

    {
        let store = Arc::new(FileStore::open(&path)?);
        let map = HybridMap::open(store, header_position, Config::default())?;
        assert_eq!(map.verify_count()?, 50);
        for i in 0..50u32 {
            assert!(map.contains_key(format!("k{i}").as_bytes())?);
        }
    }
    Ok(())
}

#[test]
fn seeded_maps_reproduce_identical_structure() -> Result<()> {
    let dir = tempdir()?;
    let build = |name: &str| -> Result<Vec<Vec<u8>>> {
        let store = Arc::new(FileStore::open(dir.path().join(name))?);
        let options = MapOptions {
            rng_seed: Some(0xDECAF),
            ..MapOptions::default()
        };
        let map = HybridMap::create_with_options(store, Config::default(), options)?;
        for i in 0..200u32 {
            map.put(format!("k{i}").as_bytes(), format!("{i}").as_bytes())?;
        }
        map.iter()?
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<Vec<_>>>()
    };

    let first = build("a.db")?;
    let second = build("b.db")?;
    assert_eq!(first, second, "same seed and inserts, same layout");
    Ok(())
}

#[test]
fn mmap_and_plain_reads_agree() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("strata.db");

    {
        let store = Arc::new(FileStore::open_with_config(&path, true)?);
        let map = HybridMap::open_or_create(store, Config::default())?;
        for i in 0..100u32 {
            map.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        map.flush()?;
    }

    {
        let store = Arc::new(FileStore::open_with_config(&path, false)?);
        let map = HybridMap::open_or_create(store, Config::default())?;
        for i in 0..100u32 {
            assert_eq!(
                map.get(format!("k{i}").as_bytes())?.expect("present"),
                format!("v{i}").as_bytes()
            );
        }
    }
    Ok(())
}
