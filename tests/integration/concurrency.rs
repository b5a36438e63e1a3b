#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use strata::{Config, HybridMap, MemoryStore, Result};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn concurrent_writers_land_every_key() -> Result<()> {
    init_tracing();
    let map = Arc::new(HybridMap::create(
        Arc::new(MemoryStore::new()),
        Config::default(),
    )?);

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || -> Result<()> {
                for i in 0..250u32 {
                    let key = format!("writer-{t}-key-{i}");
                    map.put(key.as_bytes(), format!("{t}:{i}").as_bytes())?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in threads {
        handle.join().expect("writer thread")?;
    }

    assert_eq!(map.len(), 8 * 250);
    for t in 0..8 {
        for i in 0..250u32 {
            let key = format!("writer-{t}-key-{i}");
            assert_eq!(
                map.get(key.as_bytes())?.expect("present"),
                format!("{t}:{i}").as_bytes()
            );
        }
    }
    assert_eq!(map.verify_count()?, map.len());
    Ok(())
}

#[test]
fn readers_run_alongside_writers() -> Result<()> {
    let map = Arc::new(HybridMap::create(
        Arc::new(MemoryStore::new()),
        Config::default(),
    )?);
    for i in 0..500u32 {
        map.put(format!("stable-{i}").as_bytes(), b"baseline")?;
    }

    let writer = {
        let map = Arc::clone(&map);
        thread::spawn(move || -> Result<()> {
            for i in 0..500u32 {
                map.put(format!("churn-{i}").as_bytes(), b"new")?;
            }
            Ok(())
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || -> Result<()> {
                for i in 0..500u32 {
                    let value = map.get(format!("stable-{i}").as_bytes())?;
                    assert_eq!(value.expect("stable key present"), b"baseline");
                }
                Ok(())
            })
        })
        .collect();

    writer.join().expect("writer thread")?;
    for handle in readers {
        handle.join().expect("reader thread")?;
    }
    assert_eq!(map.len(), 1_000);
    Ok(())
}

#[test]
fn same_key_updates_serialize_to_one_entry() -> Result<()> {
    let map = Arc::new(HybridMap::create(
        Arc::new(MemoryStore::new()),
        Config::default(),
    )?);

    let threads: Vec<_> = (0..6)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || -> Result<()> {
                for _ in 0..100 {
                    map.put(b"contended", format!("writer-{t}").as_bytes())?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in threads {
        handle.join().expect("thread")?;
    }

    assert_eq!(map.len(), 1, "600 upserts of one key leave one entry");
    let value = map.get(b"contended")?.expect("present");
    assert!(value.starts_with(b"writer-"));
    Ok(())
}

#[test]
fn concurrent_removals_each_claim_distinct_keys() -> Result<()> {
    let map = Arc::new(HybridMap::create(
        Arc::new(MemoryStore::new()),
        Config::default(),
    )?);
    for i in 0..400u32 {
        map.put(format!("victim-{i}").as_bytes(), b"v")?;
    }

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || -> Result<u32> {
                let mut removed = 0;
                // Overlapping ranges: every key targeted by two threads.
                for i in (t * 50)..(t * 50 + 250) {
                    if map.remove(format!("victim-{}", i % 400).as_bytes())? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
        })
        .collect();
    let mut total_removed = 0;
    for handle in threads {
        total_removed += handle.join().expect("thread")?;
    }

    // Each key is removed exactly once no matter how many threads tried.
    assert_eq!(u64::from(total_removed) + map.len(), 400);
    assert_eq!(map.verify_count()?, map.len());
    Ok(())
}
