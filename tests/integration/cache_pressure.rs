#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use strata::cache::PressureCache;
use strata::{Config, HybridMap, MemoryStore, Position, Result};

#[test]
fn inserts_below_low_watermark_keep_everything() {
    let cache: PressureCache<Vec<u8>> = PressureCache::new(10_000);
    for i in 0..60u64 {
        cache.insert(Position(i + 1), vec![0u8; 100], 100);
    }
    assert_eq!(cache.len(), 60);
    assert_eq!(cache.evictions(), 0);
}

#[test]
fn sustained_pressure_triggers_background_eviction() {
    let cache: PressureCache<Vec<u8>> = PressureCache::new(100_000);
    // Fill to the low watermark with small entries.
    for i in 0..160u64 {
        cache.insert(Position(i + 1), vec![0u8; 500], 500);
    }
    // Large inserts outpace the inline one-entry eviction, so usage
    // climbs into the 70-90% band and each insert notifies the evictor.
    for i in 0..12u64 {
        cache.insert(Position(1_000 + i), vec![0u8; 1_500], 1_500);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cache.used_bytes() <= 70_000 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(
        cache.used_bytes() <= 70_000,
        "background evictor should drain back to the low watermark, still at {}",
        cache.used_bytes()
    );
    assert!(cache.evictions() > 0);
}

#[test]
fn high_watermark_clears_the_cache() {
    let cache: PressureCache<Vec<u8>> = PressureCache::new(10_000);
    for i in 0..6u64 {
        cache.insert(Position(i + 1), vec![0u8; 1_000], 1_000);
    }
    cache.insert(Position(99), vec![0u8; 4_000], 4_000);
    assert_eq!(cache.len(), 1, "only the triggering entry survives");
    assert!(cache.get(Position(99)).is_some());
}

#[test]
fn tiny_value_budget_never_affects_results() -> Result<()> {
    let config = Config {
        // Budget small enough that every value insert churns the cache.
        value_cache_budget: 256,
        ..Config::default()
    };
    let map = HybridMap::create(Arc::new(MemoryStore::new()), config)?;
    for i in 0..200u32 {
        map.put(format!("k{i}").as_bytes(), format!("value-{i}").as_bytes())?;
    }
    for i in 0..200u32 {
        assert_eq!(
            map.get(format!("k{i}").as_bytes())?.expect("present"),
            format!("value-{i}").as_bytes()
        );
    }
    Ok(())
}

#[test]
fn eviction_is_invisible_through_the_map() -> Result<()> {
    let map = HybridMap::create(Arc::new(MemoryStore::new()), Config::default())?;
    for i in 0..100u32 {
        map.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    let before: Vec<_> = (0..100u32)
        .map(|i| map.get(format!("k{i}").as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    map.clear_caches();

    let after: Vec<_> = (0..100u32)
        .map(|i| map.get(format!("k{i}").as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(before, after, "cache state must never change results");
    Ok(())
}
