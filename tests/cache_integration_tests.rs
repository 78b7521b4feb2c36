//! Integration tests for the tiered cache
//!
//! These tests verify the complete cache behaviour including:
//! - Capacity and expiry invariants
//! - LRU eviction order
//! - Promotion from disk to memory
//! - Tag-scoped clears and idempotent deletes
//! - Index rebuild across restarts

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tiered_cache::{
    CacheConfig, CacheError, CacheKeyBuilder, CacheValue, DiskStartup, SetOptions, TieredCache,
};

/// A JSON string value whose serialized form is exactly `n` bytes
fn payload(n: usize) -> CacheValue {
    json!("v".repeat(n - 2))
}

fn config(tmp: &TempDir, memory_capacity: usize) -> CacheConfig {
    CacheConfig::builder()
        .memory_capacity_bytes(memory_capacity)
        .default_ttl(Duration::from_secs(300))
        .disk_dir(tmp.path())
        .build()
}

#[tokio::test]
async fn test_basic_cache_operations() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    cache
        .set("key1", json!("value1"), SetOptions::default())
        .await
        .unwrap();

    assert_eq!(cache.get("key1").await, Some(json!("value1")));

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.memory_entries, 1);
    assert_eq!(stats.memory_size_bytes, 8);
}

#[tokio::test]
async fn test_capacity_invariant_holds_for_random_writes() {
    let tmp = TempDir::new().unwrap();
    let capacity = 1_000;
    let cache = TieredCache::new(
        CacheConfig::builder()
            .memory_capacity_bytes(capacity)
            .disk_dir(tmp.path())
            .write_through(false)
            .build(),
    )
    .await
    .unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..300 {
        let key = format!("k{}", rng.gen_range(0..60));
        let size = rng.gen_range(2..400);
        cache
            .set(key, payload(size), SetOptions::default())
            .await
            .unwrap();

        if i % 7 == 0 {
            let lookup = format!("k{}", rng.gen_range(0..60));
            cache.get(&lookup).await;
        }

        assert!(cache.memory().size_bytes().await <= capacity);
    }

    let stats = cache.stats().await;
    assert!(stats.evictions > 0);
    assert!(stats.memory_utilization_percent <= 100.0);
}

#[tokio::test]
async fn test_expired_entries_never_returned() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    for i in 0..10 {
        cache
            .set(
                format!("short:{}", i),
                json!(i),
                SetOptions::new().ttl(Duration::from_millis(50)),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    for i in 0..10 {
        assert_eq!(cache.get(&format!("short:{}", i)).await, None);
    }
    assert_eq!(cache.stats().await.misses, 10);
}

#[tokio::test]
async fn test_weather_entry_expires_after_one_second() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    cache
        .set(
            "city:paris:weather",
            payload(50),
            SetOptions::new().ttl(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    let misses_before = cache.stats().await.misses;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let value = cache.get_or("city:paris:weather", json!("default")).await;
    assert_eq!(value, json!("default"));
    assert_eq!(cache.stats().await.misses, misses_before + 1);
}

#[tokio::test]
async fn test_lru_evicts_least_recently_accessed() {
    let tmp = TempDir::new().unwrap();
    let n = 5;
    let cache = TieredCache::new(config(&tmp, n * 20)).await.unwrap();

    for i in 0..n {
        cache
            .set(format!("k{}", i), payload(20), SetOptions::default())
            .await
            .unwrap();
    }

    // k0 is the oldest insert, but re-reading it delays its eviction
    assert!(cache.get("k0").await.is_some());

    cache
        .set("extra", payload(20), SetOptions::default())
        .await
        .unwrap();

    assert!(cache.memory().contains("k0").await);
    assert!(!cache.memory().contains("k1").await);
    for i in 2..n {
        assert!(cache.memory().contains(&format!("k{}", i)).await);
    }
    assert_eq!(cache.stats().await.evictions, 1);
}

#[tokio::test]
async fn test_refreshed_key_survives_when_three_entries_fit() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 120)).await.unwrap();

    for key in ["x", "y", "z"] {
        cache.set(key, payload(40), SetOptions::default()).await.unwrap();
    }
    assert!(cache.get("x").await.is_some());

    cache.set("w", payload(40), SetOptions::default()).await.unwrap();

    assert!(cache.memory().contains("x").await);
    assert!(!cache.memory().contains("y").await);
    assert!(cache.memory().contains("z").await);
    assert!(cache.memory().contains("w").await);
}

#[tokio::test]
async fn test_refreshed_key_survives_at_100_bytes() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 100)).await.unwrap();

    // only two 40-byte entries fit: z pushes x out of memory (x stays on disk)
    for key in ["x", "y", "z"] {
        cache.set(key, payload(40), SetOptions::default()).await.unwrap();
    }
    assert!(!cache.memory().contains("x").await);

    // reading x brings it back into memory, making y the least recently touched
    assert_eq!(cache.get("x").await, Some(payload(40)));

    cache.set("w", payload(40), SetOptions::default()).await.unwrap();

    assert!(cache.memory().contains("x").await);
    assert!(!cache.memory().contains("y").await);
    assert!(cache.memory().contains("w").await);
    assert!(cache.memory().size_bytes().await <= 100);
}

#[tokio::test]
async fn test_promotion_after_eviction() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 40)).await.unwrap();

    cache.set("a", payload(20), SetOptions::default()).await.unwrap();
    cache.set("b", payload(20), SetOptions::default()).await.unwrap();
    cache.set("c", payload(20), SetOptions::default()).await.unwrap();
    assert!(!cache.memory().contains("a").await);
    assert!(cache.disk().contains("a").await);

    let before = cache.stats().await;
    assert_eq!(cache.get("a").await, Some(payload(20)));
    let after_first = cache.stats().await;
    assert_eq!(after_first.disk_hits, before.disk_hits + 1);
    assert_eq!(after_first.memory_hits, before.memory_hits);

    assert_eq!(cache.get("a").await, Some(payload(20)));
    let after_second = cache.stats().await;
    assert_eq!(after_second.memory_hits, after_first.memory_hits + 1);
    assert_eq!(after_second.disk_hits, after_first.disk_hits);
}

#[tokio::test]
async fn test_promotion_after_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();
        cache
            .set(
                "hotels:lisbon",
                json!({ "rooms": 3 }),
                SetOptions::new().tag("source:hotels"),
            )
            .await
            .unwrap();
    }

    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();
    assert!(cache.memory().is_empty().await);
    assert_eq!(cache.stats().await.disk_entries, 1);

    assert_eq!(cache.get("hotels:lisbon").await, Some(json!({ "rooms": 3 })));
    assert_eq!(cache.get("hotels:lisbon").await, Some(json!({ "rooms": 3 })));

    let stats = cache.stats().await;
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.memory_hits, 1);

    // tags survive the round trip through disk and promotion
    assert_eq!(cache.clear(&["source:hotels".to_string()]).await, 1);
    assert!(!cache.contains("hotels:lisbon").await);
}

#[tokio::test]
async fn test_wipe_on_startup_discards_previous_entries() {
    let tmp = TempDir::new().unwrap();
    {
        let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();
        cache.set("k", json!(1), SetOptions::default()).await.unwrap();
    }

    let mut wipe = config(&tmp, 4096);
    wipe.disk_startup = DiskStartup::Wipe;
    let cache = TieredCache::new(wipe).await.unwrap();

    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.stats().await.disk_entries, 0);
}

#[tokio::test]
async fn test_tag_scoped_clear() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    cache
        .set("only_a", json!(1), SetOptions::new().tag("a"))
        .await
        .unwrap();
    cache
        .set("only_b", json!(2), SetOptions::new().tag("b"))
        .await
        .unwrap();
    cache
        .set("both", json!(3), SetOptions::new().tags(["a", "b"]))
        .await
        .unwrap();

    assert_eq!(cache.clear(&["a".to_string()]).await, 2);

    assert_eq!(cache.get("only_a").await, None);
    assert_eq!(cache.get("both").await, None);
    assert_eq!(cache.get("only_b").await, Some(json!(2)));
    assert!(!cache.disk().contains("only_a").await);
    assert!(cache.disk().contains("only_b").await);
}

#[tokio::test]
async fn test_clear_without_tags_removes_everything() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    for i in 0..4 {
        cache
            .set(format!("k{}", i), json!(i), SetOptions::default())
            .await
            .unwrap();
    }
    // one entry on disk only
    cache.set("big", payload(5000), SetOptions::default()).await.unwrap();

    assert_eq!(cache.clear(&[]).await, 5);
    let stats = cache.stats().await;
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.disk_entries, 0);
}

#[tokio::test]
async fn test_idempotent_delete() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    assert!(!cache.delete("nothing-here").await);
    assert!(!cache.delete("nothing-here").await);

    cache.set("k", json!(1), SetOptions::default()).await.unwrap();
    assert!(cache.delete("k").await);
    assert!(!cache.delete("k").await);
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn test_large_value_falls_back_to_disk() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 64)).await.unwrap();

    tokio_test::assert_ok!(cache.set("report", payload(1000), SetOptions::default()).await);

    assert!(!cache.memory().contains("report").await);
    assert_eq!(cache.get("report").await, Some(payload(1000)));
    assert_eq!(cache.stats().await.disk_hits, 1);
}

#[tokio::test]
async fn test_write_rejected_when_no_tier_fits() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 64)).await.unwrap();

    // remove the storage directory out from under the disk tier
    std::fs::remove_dir_all(tmp.path()).unwrap();

    let err = cache
        .set("report", payload(1000), SetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Rejected { .. }));
    assert_eq!(cache.get("report").await, None);
}

#[tokio::test]
async fn test_zero_ttl_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    let result = cache
        .set("k", json!(1), SetOptions::new().ttl(Duration::ZERO))
        .await;
    assert!(matches!(result, Err(CacheError::InvalidTtl { .. })));
}

#[tokio::test]
async fn test_overwrite_is_last_writer_wins() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    let key = CacheKeyBuilder::new("weather")
        .identifier("paris")
        .param("units", "metric")
        .build();

    cache.set(key.as_str(), json!(17), SetOptions::default()).await.unwrap();
    cache.set(key.as_str(), json!(19), SetOptions::default()).await.unwrap();

    assert_eq!(cache.get(&key).await, Some(json!(19)));
    let on_disk = cache.disk().get(&key).await.unwrap().unwrap();
    assert_eq!(on_disk.value, json!(19));
}

#[tokio::test]
async fn test_stats_hit_rate() {
    let tmp = TempDir::new().unwrap();
    let cache = TieredCache::new(config(&tmp, 4096)).await.unwrap();

    assert_eq!(cache.stats().await.hit_rate, 0.0);

    cache.set("k1", json!(1), SetOptions::default()).await.unwrap();
    cache.get("k1").await;
    cache.get("k1").await;
    cache.get("k1").await;
    cache.get("missing").await;

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.75);
    assert!(stats.disk_reads >= 1);
    assert_eq!(stats.disk_writes, 1);
    assert!(stats.memory_utilization_percent > 0.0);
}
