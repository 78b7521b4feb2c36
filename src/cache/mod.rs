//! # Tiered Caching Layer
//!
//! A key/value cache spanning a bounded in-memory tier and a larger
//! persistent disk tier.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: every entry expires `ttl` after it was written;
//!   expired entries are never returned, even before reclamation runs
//! - **LRU Eviction**: the memory tier evicts least recently used entries to
//!   stay within its byte capacity
//! - **Disk Spillover**: values too large for memory, and write-through
//!   copies, live on disk; disk hits are promoted back into memory
//! - **Tag Invalidation**: `clear(tags)` removes every entry carrying a tag
//! - **Background Reclamation**: a cancellable task sweeps expired entries
//! - **Memoization**: [`Memoized`] caches the results of expensive calls
//!
//! ## Example
//!
//! ```no_run
//! use tiered_cache::cache::{CacheConfig, SetOptions, TieredCache};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .memory_capacity_bytes(100 * 1024 * 1024) // 100 MB
//!     .disk_dir("/var/cache/assistant")
//!     .build();
//!
//! let cache = TieredCache::new(config).await?;
//!
//! cache
//!     .set(
//!         "weather:paris",
//!         json!({ "temp_c": 18 }),
//!         SetOptions::new().ttl(Duration::from_secs(600)).tag("source:weather"),
//!     )
//!     .await?;
//!
//! if let Some(value) = cache.get("weather:paris").await {
//!     println!("Cache hit: {}", value);
//! }
//!
//! cache.clear(&["source:weather".to_string()]).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod disk;
pub mod entry;
pub mod keys;
mod locks;
pub mod memoize;
pub mod memory;
pub mod reclaimer;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, DiskStartup};
pub use coordinator::TieredCache;
pub use disk::{DiskTier, DiskTierStats};
pub use entry::{Annotations, CacheEntry, CacheMetadata, SetOptions};
pub use keys::CacheKeyBuilder;
pub use memoize::{memo_key, Memoized};
pub use memory::{MemoryTier, MemoryTierStats};
pub use reclaimer::{ReclaimReport, Reclaimer};
pub use types::{CacheKey, CacheStats, CacheValue, Tier};
