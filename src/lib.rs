//! # Tiered Cache (tiered-cache)
//!
//! An in-process key/value cache for memoizing expensive or rate-limited
//! upstream calls (weather, flights, hotels and similar JSON APIs).
//!
//! ## Features
//!
//! - Bounded memory tier with size-aware LRU eviction
//! - Persistent disk tier with a self-healing index, rebuilt at startup
//! - Per-entry TTL and tag-based bulk invalidation
//! - Cancellable background reclamation of expired entries
//! - Hit/miss and per-tier statistics
//! - Async-first design using tokio
//!
//! ## Reading and writing
//!
//! ```no_run
//! use tiered_cache::{CacheConfig, SetOptions, TieredCache};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = TieredCache::new(CacheConfig::default()).await?;
//!
//!     cache
//!         .set(
//!             "flights:CDG-JFK",
//!             json!([{ "flight": "AF006", "price": 512 }]),
//!             SetOptions::new().ttl(Duration::from_secs(300)).tag("source:flights"),
//!         )
//!         .await?;
//!
//!     let offers = cache.get_or("flights:CDG-JFK", json!([])).await;
//!     println!("Offers: {}", offers);
//!     println!("{}", cache.stats().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Background reclamation
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiered_cache::{CacheConfig, Reclaimer, TieredCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(TieredCache::new(CacheConfig::default()).await?);
//!     let reclaimer = Reclaimer::spawn(Arc::clone(&cache));
//!
//!     // ... serve requests ...
//!
//!     reclaimer.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    memo_key, Annotations, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey,
    CacheKeyBuilder, CacheMetadata, CacheStats, CacheValue, DiskStartup, DiskTier,
    DiskTierStats, Memoized, MemoryTier, MemoryTierStats, ReclaimReport, Reclaimer, SetOptions,
    Tier, TieredCache,
};
pub use error::{CacheError, Result};
