//! The public two-tier cache
//!
//! `TieredCache` is the only type callers talk to. Reads go memory first,
//! then disk, promoting disk hits back into memory. Writes land in memory
//! and, depending on configuration, are mirrored to disk or invalidate the
//! disk copy. A value too large for memory goes to disk alone.
//!
//! Set, Delete, Clear and the miss path of Get for the same key are
//! serialized by a striped per-key lock, so a promotion can never resurrect
//! a key that a concurrent Delete or Clear removed. Memory hits take no
//! stripe lock.

use crate::cache::config::CacheConfig;
use crate::cache::disk::DiskTier;
use crate::cache::entry::{CacheEntry, SetOptions};
use crate::cache::locks::KeyLocks;
use crate::cache::memory::MemoryTier;
use crate::cache::types::{CacheKey, CacheStats, CacheValue, Tier};
use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const KEY_STRIPES: usize = 64;

/// Two-tier cache: bounded memory in front of a persistent disk tier
pub struct TieredCache {
    config: CacheConfig,
    memory: MemoryTier,
    disk: DiskTier,
    locks: KeyLocks,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    promotion_failures: AtomicU64,
}

impl TieredCache {
    /// Validate `config`, open the disk tier and build the cache
    pub async fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        info!(
            memory_capacity_bytes = config.memory_capacity_bytes,
            disk_dir = %config.disk_dir.display(),
            write_through = config.write_through,
            "initializing tiered cache"
        );

        let disk = DiskTier::open(
            config.disk_dir.clone(),
            config.disk_capacity_bytes,
            config.disk_timeout,
            config.disk_startup,
        )
        .await?;
        let memory = MemoryTier::new(config.memory_capacity_bytes, config.max_memory_entries);

        Ok(Self {
            config,
            memory,
            disk,
            locks: KeyLocks::new(KEY_STRIPES),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Direct access to the memory tier
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Direct access to the disk tier
    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    /// Look up `key` in memory, then on disk
    ///
    /// Disk errors and timeouts are logged and count as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(entry) = self.memory.get(key).await {
            return Some(self.memory_hit(key, entry));
        }

        let _guard = self.locks.lock(key).await;

        // a concurrent reader may have promoted the key while we waited
        if let Some(entry) = self.memory.get(key).await {
            return Some(self.memory_hit(key, entry));
        }

        match self.disk.get(key).await {
            Ok(Some(entry)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(tier = %Tier::Disk, key, "cache hit");
                let value = entry.value.clone();
                self.promote(entry).await;
                Some(value)
            }
            Ok(None) => {
                self.miss(key);
                None
            }
            Err(e) => {
                warn!(tier = %Tier::Disk, key, operation = "get", error = %e, "disk lookup failed, treating as miss");
                self.miss(key);
                None
            }
        }
    }

    /// `get`, falling back to `default` on a miss
    pub async fn get_or(&self, key: &str, default: CacheValue) -> CacheValue {
        self.get(key).await.unwrap_or(default)
    }

    /// `get`, deserialized into `T`
    ///
    /// A payload that does not deserialize into `T` is logged and yields
    /// `None`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, error = %e, "cached payload has unexpected shape");
                None
            }
        }
    }

    /// True if either tier holds a live entry; does not count as an access
    pub async fn contains(&self, key: &str) -> bool {
        self.memory.contains(key).await || self.disk.contains(key).await
    }

    /// Store `value` under `key`
    ///
    /// Fails on a zero TTL, and when the value fits in neither tier.
    pub async fn set(
        &self,
        key: impl Into<CacheKey>,
        value: CacheValue,
        options: SetOptions,
    ) -> Result<()> {
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.config.ttl_with_jitter());
        let entry = CacheEntry::new(key.into(), value, ttl, options.tags, options.annotations)?;

        let _guard = self.locks.lock(&entry.key).await;

        match self.memory.insert(entry.clone()).await {
            Ok(evicted) => {
                if !evicted.is_empty() {
                    debug!(key = %entry.key, evicted = evicted.len(), "memory tier evicted entries for write");
                }
                self.sync_disk_copy(&entry).await;
                Ok(())
            }
            Err(e) if e.is_capacity() => {
                debug!(key = %entry.key, "value exceeds memory capacity, storing on disk only");
                match self.disk.put(&entry).await {
                    Ok(()) => Ok(()),
                    Err(disk_err) => {
                        warn!(
                            tier = %Tier::Disk,
                            key = %entry.key,
                            operation = "set",
                            error = %disk_err,
                            "write fits in neither tier"
                        );
                        // a timed-out write may still land; this waits for it
                        // and removes it, along with any older copy
                        if let Err(cleanup) = self.disk.delete(&entry.key).await {
                            warn!(tier = %Tier::Disk, key = %entry.key, error = %cleanup, "failed to drop rejected disk copy");
                        }
                        Err(CacheError::Rejected {
                            key: entry.key.clone(),
                            reason: format!("{}; disk: {}", e, disk_err),
                        })
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Serialize `value` to JSON and store it
    pub async fn set_serialized<T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        options: SetOptions,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, options).await
    }

    /// Remove `key` from both tiers; true if either held it
    pub async fn delete(&self, key: &str) -> bool {
        let _guard = self.locks.lock(key).await;

        let in_memory = self.memory.delete(key).await;
        let on_disk = match self.disk.delete(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(tier = %Tier::Disk, key, operation = "delete", error = %e, "disk delete failed");
                false
            }
        };
        in_memory || on_disk
    }

    /// Remove everything (empty `tags`) or every entry carrying one of `tags`
    ///
    /// Returns the number of distinct keys removed across both tiers. Keys
    /// are removed one at a time under their stripe lock; the pass is not
    /// atomic with concurrent Sets of matching keys.
    pub async fn clear(&self, tags: &[String]) -> usize {
        // disk first: a promotion that drops the disk copy has already put
        // the key in memory, so one of the two snapshots sees it
        let mut candidates: HashSet<CacheKey> =
            self.disk.tagged_keys(tags).await.into_iter().collect();
        candidates.extend(self.memory.tagged_keys(tags).await);

        let mut removed = 0;
        for key in candidates {
            let _guard = self.locks.lock(&key).await;

            let in_memory = self.memory.remove_if_tagged(&key, tags).await;
            let on_disk = match self.disk.remove_if_tagged(&key, tags).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(tier = %Tier::Disk, key = %key, operation = "clear", error = %e, "disk clear failed");
                    false
                }
            };
            if in_memory || on_disk {
                removed += 1;
            }
        }

        info!(removed, tags = ?tags, "cleared cache entries");
        removed
    }

    /// Aggregate statistics snapshot
    pub async fn stats(&self) -> CacheStats {
        let memory = self.memory.stats().await;
        let disk = self.disk.stats().await;
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);

        CacheStats {
            hits,
            misses,
            hit_rate: CacheStats::compute_hit_rate(hits, misses),
            evictions: memory.evictions,
            expirations: memory.expirations,
            memory_entries: memory.entries,
            memory_size_bytes: memory.size_bytes,
            memory_utilization_percent: memory.utilization_percent(),
            disk_reads: disk.reads,
            disk_writes: disk.writes,
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            promotion_failures: self.counters.promotion_failures.load(Ordering::Relaxed),
            disk_entries: disk.entries,
            disk_size_bytes: disk.size_bytes,
        }
    }

    fn memory_hit(&self, key: &str, entry: CacheEntry) -> CacheValue {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
        debug!(tier = %Tier::Memory, key, "cache hit");
        entry.value
    }

    fn miss(&self, key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "cache miss");
    }

    /// Copy a disk hit into memory with a fresh default TTL
    ///
    /// Caller holds the key's stripe lock. Failure leaves the disk copy in
    /// place and never fails the read.
    async fn promote(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let promoted = match CacheEntry::new(
            entry.key,
            entry.value,
            self.config.ttl_with_jitter(),
            entry.tags,
            entry.annotations,
        ) {
            Ok(promoted) => promoted,
            Err(e) => {
                self.counters.promotion_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tier = %Tier::Memory, key = %key, error = %e, "promotion failed");
                return;
            }
        };

        match self.memory.insert(promoted).await {
            Ok(_) => {
                debug!(tier = %Tier::Memory, key = %key, "promoted disk entry");
                if !self.config.write_through {
                    // ownership moves to memory
                    if let Err(e) = self.disk.delete(&key).await {
                        warn!(tier = %Tier::Disk, key = %key, error = %e, "failed to drop promoted disk copy");
                    }
                }
            }
            Err(e) => {
                self.counters.promotion_failures.fetch_add(1, Ordering::Relaxed);
                debug!(tier = %Tier::Memory, key = %key, error = %e, "promotion skipped");
            }
        }
    }

    /// After a memory write: mirror it to disk, or drop the outdated disk copy
    async fn sync_disk_copy(&self, entry: &CacheEntry) {
        if self.config.write_through {
            if let Err(e) = self.disk.put(entry).await {
                warn!(tier = %Tier::Disk, key = %entry.key, operation = "set", error = %e, "write-through failed, memory copy kept");
                // an older disk copy must not outlive the new memory value
                if let Err(e) = self.disk.delete(&entry.key).await {
                    warn!(tier = %Tier::Disk, key = %entry.key, error = %e, "failed to drop outdated disk copy");
                }
            }
        } else if let Err(e) = self.disk.delete(&entry.key).await {
            warn!(tier = %Tier::Disk, key = %entry.key, error = %e, "failed to drop outdated disk copy");
        }
    }
}
