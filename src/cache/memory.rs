//! Bounded in-memory tier with size-aware LRU eviction

use crate::cache::entry::{Annotations, CacheEntry};
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Fast, size-accounted store of entries
///
/// Every operation is a single critical section over one `RwLock`. The LRU
/// order is a monotonic touch sequence: inserts and successful reads take the
/// next sequence number, so the smallest number is always the entry with the
/// oldest `accessed_at`, ties resolved by insertion (creation) order.
pub struct MemoryTier {
    capacity_bytes: usize,
    max_entries: usize,
    state: RwLock<MemoryState>,
}

struct MemoryState {
    entries: HashMap<CacheKey, Slot>,

    /// touch sequence -> key, oldest first
    lru: BTreeMap<u64, CacheKey>,

    next_tick: u64,
    current_size_bytes: usize,
    evictions: u64,
    expirations: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// Counters and gauges for the memory tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryTierStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
}

impl MemoryTierStats {
    /// Share of capacity in use, as a percentage
    pub fn utilization_percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.size_bytes as f64 / self.capacity_bytes as f64 * 100.0
        }
    }
}

impl MemoryState {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.entries.get_mut(key) {
            self.lru.remove(&slot.tick);
            slot.tick = tick;
            self.lru.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.lru.remove(&slot.tick);
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(slot.entry.metadata.size_bytes);
        Some(slot.entry)
    }

    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.lru.pop_first()?;
        let slot = self.entries.remove(&key)?;
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(slot.entry.metadata.size_bytes);
        self.evictions += 1;
        Some(slot.entry)
    }
}

impl MemoryTier {
    /// Create an empty tier bounded by `capacity_bytes` and `max_entries`
    pub fn new(capacity_bytes: usize, max_entries: usize) -> Self {
        Self {
            capacity_bytes,
            max_entries: max_entries.max(1),
            state: RwLock::new(MemoryState {
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                next_tick: 0,
                current_size_bytes: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Look up a live entry, bumping its access metadata and LRU position
    ///
    /// An expired entry is removed on the spot and reported as absent.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.write().await;

        let expired = state.entries.get(key)?.entry.is_expired();
        if expired {
            debug!(tier = "memory", key, "entry expired on lookup");
            state.remove(key);
            state.expirations += 1;
            return None;
        }

        state.touch(key);
        let slot = state.entries.get_mut(key)?;
        slot.entry.mark_accessed();
        Some(slot.entry.clone())
    }

    /// True if a live entry exists, without touching it
    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|slot| !slot.entry.is_expired())
            .unwrap_or(false)
    }

    /// Build and insert an entry, evicting LRU entries to make room
    pub async fn set(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl: Duration,
        tags: Vec<String>,
        annotations: Annotations,
    ) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl, tags, annotations)?;
        self.insert(entry).await.map(|_| ())
    }

    /// Insert a prepared entry, returning the entries evicted to fit it
    ///
    /// Any previous entry under the same key is dropped first, even when the
    /// new one is rejected, so a stale value never outlives a newer write.
    pub(crate) async fn insert(&self, entry: CacheEntry) -> Result<Vec<CacheEntry>> {
        let size = entry.metadata.size_bytes;
        let mut state = self.state.write().await;

        state.remove(&entry.key);

        if size > self.capacity_bytes {
            warn!(
                tier = "memory",
                key = %entry.key,
                size_bytes = size,
                capacity_bytes = self.capacity_bytes,
                "entry larger than memory capacity"
            );
            return Err(CacheError::CapacityExceeded {
                key: entry.key,
                size_bytes: size,
                capacity_bytes: self.capacity_bytes,
            });
        }

        let mut evicted = Vec::new();
        while (state.current_size_bytes + size > self.capacity_bytes
            || state.entries.len() >= self.max_entries)
            && !state.entries.is_empty()
        {
            match state.evict_lru() {
                Some(victim) => {
                    debug!(tier = "memory", key = %victim.key, "evicted least recently used entry");
                    evicted.push(victim);
                }
                None => break,
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.current_size_bytes += size;
        state.lru.insert(tick, entry.key.clone());
        debug!(tier = "memory", key = %entry.key, size_bytes = size, "stored entry");
        state.entries.insert(entry.key.clone(), Slot { entry, tick });

        Ok(evicted)
    }

    /// Remove a key; returns whether it was present
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        let found = state.remove(key).is_some();
        if found {
            debug!(tier = "memory", key, "deleted entry");
        }
        found
    }

    /// Remove every entry when `tags` is empty, otherwise every entry carrying
    /// at least one of `tags`. Returns the removed keys.
    pub async fn remove_tagged(&self, tags: &[String]) -> Vec<CacheKey> {
        let mut state = self.state.write().await;

        let keys: Vec<CacheKey> = if tags.is_empty() {
            state.entries.keys().cloned().collect()
        } else {
            state
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.has_any_tag(tags))
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in &keys {
            state.remove(key);
        }
        keys
    }

    /// Tag-scoped clear; returns the number of entries removed
    pub async fn clear(&self, tags: &[String]) -> usize {
        self.remove_tagged(tags).await.len()
    }

    /// Snapshot of keys carrying one of `tags` (all keys if empty)
    pub async fn tagged_keys(&self, tags: &[String]) -> Vec<CacheKey> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|(_, slot)| tags.is_empty() || slot.entry.has_any_tag(tags))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove `key` if it still carries one of `tags` (any entry if empty)
    pub async fn remove_if_tagged(&self, key: &str, tags: &[String]) -> bool {
        let mut state = self.state.write().await;
        let matches = state
            .entries
            .get(key)
            .map(|slot| tags.is_empty() || slot.entry.has_any_tag(tags))
            .unwrap_or(false);
        if matches {
            state.remove(key);
            debug!(tier = "memory", key, "cleared entry");
        }
        matches
    }

    /// Snapshot of the keys, least recently used first
    pub async fn keys(&self) -> Vec<CacheKey> {
        let state = self.state.read().await;
        state.lru.values().cloned().collect()
    }

    /// Drop whichever of `keys` have expired, under a single lock acquisition
    pub async fn remove_expired(&self, keys: &[CacheKey]) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut removed = 0;

        for key in keys {
            let expired = state
                .entries
                .get(key)
                .map(|slot| slot.entry.is_expired_at(now))
                .unwrap_or(false);
            if expired {
                state.remove(key);
                removed += 1;
            }
        }

        state.expirations += removed as u64;
        removed
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Summed `size_bytes` of resident entries
    pub async fn size_bytes(&self) -> usize {
        self.state.read().await.current_size_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub async fn stats(&self) -> MemoryTierStats {
        let state = self.state.read().await;
        MemoryTierStats {
            entries: state.entries.len(),
            size_bytes: state.current_size_bytes,
            capacity_bytes: self.capacity_bytes,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}
