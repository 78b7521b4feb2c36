//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type
pub type CacheKey = String;

/// Cache value type - any JSON-serializable payload
pub type CacheValue = serde_json::Value;

/// Storage tier holding an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Bounded in-process tier
    Memory,

    /// Persistent spillover tier
    Disk,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory"),
            Tier::Disk => write!(f, "disk"),
        }
    }
}

/// Point-in-time statistics snapshot for the tiered cache
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Total number of hits (either tier)
    pub hits: u64,

    /// Total number of misses
    pub misses: u64,

    /// `hits / (hits + misses)`, 0.0 when nothing was requested yet
    pub hit_rate: f64,

    /// LRU evictions from the memory tier
    pub evictions: u64,

    /// Memory-tier entries dropped because their TTL passed (lookups and
    /// reclamation)
    pub expirations: u64,

    /// Number of entries currently in memory
    pub memory_entries: usize,

    /// Total `size_bytes` of memory entries
    pub memory_size_bytes: usize,

    /// Memory usage as a percentage of configured capacity
    pub memory_utilization_percent: f64,

    /// Disk tier lookups issued
    pub disk_reads: u64,

    /// Entries persisted to disk
    pub disk_writes: u64,

    /// Hits served by the memory tier
    pub memory_hits: u64,

    /// Hits served by the disk tier
    pub disk_hits: u64,

    /// Disk hits that could not be copied back into memory
    pub promotion_failures: u64,

    /// Number of entries indexed on disk
    pub disk_entries: usize,

    /// Total `size_bytes` indexed on disk
    pub disk_size_bytes: usize,
}

impl CacheStats {
    /// Hit ratio in `[0.0, 1.0]`
    pub fn compute_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Miss ratio in `[0.0, 1.0]`
    pub fn miss_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            1.0 - self.hit_rate
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, memory: {} entries / {} bytes ({:.1}%), disk: {} entries, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.memory_entries,
            self.memory_size_bytes,
            self.memory_utilization_percent,
            self.disk_entries,
            self.evictions
        )
    }
}
