//! Cache entry management with TTL support

use crate::cache::types::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Opaque caller annotations carried alongside an entry
pub type Annotations = BTreeMap<String, String>;

/// A cache entry with TTL and metadata
///
/// Entries are built by the tiers themselves; callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// Bookkeeping maintained by the owning tier
    pub metadata: CacheMetadata,

    /// Labels used for bulk invalidation
    pub tags: BTreeSet<String>,

    /// Caller annotations, never interpreted by the cache
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl CacheEntry {
    /// Create a new cache entry expiring `ttl` from now
    ///
    /// Fails with [`CacheError::InvalidTtl`] for a zero TTL and with
    /// [`CacheError::Serialization`] if the value cannot be encoded to
    /// compute its size.
    pub fn new(
        key: CacheKey,
        value: CacheValue,
        ttl: Duration,
        tags: impl IntoIterator<Item = String>,
        annotations: Annotations,
    ) -> Result<Self> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl { key });
        }

        let now = Utc::now();
        let expires_at = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
        {
            Some(at) => at,
            None => return Err(CacheError::InvalidTtl { key }),
        };
        let size_bytes = serialized_size(&value)?;

        Ok(Self {
            key,
            value,
            metadata: CacheMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes,
            },
            tags: tags.into_iter().collect(),
            annotations,
        })
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a fixed clock reading
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.metadata.expires_at
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now();
        if now > self.metadata.expires_at {
            None
        } else {
            (self.metadata.expires_at - now).to_std().ok()
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Check if entry has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// True if any of `tags` is attached to this entry
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Size of the serialized value, fixed at construction
    pub fn size_bytes(&self) -> usize {
        self.metadata.size_bytes
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires; always `created_at + ttl`
    pub expires_at: DateTime<Utc>,

    /// Number of successful reads
    pub access_count: u64,

    /// Serialized size of the value in bytes
    pub size_bytes: usize,
}

/// Per-write options for [`crate::TieredCache::set`]
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Explicit TTL; `None` uses the configured default
    pub ttl: Option<Duration>,

    /// Tags for bulk invalidation
    pub tags: Vec<String>,

    /// Opaque annotations
    pub annotations: Annotations,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Byte length of the JSON encoding of `value`
pub fn serialized_size(value: &CacheValue) -> Result<usize> {
    Ok(serde_json::to_vec(value)?.len())
}
