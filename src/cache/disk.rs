//! Persistent spillover tier: one JSON file per key plus an in-memory index
//!
//! Files live directly under the configured directory, named by the hex
//! SHA-256 of the key. Writes go to `<hash>.tmp` and are renamed into place,
//! so a reader never sees a half-written entry. The index lock is only held
//! for map updates; file I/O runs under a per-key stripe lock and a timeout.

use crate::cache::config::DiskStartup;
use crate::cache::entry::{Annotations, CacheEntry};
use crate::cache::locks::KeyLocks;
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const ENTRY_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";
const STRIPES: usize = 32;

/// Larger, slower tier backed by the filesystem
pub struct DiskTier {
    dir: PathBuf,
    capacity_bytes: usize,
    timeout: Duration,
    index: Arc<RwLock<DiskIndex>>,
    pub(crate) locks: KeyLocks,
    reads: AtomicU64,
    writes: Arc<AtomicU64>,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<CacheKey, IndexEntry>,
    total_size_bytes: usize,
}

/// What the index knows about one persisted entry
#[derive(Debug, Clone)]
struct IndexEntry {
    file_name: String,
    expires_at: DateTime<Utc>,
    size_bytes: usize,
    tags: BTreeSet<String>,
}

/// Counters and gauges for the disk tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskTierStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    pub reads: u64,
    pub writes: u64,
}

impl DiskIndex {
    fn insert(&mut self, key: CacheKey, entry: IndexEntry) {
        self.total_size_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
        }
    }

    fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let old = self.entries.remove(key)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
        Some(old)
    }
}

impl IndexEntry {
    fn matches(&self, tags: &[String]) -> bool {
        tags.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }

    fn for_entry(entry: &CacheEntry) -> Self {
        Self {
            file_name: file_name(&entry.key),
            expires_at: entry.metadata.expires_at,
            size_bytes: entry.metadata.size_bytes,
            tags: entry.tags.clone(),
        }
    }
}

/// File name for a key: hex SHA-256 plus the entry extension
fn file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}.{}", hasher.finalize(), ENTRY_EXT)
}

/// Remove a file, treating "already gone" as success
async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// A disk write detached from its caller; see [`DiskTier::put`]
struct PendingWrite {
    key: CacheKey,
    final_path: PathBuf,
    indexed: IndexEntry,
    bytes: Vec<u8>,
    index: Arc<RwLock<DiskIndex>>,
    writes: Arc<AtomicU64>,
    capacity_bytes: usize,
}

impl PendingWrite {
    async fn commit(self) -> Result<()> {
        let temp_path = self.final_path.with_extension(TEMP_EXT);

        if let Err(e) = fs::write(&temp_path, &self.bytes).await {
            let _ = remove_file_if_exists(&temp_path).await;
            return Err(CacheError::io(temp_path, e));
        }
        if let Err(e) = fs::rename(&temp_path, &self.final_path).await {
            let _ = remove_file_if_exists(&temp_path).await;
            return Err(CacheError::io(self.final_path, e));
        }

        let total = {
            let mut index = self.index.write().await;
            index.insert(self.key.clone(), self.indexed);
            index.total_size_bytes
        };
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(tier = "disk", key = %self.key, size_bytes = self.bytes.len(), "persisted entry");

        if total > self.capacity_bytes {
            warn!(
                tier = "disk",
                size_bytes = total,
                capacity_bytes = self.capacity_bytes,
                "disk tier above advisory capacity"
            );
        }
        Ok(())
    }
}

impl DiskTier {
    /// Open the tier rooted at `dir`, applying the startup policy to any
    /// files a previous process left behind.
    pub async fn open(
        dir: impl Into<PathBuf>,
        capacity_bytes: usize,
        timeout: Duration,
        startup: DiskStartup,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let tier = Self {
            dir,
            capacity_bytes,
            timeout,
            index: Arc::new(RwLock::new(DiskIndex::default())),
            locks: KeyLocks::new(STRIPES),
            reads: AtomicU64::new(0),
            writes: Arc::new(AtomicU64::new(0)),
        };

        match startup {
            DiskStartup::Rebuild => tier.rebuild_index().await?,
            DiskStartup::Wipe => tier.wipe().await?,
        }

        Ok(tier)
    }

    /// Directory holding the entry files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.path_for(&file_name(key))
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tier = "disk", operation, timeout = ?self.timeout, "disk operation timed out");
                Err(CacheError::timeout(operation, self.timeout))
            }
        }
    }

    /// Re-index every valid, unexpired entry file; delete the rest
    async fn rebuild_index(&self) -> Result<()> {
        let mut read_dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;
        let now = Utc::now();
        let mut restored = 0usize;
        let mut discarded = 0usize;

        while let Some(dir_entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = dir_entry.path();
            let ext = path.extension().and_then(|s| s.to_str());

            if ext == Some(TEMP_EXT) {
                if let Err(e) = remove_file_if_exists(&path).await {
                    warn!(tier = "disk", error = %e, "failed to remove leftover temp file");
                }
                continue;
            }
            if ext != Some(ENTRY_EXT) {
                continue;
            }

            let name = match path.file_name().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CacheEntry>(&bytes).ok(),
                Err(e) => {
                    warn!(tier = "disk", path = %path.display(), error = %e, "unreadable entry file");
                    None
                }
            };

            match parsed {
                Some(entry) if !entry.is_expired_at(now) && file_name(&entry.key) == name => {
                    self.index
                        .write()
                        .await
                        .insert(entry.key.clone(), IndexEntry::for_entry(&entry));
                    restored += 1;
                }
                _ => {
                    if let Err(e) = remove_file_if_exists(&path).await {
                        warn!(tier = "disk", error = %e, "failed to remove stale entry file");
                    }
                    discarded += 1;
                }
            }
        }

        info!(
            tier = "disk",
            dir = %self.dir.display(),
            restored,
            discarded,
            "rebuilt disk index from storage directory"
        );
        Ok(())
    }

    /// Delete every entry and temp file in the directory
    async fn wipe(&self) -> Result<()> {
        let mut read_dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;
        let mut removed = 0usize;

        while let Some(dir_entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = dir_entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some(ENTRY_EXT) || ext == Some(TEMP_EXT) {
                remove_file_if_exists(&path).await?;
                removed += 1;
            }
        }

        info!(tier = "disk", dir = %self.dir.display(), removed, "wiped disk tier");
        Ok(())
    }

    /// Read a live entry from disk
    ///
    /// Expired, missing or corrupt files are pruned and reported as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.with_timeout("disk get", self.get_inner(key)).await
    }

    async fn get_inner(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _guard = self.locks.lock(key).await;

        let indexed = match self.index.read().await.entries.get(key).cloned() {
            Some(indexed) => indexed,
            None => return Ok(None),
        };
        let path = self.path_for(&indexed.file_name);

        if Utc::now() > indexed.expires_at {
            debug!(tier = "disk", key, "entry expired on lookup");
            remove_file_if_exists(&path).await?;
            self.index.write().await.remove(key);
            return Ok(None);
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(tier = "disk", key, "indexed file missing, pruning index entry");
                self.index.write().await.remove(key);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(path, e)),
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key && !entry.is_expired() => Ok(Some(entry)),
            Ok(entry) if entry.key == key => {
                debug!(tier = "disk", key, "stored entry expired");
                remove_file_if_exists(&path).await?;
                self.index.write().await.remove(key);
                Ok(None)
            }
            other => {
                if let Err(e) = other {
                    warn!(tier = "disk", key, error = %e, "corrupt entry file, discarding");
                } else {
                    warn!(tier = "disk", key, "entry file holds a different key, discarding");
                }
                remove_file_if_exists(&path).await?;
                self.index.write().await.remove(key);
                Ok(None)
            }
        }
    }

    /// True if the index holds an unexpired entry for `key`
    pub async fn contains(&self, key: &str) -> bool {
        self.index
            .read()
            .await
            .entries
            .get(key)
            .map(|indexed| Utc::now() <= indexed.expires_at)
            .unwrap_or(false)
    }

    /// Build an entry and persist it
    pub async fn set(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl: Duration,
        tags: Vec<String>,
        annotations: Annotations,
    ) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl, tags, annotations)?;
        self.put(&entry).await
    }

    /// Persist a prepared entry, keeping its timestamps
    ///
    /// Once the key's lock is held, the file write, rename and index update
    /// run in their own task. A timeout only stops the caller from waiting:
    /// the write then finishes on its own, and the file and index never
    /// disagree.
    pub(crate) async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.with_timeout("disk set", self.put_inner(entry, bytes))
            .await
    }

    async fn put_inner(&self, entry: &CacheEntry, bytes: Vec<u8>) -> Result<()> {
        let guard = self.locks.lock(&entry.key).await;

        let write = PendingWrite {
            key: entry.key.clone(),
            final_path: self.path_for_key(&entry.key),
            indexed: IndexEntry::for_entry(entry),
            bytes,
            index: Arc::clone(&self.index),
            writes: Arc::clone(&self.writes),
            capacity_bytes: self.capacity_bytes,
        };
        let final_path = write.final_path.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            write.commit().await
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(CacheError::io(
                final_path,
                std::io::Error::new(ErrorKind::Other, e),
            )),
        }
    }

    /// Remove a key's file and index entry; returns whether it was indexed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.with_timeout("disk delete", self.delete_inner(key))
            .await
    }

    async fn delete_inner(&self, key: &str) -> Result<bool> {
        let _guard = self.locks.lock(key).await;

        // file first: an interrupted delete leaves an index entry pointing at
        // nothing, which the read path already heals
        remove_file_if_exists(&self.path_for_key(key)).await?;
        let found = self.index.write().await.remove(key).is_some();
        if found {
            debug!(tier = "disk", key, "deleted entry");
        }
        Ok(found)
    }

    /// Remove every entry (empty `tags`) or every entry carrying one of `tags`
    ///
    /// Per-key failures are logged and skipped. Returns the removed keys.
    pub async fn remove_tagged(&self, tags: &[String]) -> Vec<CacheKey> {
        let candidates = self.tagged_keys(tags).await;

        let mut removed = Vec::with_capacity(candidates.len());
        for key in candidates {
            match self.remove_if_tagged(&key, tags).await {
                Ok(true) => removed.push(key),
                Ok(false) => {}
                Err(e) => warn!(tier = "disk", key = %key, error = %e, "clear failed for entry"),
            }
        }
        removed
    }

    /// Tag-scoped clear; returns the number of entries removed
    pub async fn clear(&self, tags: &[String]) -> usize {
        self.remove_tagged(tags).await.len()
    }

    /// Snapshot of indexed keys carrying one of `tags` (all keys if empty)
    pub async fn tagged_keys(&self, tags: &[String]) -> Vec<CacheKey> {
        let index = self.index.read().await;
        index
            .entries
            .iter()
            .filter(|(_, indexed)| indexed.matches(tags))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Delete `key` if its indexed entry still carries one of `tags`
    ///
    /// The tags are checked again under the key's lock, so an entry rewritten
    /// without the tag since the snapshot is left alone.
    pub async fn remove_if_tagged(&self, key: &str, tags: &[String]) -> Result<bool> {
        self.with_timeout("disk clear", self.remove_if_tagged_inner(key, tags))
            .await
    }

    async fn remove_if_tagged_inner(&self, key: &str, tags: &[String]) -> Result<bool> {
        let _guard = self.locks.lock(key).await;

        let file = match self.index.read().await.entries.get(key) {
            Some(indexed) if indexed.matches(tags) => indexed.file_name.clone(),
            _ => return Ok(false),
        };
        remove_file_if_exists(&self.path_for(&file)).await?;
        self.index.write().await.remove(key);
        debug!(tier = "disk", key, "cleared entry");
        Ok(true)
    }

    /// Snapshot of indexed keys
    pub async fn keys(&self) -> Vec<CacheKey> {
        self.index.read().await.entries.keys().cloned().collect()
    }

    /// Delete `key` if its indexed expiry has passed
    pub async fn remove_if_expired(&self, key: &str) -> Result<bool> {
        self.with_timeout("disk reclaim", self.remove_if_expired_inner(key))
            .await
    }

    async fn remove_if_expired_inner(&self, key: &str) -> Result<bool> {
        let _guard = self.locks.lock(key).await;

        let file = match self.index.read().await.entries.get(key) {
            Some(indexed) if Utc::now() > indexed.expires_at => indexed.file_name.clone(),
            _ => return Ok(false),
        };
        remove_file_if_exists(&self.path_for(&file)).await?;
        self.index.write().await.remove(key);
        debug!(tier = "disk", key, "reclaimed expired entry");
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.entries.is_empty()
    }

    pub async fn stats(&self) -> DiskTierStats {
        let index = self.index.read().await;
        DiskTierStats {
            entries: index.entries.len(),
            size_bytes: index.total_size_bytes,
            capacity_bytes: self.capacity_bytes,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
