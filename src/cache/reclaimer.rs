//! Background reclamation of expired entries
//!
//! A pass snapshots each tier's keys and removes expired entries in small
//! steps: memory keys in batches of `reclaim_batch_size` per lock
//! acquisition, disk keys one at a time under their stripe lock. Foreground
//! calls are never blocked for a whole pass.

use crate::cache::coordinator::TieredCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one reclamation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Expired entries removed from memory
    pub memory_reclaimed: usize,

    /// Expired entries removed from disk
    pub disk_reclaimed: usize,

    /// Disk entries that could not be removed this pass
    pub errors: usize,
}

impl ReclaimReport {
    pub fn total(&self) -> usize {
        self.memory_reclaimed + self.disk_reclaimed
    }
}

impl TieredCache {
    /// Run one reclamation pass over both tiers
    ///
    /// Per-entry failures are logged and skipped; the pass always completes.
    pub async fn reclaim_expired(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        let batch = self.config().reclaim_batch_size.max(1);

        let memory_keys = self.memory().keys().await;
        for chunk in memory_keys.chunks(batch) {
            report.memory_reclaimed += self.memory().remove_expired(chunk).await;
            tokio::task::yield_now().await;
        }

        for key in self.disk().keys().await {
            match self.disk().remove_if_expired(&key).await {
                Ok(true) => report.disk_reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(tier = "disk", key = %key, operation = "reclaim", error = %e, "failed to reclaim entry");
                    report.errors += 1;
                }
            }
        }

        report
    }
}

/// Handle to the background reclamation task
///
/// The loop stops on [`Reclaimer::shutdown`], or when the handle is dropped.
pub struct Reclaimer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reclaimer {
    /// Start the loop on the current tokio runtime, ticking every
    /// `reclaim_interval`. The first pass runs one interval after start.
    pub fn spawn(cache: Arc<TieredCache>) -> Self {
        let interval = cache.config().reclaim_interval;
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("Starting cache reclaimer (interval: {:?})", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // run the pass in its own task so a panic cannot kill the loop
                        let pass = tokio::spawn({
                            let cache = Arc::clone(&cache);
                            async move { cache.reclaim_expired().await }
                        });
                        match pass.await {
                            Ok(report) if report.total() > 0 || report.errors > 0 => {
                                debug!(
                                    memory = report.memory_reclaimed,
                                    disk = report.disk_reclaimed,
                                    errors = report.errors,
                                    "reclaim pass finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Reclaim pass aborted: {}", e),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Cache reclaimer stopped");
        });

        Self { shutdown, handle }
    }

    /// True until the loop has exited
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Cache reclaimer exited abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::entry::SetOptions;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn cache(tmp: &TempDir, interval: Duration) -> Arc<TieredCache> {
        let config = CacheConfig::builder()
            .disk_dir(tmp.path())
            .reclaim_interval(interval)
            .reclaim_batch_size(2)
            .build();
        Arc::new(TieredCache::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn test_reclaim_pass_removes_only_expired() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Duration::from_secs(300)).await;

        for i in 0..5 {
            cache
                .set(
                    format!("short:{}", i),
                    json!(i),
                    SetOptions::new().ttl(Duration::from_millis(30)),
                )
                .await
                .unwrap();
        }
        cache.set("long", json!("stay"), SetOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        let report = cache.reclaim_expired().await;
        assert_eq!(report.memory_reclaimed, 5);
        assert_eq!(report.disk_reclaimed, 5);
        assert_eq!(report.errors, 0);
        assert_eq!(cache.memory().keys().await, vec!["long"]);
        assert_eq!(cache.disk().keys().await, vec!["long"]);

        // nothing left to do
        assert_eq!(cache.reclaim_expired().await.total(), 0);
    }

    #[tokio::test]
    async fn test_background_loop_reclaims_and_stops() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Duration::from_millis(40)).await;

        cache
            .set("k", json!(1), SetOptions::new().ttl(Duration::from_millis(20)))
            .await
            .unwrap();

        let reclaimer = Reclaimer::spawn(Arc::clone(&cache));
        assert!(reclaimer.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.memory().is_empty().await);
        assert!(cache.disk().is_empty().await);

        reclaimer.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_loop() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Duration::from_millis(10)).await;

        let reclaimer = Reclaimer::spawn(Arc::clone(&cache));
        drop(reclaimer);

        // once the loop exits, the test holds the only reference again
        for _ in 0..50 {
            if Arc::strong_count(&cache) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&cache), 1);
    }
}
