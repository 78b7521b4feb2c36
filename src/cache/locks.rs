//! Striped per-key async locks

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A fixed set of mutexes; a key always maps to the same stripe.
///
/// Serializes work on one key without a global lock. Unrelated keys only
/// contend when they share a stripe. Guards are owned, so one can be moved
/// into a spawned task that must finish its work under the lock.
pub(crate) struct KeyLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    fn stripe(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        Arc::clone(&self.stripes[self.stripe(key)]).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_is_stable() {
        let locks = KeyLocks::new(16);
        assert_eq!(locks.stripe("weather:paris"), locks.stripe("weather:paris"));
        assert!(locks.stripe("anything") < 16);
    }

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = KeyLocks::new(8);
        let guard = locks.lock("k").await;
        assert!(locks.stripes[locks.stripe("k")].try_lock().is_err());
        drop(guard);
        assert!(locks.stripes[locks.stripe("k")].try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_guard_held_by_spawned_task() {
        let locks = KeyLocks::new(8);
        let guard = locks.lock("k").await;
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let _ = released.await;
        });
        tokio::task::yield_now().await;
        assert!(locks.stripes[locks.stripe("k")].try_lock().is_err());

        release.send(()).unwrap();
        task.await.unwrap();
        assert!(locks.stripes[locks.stripe("k")].try_lock().is_ok());
    }
}
