//! Per-source mutual exclusion.
//!
//! Two extractions of the same source must not interleave their
//! delete/insert cycles. [`SourceLocks`] hands out one async mutex per
//! [`SourceKey`]; extractions of different sources never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::SourceKey;

#[derive(Default)]
pub struct SourceLocks {
    inner: Mutex<HashMap<SourceKey, Arc<AsyncMutex<()>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Access lasts until the guard
    /// is dropped.
    pub async fn acquire(&self, key: &SourceKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody holds or waits on are only referenced by the map.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(SourceLocks::new());
        let key = SourceKey::file(1);
        let guard = locks.acquire(&key).await;

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = SourceLocks::new();
        let _a = locks.acquire(&SourceKey::file(1)).await;
        let _b = locks.acquire(&SourceKey::object(1)).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = SourceLocks::new();
        drop(locks.acquire(&SourceKey::file(1)).await);
        let _b = locks.acquire(&SourceKey::file(2)).await;
        assert_eq!(locks.len(), 1);
    }
}
