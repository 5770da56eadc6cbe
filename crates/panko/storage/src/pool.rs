//! Process-wide reuse of backend client handles.

use crate::StorageResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Client handles keyed by endpoint identity.
///
/// Entries are weak: once no connection holds a handle it is dropped and the
/// next lookup reconnects. Lookup-or-connect is the only way in.
pub struct ClientPool<H: ?Sized> {
    entries: DashMap<String, Weak<H>>,
}

impl<H: ?Sized> Default for ClientPool<H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<H: ?Sized + Send + Sync> ClientPool<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live handle for `key`, or run `connect` and cache its result.
    ///
    /// `connect` runs without any lock held. When several callers race on a
    /// stale key they all connect, and all but the first to publish adopt the
    /// published handle.
    pub async fn get_or_connect<F, Fut>(&self, key: &str, connect: F) -> StorageResult<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<Arc<H>>>,
    {
        if let Some(live) = self.entries.get(key).and_then(|w| w.upgrade()) {
            debug!(key, "reusing pooled client");
            return Ok(live);
        }

        let fresh = connect().await?;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().upgrade() {
                    debug!(key, "adopting client published by a concurrent caller");
                    return Ok(existing);
                }
                slot.insert(Arc::downgrade(&fresh));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(&fresh));
            }
        }
        info!(key, "connected new storage client");
        Ok(fresh)
    }

    /// Forget entries whose handle has been dropped.
    pub fn purge(&self) {
        self.entries.retain(|_, w| w.strong_count() > 0);
    }

    /// Number of entries whose handle is still alive.
    pub fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| e.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Handle(usize);

    async fn connect(counter: &AtomicUsize) -> StorageResult<Arc<Handle>> {
        Ok(Arc::new(Handle(counter.fetch_add(1, Ordering::SeqCst))))
    }

    #[tokio::test]
    async fn same_key_shares_one_handle() {
        let pool = ClientPool::<Handle>::new();
        let counter = AtomicUsize::new(0);
        let a = pool.get_or_connect("db:27017", || connect(&counter)).await.unwrap();
        let b = pool.get_or_connect("db:27017", || connect(&counter)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.get_or_connect("other:27017", || connect(&counter)).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_handles_reconnect() {
        let pool = ClientPool::<Handle>::new();
        let counter = AtomicUsize::new(0);
        let first = pool.get_or_connect("db", || connect(&counter)).await.unwrap();
        assert_eq!(first.0, 0);
        drop(first);
        assert_eq!(pool.live_len(), 0);
        pool.purge();

        let second = pool.get_or_connect("db", || connect(&counter)).await.unwrap();
        assert_eq!(second.0, 1);
        assert_eq!(pool.live_len(), 1);
    }

    #[tokio::test]
    async fn racing_connects_converge() {
        let pool = ClientPool::<Handle>::new();
        let counter = AtomicUsize::new(0);
        // The outer connect publishes late; a nested caller wins the race.
        let winner = std::sync::Mutex::new(None);
        let loser = pool
            .get_or_connect("db", || async {
                let won = pool.get_or_connect("db", || connect(&counter)).await?;
                *winner.lock().unwrap() = Some(won);
                connect(&counter).await
            })
            .await
            .unwrap();
        let winner = winner.lock().unwrap().take().unwrap();
        assert!(Arc::ptr_eq(&loser, &winner));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
