//! Periodic expiry pass, driven by a scheduler.

use crate::config::StorageConfig;
use crate::traits::Connection;
use crate::{StorageError, StorageResult};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Batch size used when the configuration leaves it unset.
pub const DEFAULT_DELETE_BATCH: u64 = 100;

/// Apply the configured TTL to `conn`. Returns the number of events deleted.
///
/// A configured batch size makes one bounded pass. Without one, passes of
/// [`DEFAULT_DELETE_BATCH`] repeat until a pass deletes nothing. A backend that
/// cannot bound a pass gets a single unbounded one.
pub async fn clear_expired<C>(conn: &C, config: &StorageConfig) -> StorageResult<u64>
where
    C: Connection + ?Sized,
{
    let ttl = config.event_time_to_live;
    if ttl <= 0 {
        info!("nothing to clean, event time to live is disabled");
        return Ok(0);
    }
    debug!(ttl, "clearing expired event data");

    let result = if config.events_delete_batch_size > 0 {
        conn.clear_expired_data(ttl, Some(config.events_delete_batch_size))
            .await
    } else {
        drain(conn, ttl).await
    };

    match result {
        Err(StorageError::BatchUnsupported(reason)) => {
            warn!(%reason, "storage driver does not support a delete batch size, running one unbounded pass");
            conn.clear_expired_data(ttl, None).await
        }
        other => other,
    }
}

/// Events generated before the returned instant are expired. `None` when the
/// TTL reaches past the representable range, so nothing can be expired.
pub fn expiry_cutoff(ttl_seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(ttl_seconds).and_then(|ttl| Utc::now().checked_sub_signed(ttl))
}

async fn drain<C>(conn: &C, ttl: i64) -> StorageResult<u64>
where
    C: Connection + ?Sized,
{
    let mut total = 0;
    loop {
        let deleted = conn.clear_expired_data(ttl, Some(DEFAULT_DELETE_BATCH)).await?;
        total += deleted;
        if deleted == 0 {
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Holds `remaining` expired events and records every call.
    struct Backlog {
        remaining: Mutex<u64>,
        calls: Mutex<Vec<Option<u64>>>,
        bounded: bool,
    }

    impl Backlog {
        fn new(remaining: u64, bounded: bool) -> Self {
            Self {
                remaining: Mutex::new(remaining),
                calls: Mutex::new(Vec::new()),
                bounded,
            }
        }

        fn calls(&self) -> Vec<Option<u64>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for Backlog {
        async fn clear_expired_data(
            &self,
            _ttl_seconds: i64,
            max_batch: Option<u64>,
        ) -> StorageResult<u64> {
            self.calls.lock().unwrap().push(max_batch);
            if max_batch.is_some() && !self.bounded {
                return Err(StorageError::BatchUnsupported("scan-based delete".into()));
            }
            let mut remaining = self.remaining.lock().unwrap();
            let n = max_batch.map_or(*remaining, |b| b.min(*remaining));
            *remaining -= n;
            Ok(n)
        }
    }

    fn config(ttl: i64, batch: u64) -> StorageConfig {
        StorageConfig {
            event_time_to_live: ttl,
            events_delete_batch_size: batch,
            ..StorageConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_ttl_never_touches_storage() {
        let conn = Backlog::new(10, true);
        assert_eq!(clear_expired(&conn, &config(0, 0)).await.unwrap(), 0);
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn configured_batch_makes_one_pass() {
        let conn = Backlog::new(250, true);
        assert_eq!(clear_expired(&conn, &config(3600, 50)).await.unwrap(), 50);
        assert_eq!(conn.calls(), vec![Some(50)]);
    }

    #[tokio::test]
    async fn default_batch_loops_until_empty() {
        let conn = Backlog::new(250, true);
        assert_eq!(clear_expired(&conn, &config(3600, 0)).await.unwrap(), 250);
        assert_eq!(conn.calls(), vec![Some(100), Some(100), Some(50), Some(100)]);
    }

    #[test]
    fn huge_ttls_expire_nothing() {
        assert!(expiry_cutoff(3600).is_some_and(|c| c < Utc::now()));
        assert!(expiry_cutoff(i64::MAX).is_none());
    }

    #[tokio::test]
    async fn unbounded_backends_get_one_full_pass() {
        let conn = Backlog::new(250, false);
        assert_eq!(clear_expired(&conn, &config(3600, 0)).await.unwrap(), 250);
        assert_eq!(conn.calls(), vec![Some(100), None]);
    }
}
