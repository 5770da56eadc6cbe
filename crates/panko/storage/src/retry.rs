//! Retry-on-transient-failure decorator for any [`Connection`].

use crate::filter::EventFilter;
use crate::model::{Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor};
use crate::pagination::Pagination;
use crate::traits::{Connection, EventStream};
use crate::StorageResult;
use async_trait::async_trait;
use futures::{Future, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; `0` still makes one, negative never gives up.
    pub max_retries: i32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: i32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Whether another attempt may follow `attempts_made`.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_retries < 0 || i64::from(attempts_made) < i64::from(self.max_retries)
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt budget
    /// is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && self.allows_another(attempt) => {
                    warn!(
                        operation,
                        attempt,
                        error = %e,
                        "transient storage failure, retrying in {:?}",
                        self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                    attempt = attempt.saturating_add(1);
                }
                other => return other,
            }
        }
    }
}

/// Wraps a connection so every remote call is retried under [`RetryPolicy`].
///
/// Event streams are resumable: a transient failure mid-iteration re-issues
/// the query and skips what was already delivered.
pub struct Retrying<C: ?Sized = dyn Connection> {
    inner: Arc<C>,
    policy: RetryPolicy,
}

impl<C: ?Sized> Clone for Retrying<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: self.policy,
        }
    }
}

impl<C: Connection + ?Sized + 'static> Retrying<C> {
    pub fn new(inner: Arc<C>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

fn resumable<C>(
    inner: Arc<C>,
    policy: RetryPolicy,
    filter: EventFilter,
    pagination: Option<Pagination>,
    first: EventStream,
) -> EventStream
where
    C: Connection + ?Sized + 'static,
{
    let stream = async_stream::stream! {
        let mut current = first;
        let mut delivered: usize = 0;
        let mut attempt: u32 = 1;
        'outer: loop {
            match current.next().await {
                None => break,
                Some(Ok(event)) => {
                    delivered += 1;
                    attempt = 1;
                    yield Ok(event);
                }
                Some(Err(e)) if e.is_transient() && policy.allows_another(attempt) => {
                    warn!(delivered, attempt, error = %e, "event stream interrupted, resuming");
                    loop {
                        tokio::time::sleep(policy.interval).await;
                        attempt = attempt.saturating_add(1);
                        match inner.get_events(&filter, pagination.as_ref()).await {
                            Ok(fresh) => {
                                current = fresh.skip(delivered).boxed();
                                continue 'outer;
                            }
                            Err(e) if e.is_transient() && policy.allows_another(attempt) => {
                                warn!(attempt, error = %e, "re-issuing event query failed");
                            }
                            Err(e) => {
                                yield Err(e);
                                break 'outer;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };
    stream.boxed()
}

#[async_trait]
impl<C: Connection + ?Sized + 'static> Connection for Retrying<C> {
    async fn upgrade(&self) -> StorageResult<()> {
        let inner = &self.inner;
        self.policy.run("upgrade", move || inner.upgrade()).await
    }

    async fn clear(&self) -> StorageResult<()> {
        let inner = &self.inner;
        self.policy.run("clear", move || inner.clear()).await
    }

    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        let inner = &self.inner;
        self.policy
            .run("record_events", move || inner.record_events(events))
            .await
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        pagination: Option<&Pagination>,
    ) -> StorageResult<EventStream> {
        let inner = &self.inner;
        let first = self
            .policy
            .run("get_events", move || inner.get_events(filter, pagination))
            .await?;
        Ok(resumable(
            Arc::clone(&self.inner),
            self.policy,
            filter.clone(),
            pagination.cloned(),
            first,
        ))
    }

    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        let inner = &self.inner;
        self.policy
            .run("get_event_types", move || inner.get_event_types())
            .await
    }

    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let inner = &self.inner;
        self.policy
            .run("get_trait_types", move || inner.get_trait_types(event_type))
            .await
    }

    async fn get_traits(
        &self,
        event_type: &str,
        trait_name: Option<&str>,
    ) -> StorageResult<Vec<Trait>> {
        let inner = &self.inner;
        self.policy
            .run("get_traits", move || inner.get_traits(event_type, trait_name))
            .await
    }

    async fn clear_expired_data(
        &self,
        ttl_seconds: i64,
        max_batch: Option<u64>,
    ) -> StorageResult<u64> {
        let inner = &self.inner;
        self.policy
            .run("clear_expired_data", move || {
                inner.clear_expired_data(ttl_seconds, max_batch)
            })
            .await
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        self.inner.storage_capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::empty_raw;
    use crate::StorageError;
    use chrono::Utc;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls of every operation.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: StorageError,
    }

    impl Flaky {
        fn new(failures: u32, error: StorageError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
                error,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn attempt(&self) -> StorageResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Connection for Flaky {
        async fn get_event_types(&self) -> StorageResult<Vec<String>> {
            self.attempt()?;
            Ok(vec!["Foo".into()])
        }
    }

    fn policy(max_retries: i32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO)
    }

    fn transient() -> StorageError {
        StorageError::Transient("connection reset".into())
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_attempts() {
        let flaky = Flaky::new(u32::MAX, transient());
        let conn = Retrying::new(flaky.clone(), policy(3));
        let err = conn.get_event_types().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let flaky = Flaky::new(u32::MAX, transient());
        let conn = Retrying::new(flaky.clone(), policy(0));
        assert!(conn.get_event_types().await.is_err());
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn negative_max_retries_never_gives_up() {
        let flaky = Flaky::new(25, transient());
        let conn = Retrying::new(flaky.clone(), policy(-1));
        assert_eq!(conn.get_event_types().await.unwrap(), vec!["Foo".to_string()]);
        assert_eq!(flaky.calls(), 26);
    }

    #[tokio::test]
    async fn non_transient_errors_pass_through() {
        let flaky = Flaky::new(u32::MAX, StorageError::Backend("syntax error".into()));
        let conn = Retrying::new(flaky.clone(), policy(5));
        assert!(matches!(
            conn.get_event_types().await,
            Err(StorageError::Backend(_))
        ));
        assert_eq!(flaky.calls(), 1);
    }

    /// First query breaks after two events; later queries run clean.
    struct BrokenCursor {
        queries: AtomicU32,
    }

    fn ev(id: &str) -> Event {
        Event::new(id, "Foo", Utc::now(), vec![], empty_raw())
    }

    #[async_trait]
    impl Connection for BrokenCursor {
        async fn get_events(
            &self,
            _filter: &EventFilter,
            _pagination: Option<&Pagination>,
        ) -> StorageResult<EventStream> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            let items = if n == 0 {
                vec![Ok(ev("a")), Ok(ev("b")), Err(transient()), Ok(ev("never"))]
            } else {
                vec![Ok(ev("a")), Ok(ev("b")), Ok(ev("c"))]
            };
            Ok(stream::iter(items).boxed())
        }
    }

    #[tokio::test]
    async fn stream_resumes_where_it_broke() {
        let inner = Arc::new(BrokenCursor {
            queries: AtomicU32::new(0),
        });
        let conn = Retrying::new(inner.clone(), policy(3));
        let ids: Vec<String> = conn
            .get_events(&EventFilter::new(), None)
            .await
            .unwrap()
            .map(|e| e.unwrap().message_id)
            .collect()
            .await;
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(inner.queries.load(Ordering::SeqCst), 2);
    }
}
