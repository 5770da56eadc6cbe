use crate::filter::EventFilter;
use crate::model::{Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor};
use crate::pagination::Pagination;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy, one-shot sequence of events produced by a query.
pub type EventStream = BoxStream<'static, StorageResult<Event>>;

fn not_implemented<T>(operation: &str) -> StorageResult<T> {
    Err(StorageError::NotImplemented(format!(
        "{operation} is not implemented by this backend"
    )))
}

/// Operation set every event storage backend exposes.
///
/// Operations a backend does not support answer with
/// [`StorageError::NotImplemented`].
#[async_trait]
pub trait Connection: Send + Sync {
    /// Idempotent schema/index bring-up.
    async fn upgrade(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Destroy all stored data.
    async fn clear(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Persist every event. Malformed events and duplicate `message_id`s are
    /// logged and skipped.
    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        let _ = events;
        not_implemented("record_events")
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        pagination: Option<&Pagination>,
    ) -> StorageResult<EventStream> {
        let _ = (filter, pagination);
        not_implemented("get_events")
    }

    /// Distinct event type names, sorted.
    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        not_implemented("get_event_types")
    }

    /// Distinct trait (name, dtype) pairs seen for `event_type`.
    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let _ = event_type;
        not_implemented("get_trait_types")
    }

    /// Every trait instance of `event_type`, optionally narrowed to one name.
    async fn get_traits(
        &self,
        event_type: &str,
        trait_name: Option<&str>,
    ) -> StorageResult<Vec<Trait>> {
        let _ = (event_type, trait_name);
        not_implemented("get_traits")
    }

    /// Delete events older than `ttl_seconds`; returns the number deleted.
    /// `ttl_seconds <= 0` never expires anything.
    async fn clear_expired_data(
        &self,
        ttl_seconds: i64,
        max_batch: Option<u64>,
    ) -> StorageResult<u64> {
        let _ = (ttl_seconds, max_batch);
        not_implemented("clear_expired_data")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::default()
    }
}
