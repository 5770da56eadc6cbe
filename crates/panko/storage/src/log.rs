//! Diagnostic backend that logs writes and stores nothing.

use crate::filter::EventFilter;
use crate::model::{Capabilities, Event, StorageCapabilities};
use crate::pagination::Pagination;
use crate::traits::{Connection, EventStream};
use crate::StorageResult;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConnection;

impl LogConnection {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connection for LogConnection {
    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        info!(count = events.len(), "discarding events");
        Ok(())
    }

    async fn get_events(
        &self,
        _filter: &EventFilter,
        _pagination: Option<&Pagination>,
    ) -> StorageResult<EventStream> {
        Ok(futures::stream::empty().boxed())
    }

    async fn clear_expired_data(
        &self,
        ttl_seconds: i64,
        _max_batch: Option<u64>,
    ) -> StorageResult<u64> {
        info!(ttl_seconds, "dropping expired events");
        Ok(0)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::simple_query(false)
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::production_ready(false)
    }
}
