//! Wide-column backend.
//!
//! One row per event in a single table, keyed by generation time so that
//! time-window queries become row-range scans. Event type, message id,
//! timestamp and the raw payload live in fixed columns of family `f`; every
//! trait gets a `f:{name}:{dtype}` column holding an order-preserving value
//! encoding, which lets the gateway evaluate trait comparisons server-side.
//!
//! A companion `{table}_message_id` table maps each message id to its event
//! row. Inserts claim the id there with a check-and-put before writing the
//! event, so concurrent writers of one message id store it once.
//!
//! URL: `hbase://host[:port]/?table_prefix=...&table_prefix_separator=_&row_order=asc|desc`.
//! The host `__test__` selects a private in-process engine.

mod filter;
mod inmemory;
mod keys;
mod query;
mod rest;

pub use filter::ColumnFilter;
pub use inmemory::MemoryColumnStore;
pub use query::{make_scan, ScanSpec};
pub use rest::RestColumnClient;

use self::keys::{
    decode_value, encode_timestamp, encode_value, parse_trait_column, quote, row_key,
    trait_column, COL_EVENT_TYPE, COL_MESSAGE_ID, COL_RAW, COL_ROW, COL_TIMESTAMP, FAMILY,
};
use crate::connection_url::ConnectionUrl;
use crate::expirer::expiry_cutoff;
use crate::filter::{ComparisonOp, EventFilter};
use crate::model::{
    Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor, TraitType, TraitValue,
};
use crate::pagination::{
    compare_events, marker_not_found, paginate_in_memory, Pagination, SortDir, SortKey, SortSpec,
    DEFAULT_SORT,
};
use crate::pool::ClientPool;
use crate::traits::{Connection, EventStream};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const TEST_HOST: &str = "__test__";
const DEFAULT_REST_PORT: u16 = 8080;
const EVENT_TABLE: &str = "event";
const INDEX_SUFFIX: &str = "_message_id";
const SCAN_PAGE: usize = 1000;

/// One row as returned by a scan: key plus `family:qualifier` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnRow {
    pub key: String,
    pub cells: BTreeMap<String, Vec<u8>>,
}

/// Minimal table operations the event layout needs.
#[async_trait]
pub trait ColumnClient: Send + Sync {
    /// Create `table` with a single column family. Existing tables are kept.
    async fn create_table(&self, table: &str, family: &str) -> StorageResult<()>;

    /// Remove every row of `table`.
    async fn truncate_table(&self, table: &str) -> StorageResult<()>;

    async fn put(&self, table: &str, row: &ColumnRow) -> StorageResult<()>;

    async fn get(&self, table: &str, key: &str) -> StorageResult<Option<ColumnRow>>;

    /// Atomically write `row` unless it already has a `check_column` cell.
    /// Returns whether the write happened.
    async fn check_and_put(
        &self,
        table: &str,
        row: &ColumnRow,
        check_column: &str,
    ) -> StorageResult<bool>;

    /// Rows inside the scan's key range that pass its filter, in key order.
    async fn scan(
        &self,
        table: &str,
        spec: &ScanSpec,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ColumnRow>>;

    /// Delete rows by key, returning how many existed.
    async fn delete_rows(&self, table: &str, keys: &[String]) -> StorageResult<u64>;
}

/// Event store on a column client.
#[derive(Clone)]
pub struct ColumnConnection {
    client: Arc<dyn ColumnClient>,
    table: String,
    index_table: String,
    reverse: bool,
    scan_page: usize,
}

impl ColumnConnection {
    pub fn new(client: Arc<dyn ColumnClient>, table: impl Into<String>, reverse: bool) -> Self {
        let table = table.into();
        Self {
            client,
            index_table: format!("{table}{INDEX_SUFFIX}"),
            table,
            reverse,
            scan_page: SCAN_PAGE,
        }
    }

    /// Rows requested per scan while streaming query results.
    pub fn with_scan_page(mut self, rows: usize) -> Self {
        self.scan_page = rows.max(1);
        self
    }

    /// Open against the gateway named by `url`, sharing one client per
    /// gateway endpoint.
    pub async fn open(
        url: &ConnectionUrl,
        pool: &ClientPool<dyn ColumnClient>,
    ) -> StorageResult<Self> {
        let reverse = match url.option("row_order") {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(StorageError::Configuration(format!(
                    "row_order must be asc or desc, got `{other}`"
                )))
            }
        };
        let table = match url.option("table_prefix").filter(|p| !p.is_empty()) {
            Some(prefix) => {
                let sep = url.option("table_prefix_separator").unwrap_or("_");
                format!("{prefix}{sep}{EVENT_TABLE}")
            }
            None => EVENT_TABLE.to_string(),
        };
        let host = url
            .hosts()
            .first()
            .ok_or_else(|| StorageError::Configuration("hbase url names no host".into()))?;

        let client: Arc<dyn ColumnClient> = if host.host == TEST_HOST {
            Arc::new(MemoryColumnStore::new())
        } else {
            let endpoint = format!(
                "http://{}:{}",
                host.host,
                host.port.unwrap_or(DEFAULT_REST_PORT)
            );
            pool.get_or_connect(&endpoint, || {
                let client = RestColumnClient::new(&endpoint);
                async move { Ok(Arc::new(client?) as Arc<dyn ColumnClient>) }
            })
            .await?
        };
        Ok(Self::new(client, table, reverse))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn index_table(&self) -> &str {
        &self.index_table
    }

    async fn scan_events(&self, spec: &ScanSpec, limit: Option<usize>) -> StorageResult<Vec<Event>> {
        self.client
            .scan(&self.table, spec, limit)
            .await?
            .iter()
            .map(row_to_event)
            .collect()
    }

    /// Point lookup through the message id index.
    async fn find_event(&self, message_id: &str) -> StorageResult<Option<Event>> {
        let Some(claim) = self.client.get(&self.index_table, &quote(message_id)).await? else {
            return Ok(None);
        };
        let Some(key) = claim.cells.get(COL_ROW) else {
            return Ok(None);
        };
        let key = String::from_utf8(key.clone())
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.client
            .get(&self.table, &key)
            .await?
            .map(|row| row_to_event(&row))
            .transpose()
    }

    async fn insert_event(&self, event: &Event) -> StorageResult<()> {
        let row = event_to_row(event, self.reverse)?;
        let claim = ColumnRow {
            key: quote(&event.message_id),
            cells: BTreeMap::from([(COL_ROW.to_string(), row.key.as_bytes().to_vec())]),
        };
        if !self
            .client
            .check_and_put(&self.index_table, &claim, COL_ROW)
            .await?
        {
            return Err(StorageError::Conflict(format!(
                "message_id {} already stored",
                event.message_id
            )));
        }
        if let Err(e) = self.client.put(&self.table, &row).await {
            // Release the claim so a later attempt can store the event.
            if let Err(undo) = self
                .client
                .delete_rows(&self.index_table, &[claim.key])
                .await
            {
                warn!(message_id = %event.message_id, error = %undo, "could not release message_id claim");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Row keys already come out in `sort` order when its leading key is the
    /// generation time running the same way as the table.
    fn follows_key_order(&self, sort: &[SortSpec]) -> bool {
        sort.first().is_some_and(|s| {
            s.key == SortKey::Generated && (s.dir == SortDir::Desc) == self.reverse
        })
    }

    /// Page through the scan lazily. Rows sharing a timestamp are buffered
    /// and ordered by the rest of `sort` before they are emitted.
    fn stream_in_key_order(
        &self,
        mut spec: ScanSpec,
        sort: Vec<SortSpec>,
        marker: Option<Event>,
        limit: Option<usize>,
    ) -> EventStream {
        let client = Arc::clone(&self.client);
        let table = self.table.clone();
        let page_rows = self.scan_page;
        let events = async_stream::try_stream! {
            let mut tied: Vec<Event> = Vec::new();
            let mut emitted = 0usize;
            'scan: loop {
                let page = client.scan(&table, &spec, Some(page_rows)).await?;
                let exhausted = page.len() < page_rows;
                if let Some(last) = page.last() {
                    spec.resume_after(&last.key);
                }
                for row in &page {
                    let event = row_to_event(row)?;
                    if marker
                        .as_ref()
                        .is_some_and(|m| compare_events(&event, m, &sort) != Ordering::Greater)
                    {
                        continue;
                    }
                    if tied.first().is_some_and(|t| t.generated != event.generated) {
                        tied.sort_by(|a, b| compare_events(a, b, &sort));
                        for done in tied.drain(..) {
                            if limit.is_some_and(|n| emitted >= n) {
                                break 'scan;
                            }
                            emitted += 1;
                            yield done;
                        }
                    }
                    tied.push(event);
                }
                if exhausted {
                    break;
                }
            }
            tied.sort_by(|a, b| compare_events(a, b, &sort));
            for done in tied {
                if limit.is_some_and(|n| emitted >= n) {
                    break;
                }
                emitted += 1;
                yield done;
            }
        };
        events.boxed()
    }

    fn type_scan(event_type: &str) -> ScanSpec {
        ScanSpec {
            filter: Some(ColumnFilter::SingleColumnValue {
                column: COL_EVENT_TYPE.to_string(),
                op: ComparisonOp::Eq,
                value: event_type.as_bytes().to_vec(),
                filter_if_missing: true,
            }),
            ..ScanSpec::default()
        }
    }
}

#[async_trait]
impl Connection for ColumnConnection {
    async fn upgrade(&self) -> StorageResult<()> {
        self.client.create_table(&self.table, FAMILY).await?;
        self.client.create_table(&self.index_table, FAMILY).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.client.truncate_table(&self.table).await?;
        self.client.truncate_table(&self.index_table).await
    }

    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        let mut failure = None;
        for event in events {
            if let Err(e) = event.validate() {
                warn!(error = %e, "dropping malformed event");
                continue;
            }
            match self.insert_event(event).await {
                Ok(()) => {}
                Err(StorageError::Conflict(reason)) => {
                    info!(message_id = %event.message_id, %reason, "duplicate event detected, skipping it");
                }
                Err(StorageError::InvalidInput(reason)) => {
                    warn!(message_id = %event.message_id, %reason, "dropping event the row layout cannot hold");
                }
                Err(e) => {
                    error!(message_id = %event.message_id, error = %e, "failed to record event");
                    failure = Some(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        pagination: Option<&Pagination>,
    ) -> StorageResult<EventStream> {
        if pagination.is_some_and(Pagination::is_empty_page) {
            return Ok(futures::stream::empty().boxed());
        }
        let mut spec = make_scan(filter, self.reverse)?;
        let sort = match pagination {
            Some(p) => p.sort_or_default(),
            None => &DEFAULT_SORT,
        };
        let marker = match pagination.and_then(|p| p.marker.as_deref()) {
            Some(id) => Some(
                self.find_event(id)
                    .await?
                    .ok_or_else(|| marker_not_found(id))?,
            ),
            None => None,
        };
        let limit = pagination.and_then(|p| p.limit);

        if self.follows_key_order(sort) {
            if let Some(m) = &marker {
                spec.start_at(encode_timestamp(m.generated, self.reverse)?);
            }
            return Ok(self.stream_in_key_order(spec, sort.to_vec(), marker, limit));
        }

        // Against the table's key order every match has to be seen first.
        let page = Pagination {
            limit,
            marker: None,
            sort: sort.to_vec(),
        };
        let events = paginate_in_memory(self.scan_events(&spec, None).await?, marker.as_ref(), &page);
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        let types: BTreeSet<String> = self
            .scan_events(&ScanSpec::default(), None)
            .await?
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let found: BTreeSet<TraitDescriptor> = self
            .scan_events(&Self::type_scan(event_type), None)
            .await?
            .into_iter()
            .flat_map(|e| e.traits)
            .map(|t| TraitDescriptor {
                name: t.name,
                dtype: t.dtype,
            })
            .collect();
        Ok(found.into_iter().collect())
    }

    async fn get_traits(
        &self,
        event_type: &str,
        trait_name: Option<&str>,
    ) -> StorageResult<Vec<Trait>> {
        let mut traits: Vec<Trait> = self
            .scan_events(&Self::type_scan(event_type), None)
            .await?
            .into_iter()
            .flat_map(|e| e.traits)
            .filter(|t| trait_name.map_or(true, |n| t.name == n))
            .collect();
        traits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(traits)
    }

    async fn clear_expired_data(
        &self,
        ttl_seconds: i64,
        max_batch: Option<u64>,
    ) -> StorageResult<u64> {
        if ttl_seconds <= 0 {
            return Ok(0);
        }
        if max_batch.is_some() {
            return Err(StorageError::BatchUnsupported(
                "column store deletes expired rows in a single pass".into(),
            ));
        }
        let Some(cutoff) = expiry_cutoff(ttl_seconds) else {
            return Ok(0);
        };
        let spec = make_scan(
            &EventFilter::new().end(cutoff, ComparisonOp::Lt),
            self.reverse,
        )?;
        let rows = self.client.scan(&self.table, &spec, None).await?;
        if rows.is_empty() {
            info!(deleted = 0, ttl_seconds, table = %self.table, "expired events removed");
            return Ok(0);
        }
        let claims: Vec<String> = rows
            .iter()
            .filter_map(|r| r.cells.get(COL_MESSAGE_ID))
            .filter_map(|id| std::str::from_utf8(id).ok())
            .map(quote)
            .collect();
        let keys: Vec<String> = rows.into_iter().map(|r| r.key).collect();
        let deleted = self.client.delete_rows(&self.table, &keys).await?;
        self.client.delete_rows(&self.index_table, &claims).await?;
        info!(deleted, ttl_seconds, table = %self.table, "expired events removed");
        Ok(deleted)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::simple_query(true)
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::production_ready(true)
    }
}

fn event_to_row(event: &Event, reverse: bool) -> StorageResult<ColumnRow> {
    let key = row_key(event.generated, &event.message_id, reverse)?;
    let raw = serde_json::to_vec(&event.raw)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let mut cells = BTreeMap::from([
        (COL_EVENT_TYPE.to_string(), event.event_type.as_bytes().to_vec()),
        (COL_MESSAGE_ID.to_string(), event.message_id.as_bytes().to_vec()),
        (
            COL_TIMESTAMP.to_string(),
            encode_value(&TraitValue::Datetime(event.generated)),
        ),
        (COL_RAW.to_string(), raw),
    ]);
    for t in &event.traits {
        cells.insert(trait_column(&t.name, t.dtype), encode_value(&t.value));
    }
    Ok(ColumnRow { key, cells })
}

fn row_to_event(row: &ColumnRow) -> StorageResult<Event> {
    let text = |column: &str| -> StorageResult<String> {
        let bytes = row.cells.get(column).ok_or_else(|| {
            StorageError::Serialization(format!("row {} lacks {column}", row.key))
        })?;
        String::from_utf8(bytes.clone()).map_err(|e| StorageError::Serialization(e.to_string()))
    };
    let generated = match row
        .cells
        .get(COL_TIMESTAMP)
        .map(|bytes| decode_value(TraitType::Datetime, bytes))
        .transpose()?
    {
        Some(TraitValue::Datetime(dt)) => dt,
        _ => {
            return Err(StorageError::Serialization(format!(
                "row {} has no usable {COL_TIMESTAMP}",
                row.key
            )))
        }
    };
    let raw = match row.cells.get(COL_RAW) {
        Some(bytes) if !bytes.is_empty() => serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Serialization(format!("row {}: {e}", row.key)))?,
        _ => crate::model::empty_raw(),
    };

    let mut traits = Vec::new();
    for (column, bytes) in &row.cells {
        if let Some((name, dtype)) = parse_trait_column(column)? {
            traits.push(Trait {
                name,
                dtype,
                value: decode_value(dtype, bytes)?,
            });
        }
    }
    traits.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Event {
        message_id: text(COL_MESSAGE_ID)?,
        event_type: text(COL_EVENT_TYPE)?,
        generated,
        traits,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TraitFilter;
    use chrono::{Duration, TimeZone, Utc};
    use futures::TryStreamExt;
    use serde_json::json;

    async fn store(reverse: bool) -> ColumnConnection {
        let conn = ColumnConnection::new(Arc::new(MemoryColumnStore::new()), "event", reverse);
        conn.upgrade().await.unwrap();
        conn
    }

    fn sample(id: &str, hour: u32, traits: Vec<Trait>) -> Event {
        let generated = Utc.with_ymd_and_hms(2013, 12, 31, hour, 0, 0).unwrap();
        Event::new(id, "compute.instance.create", generated, traits, json!({"id": id}))
    }

    async fn ids(conn: &ColumnConnection, filter: &EventFilter, page: Option<&Pagination>) -> Vec<String> {
        conn.get_events(filter, page)
            .await
            .unwrap()
            .map_ok(|e| e.message_id)
            .try_collect()
            .await
            .unwrap()
    }

    #[test]
    fn rows_round_trip_events() {
        let event = sample(
            "m/1",
            5,
            vec![
                Trait::text("a", "x"),
                Trait::int("b", -4),
                Trait::new("c", TraitValue::None),
            ],
        );
        let back = row_to_event(&event_to_row(&event, true).unwrap()).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn duplicates_are_skipped_and_pre_epoch_events_dropped() {
        let conn = store(false).await;
        let first = sample("a", 5, vec![Trait::text("k", "first")]);
        let again = sample("a", 6, vec![Trait::text("k", "second")]);
        let ancient = Event::new(
            "old",
            "t",
            Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap(),
            vec![],
            json!({}),
        );
        conn.record_events(&[first, again, ancient]).await.unwrap();

        let stored: Vec<Event> = conn
            .get_events(&EventFilter::new(), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].trait_value("k"), Some(&TraitValue::Text("first".into())));
    }

    #[tokio::test]
    async fn descending_tables_answer_the_same_queries() {
        for reverse in [false, true] {
            let conn = store(reverse).await;
            conn.record_events(&[
                sample("a", 5, vec![Trait::int("n", 1)]),
                sample("b", 6, vec![Trait::int("n", 2)]),
                sample("c", 7, vec![Trait::int("n", 3)]),
            ])
            .await
            .unwrap();

            let filter = EventFilter::new()
                .trait_filter(TraitFilter::new("n", TraitValue::Int(2)).with_op(ComparisonOp::Ge));
            assert_eq!(ids(&conn, &filter, Some(&Pagination::default())).await, ["b", "c"]);

            let page = Pagination {
                limit: Some(1),
                marker: Some("a".into()),
                sort: Vec::new(),
            };
            assert_eq!(ids(&conn, &EventFilter::new(), Some(&page)).await, ["b"]);
        }
    }

    #[tokio::test]
    async fn unknown_marker_is_rejected() {
        let conn = store(false).await;
        let page = Pagination {
            marker: Some("missing".into()),
            ..Pagination::default()
        };
        assert!(matches!(
            conn.get_events(&EventFilter::new(), Some(&page)).await,
            Err(StorageError::InvalidMarker(_))
        ));
    }

    #[tokio::test]
    async fn bounded_expiry_is_unsupported() {
        let conn = store(false).await;
        assert!(matches!(
            conn.clear_expired_data(60, Some(10)).await,
            Err(StorageError::BatchUnsupported(_))
        ));
        assert_eq!(conn.clear_expired_data(0, Some(10)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expiry_removes_only_old_rows() {
        let conn = store(true).await;
        let now = Utc::now();
        conn.record_events(&[
            Event::new("old", "t", now - Duration::hours(3), vec![], json!({})),
            Event::new("new", "t", now, vec![], json!({})),
        ])
        .await
        .unwrap();
        assert_eq!(conn.clear_expired_data(3600, None).await.unwrap(), 1);
        assert_eq!(ids(&conn, &EventFilter::new(), None).await, ["new"]);
        assert!(conn
            .client
            .get(conn.index_table(), "old")
            .await
            .unwrap()
            .is_none());
        assert!(conn.find_event("new").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_store_a_message_id_once() {
        for _ in 0..20 {
            let conn = Arc::new(store(false).await);
            let writers: Vec<_> = ["a", "b", "c", "d"]
                .into_iter()
                .enumerate()
                .map(|(i, tag)| {
                    let conn = Arc::clone(&conn);
                    let event = sample("dup", 5 + i as u32, vec![Trait::text("writer", tag)]);
                    tokio::spawn(async move { conn.insert_event(&event).await.map(|_| tag) })
                })
                .collect();
            let mut winners = Vec::new();
            for writer in writers {
                match writer.await.unwrap() {
                    Ok(tag) => winners.push(tag),
                    Err(e) => assert!(matches!(e, StorageError::Conflict(_)), "{e}"),
                }
            }
            assert_eq!(winners.len(), 1);

            let stored: Vec<Event> = conn
                .get_events(&EventFilter::new(), None)
                .await
                .unwrap()
                .try_collect()
                .await
                .unwrap();
            assert_eq!(stored.len(), 1);
            assert_eq!(
                stored[0].trait_value("writer"),
                Some(&TraitValue::Text(winners[0].into()))
            );
        }
    }

    #[derive(Default)]
    struct CountingScans {
        inner: MemoryColumnStore,
        scans: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ColumnClient for CountingScans {
        async fn create_table(&self, table: &str, family: &str) -> StorageResult<()> {
            self.inner.create_table(table, family).await
        }

        async fn truncate_table(&self, table: &str) -> StorageResult<()> {
            self.inner.truncate_table(table).await
        }

        async fn put(&self, table: &str, row: &ColumnRow) -> StorageResult<()> {
            self.inner.put(table, row).await
        }

        async fn get(&self, table: &str, key: &str) -> StorageResult<Option<ColumnRow>> {
            self.inner.get(table, key).await
        }

        async fn check_and_put(
            &self,
            table: &str,
            row: &ColumnRow,
            check_column: &str,
        ) -> StorageResult<bool> {
            self.inner.check_and_put(table, row, check_column).await
        }

        async fn scan(
            &self,
            table: &str,
            spec: &ScanSpec,
            limit: Option<usize>,
        ) -> StorageResult<Vec<ColumnRow>> {
            self.scans.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.scan(table, spec, limit).await
        }

        async fn delete_rows(&self, table: &str, keys: &[String]) -> StorageResult<u64> {
            self.inner.delete_rows(table, keys).await
        }
    }

    /// Three events per hour, written in an order unlike their ids.
    fn tied_hours() -> Vec<Event> {
        let mut events = Vec::new();
        for hour in 5..9 {
            for id in ["z", "m", "a"] {
                events.push(sample(&format!("{hour}{id}"), hour, vec![]));
            }
        }
        events
    }

    #[tokio::test]
    async fn key_order_streams_page_by_page() {
        let client = Arc::new(CountingScans::default());
        let conn = ColumnConnection::new(client.clone(), "event", false).with_scan_page(2);
        conn.upgrade().await.unwrap();
        conn.record_events(&tied_hours()).await.unwrap();

        let mut stream = conn.get_events(&EventFilter::new(), None).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.message_id, "5a");
        // the hour-5 group spans two pages; nothing past hour 6 was read
        assert_eq!(client.scans.load(std::sync::atomic::Ordering::SeqCst), 2);

        let rest: Vec<String> = stream.map_ok(|e| e.message_id).try_collect().await.unwrap();
        assert_eq!(
            rest,
            ["5m", "5z", "6a", "6m", "6z", "7a", "7m", "7z", "8a", "8m", "8z"]
        );
    }

    #[tokio::test]
    async fn paged_scans_agree_with_in_memory_ordering() {
        for reverse in [false, true] {
            let conn = ColumnConnection::new(Arc::new(MemoryColumnStore::new()), "event", reverse)
                .with_scan_page(2);
            conn.upgrade().await.unwrap();
            conn.record_events(&tied_hours()).await.unwrap();

            for sort in [["generated:asc", "message_id:desc"], ["generated:desc", "message_id:asc"]] {
                let mut expected = tied_hours();
                let page = Pagination::from_params(Some(4), Some("6m".into()), &sort[..]).unwrap();
                let marker = expected.iter().find(|e| e.message_id == "6m").cloned();
                expected = paginate_in_memory(expected, marker.as_ref(), &page);
                let expected: Vec<String> = expected.into_iter().map(|e| e.message_id).collect();

                assert_eq!(
                    ids(&conn, &EventFilter::new(), Some(&page)).await,
                    expected,
                    "reverse={reverse} sort={sort:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn table_name_follows_prefix_options() {
        let pool = ClientPool::<dyn ColumnClient>::new();
        let url = ConnectionUrl::parse("hbase://__test__/?table_prefix=panko&row_order=desc").unwrap();
        let conn = ColumnConnection::open(&url, &pool).await.unwrap();
        assert_eq!(conn.table(), "panko_event");
        assert_eq!(conn.index_table(), "panko_event_message_id");
        assert!(conn.reverse);

        let bad = ConnectionUrl::parse("hbase://__test__/?row_order=sideways").unwrap();
        assert!(matches!(
            ColumnConnection::open(&bad, &pool).await,
            Err(StorageError::Configuration(_))
        ));
    }
}
