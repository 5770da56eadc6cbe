//! Search engine backend (Elasticsearch).
//!
//! One document per event in a single index, `_id` = message id:
//! `{message_id, event_type, timestamp, generated_us, traits: [{name, dtype,
//! text|int|float|datetime}], raw}`. `upgrade` installs an index template
//! mapping `traits` as `nested`, so a trait predicate matches name, dtype and
//! value on one element. Writes go through `_bulk` `create` actions and a
//! 409 marks a duplicate message id.
//!
//! URL: `es://[user:pass@]host[:port][/prefix]?refresh=true`. The host
//! `__test__` selects a private in-process engine.

mod inmemory;
mod query;
mod rest;

pub use inmemory::MemorySearchStore;
pub use query::{make_query, make_sort, search_after};
pub use rest::RestSearchClient;

use self::query::{
    trait_value_field, value_to_json, FIELD_EVENT_TYPE, FIELD_GENERATED, FIELD_MESSAGE_ID,
    TRAITS_PATH,
};
use crate::config::StorageConfig;
use crate::connection_url::ConnectionUrl;
use crate::expirer::expiry_cutoff;
use crate::filter::{ComparisonOp, EventFilter};
use crate::model::{
    Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor, TraitType, TraitValue,
};
use crate::pagination::{marker_not_found, Pagination, SortDir, SortKey, SortSpec, DEFAULT_SORT};
use crate::pool::ClientPool;
use crate::traits::{Connection, EventStream};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const TEST_HOST: &str = "__test__";
const DEFAULT_PORT: u16 = 9200;
const TEMPLATE_SUFFIX: &str = "_template";
const BULK_CHUNK: usize = 500;
const SEARCH_PAGE: usize = 1000;

/// One `_bulk` `create` action.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCreate {
    pub id: String,
    pub source: Value,
}

/// Per-action `_bulk` outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItem {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

/// The slice of the search engine API the event layout needs.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn put_index_template(&self, name: &str, template: &Value) -> StorageResult<()>;

    /// Create `index` unless it exists.
    async fn create_index(&self, index: &str) -> StorageResult<()>;

    /// Drop `index`; a missing index is not an error.
    async fn delete_index(&self, index: &str) -> StorageResult<()>;

    /// Create-only bulk write. Items come back in request order.
    async fn bulk_create(
        &self,
        index: &str,
        actions: &[BulkCreate],
        refresh: bool,
    ) -> StorageResult<Vec<BulkItem>>;

    /// `_search` with a full request body; the raw response. A missing index
    /// answers with no hits.
    async fn search(&self, index: &str, body: &Value) -> StorageResult<Value>;

    /// `_delete_by_query`, optionally capped at `max_docs`. Returns the
    /// number of documents deleted.
    async fn delete_by_query(
        &self,
        index: &str,
        query: &Value,
        max_docs: Option<u64>,
    ) -> StorageResult<u64>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: HitsEnvelope,
    #[serde(default)]
    aggregations: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Value,
}

fn parse_response(raw: Value) -> StorageResult<SearchResponse> {
    serde_json::from_value(raw)
        .map_err(|e| StorageError::Serialization(format!("unexpected search response: {e}")))
}

/// Event store on a search client.
#[derive(Clone)]
pub struct EsConnection {
    client: Arc<dyn SearchClient>,
    index: String,
    refresh: bool,
    page_size: usize,
}

impl EsConnection {
    pub fn new(client: Arc<dyn SearchClient>, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            refresh: false,
            page_size: SEARCH_PAGE,
        }
    }

    /// Make every bulk write visible to searches before it returns.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Hits requested per search while streaming query results.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Open against the cluster named by `url`, sharing one client per
    /// endpoint and user.
    pub async fn open(
        url: &ConnectionUrl,
        config: &StorageConfig,
        pool: &ClientPool<dyn SearchClient>,
    ) -> StorageResult<Self> {
        let host = url
            .hosts()
            .first()
            .ok_or_else(|| StorageError::Configuration("elasticsearch url names no host".into()))?;
        let refresh = matches!(url.option("refresh"), Some("true" | "wait_for"));

        let client: Arc<dyn SearchClient> = if host.host == TEST_HOST {
            Arc::new(MemorySearchStore::new())
        } else {
            let scheme = if config.es_ssl_enabled { "https" } else { "http" };
            let mut endpoint = format!(
                "{scheme}://{}:{}",
                host.host,
                host.port.unwrap_or(DEFAULT_PORT)
            );
            if let Some(prefix) = url.path().filter(|p| !p.is_empty()) {
                endpoint = format!("{endpoint}/{}", prefix.trim_matches('/'));
            }
            let credentials = url
                .username()
                .map(|user| (user.to_string(), url.password().map(str::to_string)));
            let key = match &credentials {
                Some((user, _)) => format!("{user}@{endpoint}"),
                None => endpoint.clone(),
            };
            pool.get_or_connect(&key, || {
                let client = RestSearchClient::new(&endpoint, credentials);
                async move { Ok(Arc::new(client?) as Arc<dyn SearchClient>) }
            })
            .await?
        };
        Ok(Self::new(client, config.es_index_name.clone()).with_refresh(refresh))
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn template(&self) -> Value {
        json!({
            "index_patterns": [self.index],
            "template": {
                "mappings": {
                    "dynamic": false,
                    "properties": {
                        FIELD_MESSAGE_ID: { "type": "keyword" },
                        FIELD_EVENT_TYPE: { "type": "keyword" },
                        "timestamp": { "type": "date" },
                        FIELD_GENERATED: { "type": "long" },
                        TRAITS_PATH: {
                            "type": "nested",
                            "properties": {
                                "name": { "type": "keyword" },
                                "dtype": { "type": "byte" },
                                "text": { "type": "keyword" },
                                "int": { "type": "long" },
                                "float": { "type": "double" },
                                "datetime": { "type": "long" },
                            }
                        },
                        "raw": { "type": "object", "enabled": false },
                    }
                }
            }
        })
    }

    async fn search_page(&self, body: &Value) -> StorageResult<Vec<Event>> {
        let response = parse_response(self.client.search(&self.index, body).await?)?;
        response
            .hits
            .hits
            .iter()
            .map(|hit| document_to_event(&hit.source))
            .collect()
    }

    async fn find_event(&self, message_id: &str) -> StorageResult<Option<Event>> {
        let body = json!({
            "query": { "term": { FIELD_MESSAGE_ID: message_id } },
            "size": 1,
        });
        Ok(self.search_page(&body).await?.pop())
    }

    /// Page through every match with `search_after`, lazily.
    fn stream_query(
        &self,
        query: Value,
        sort: Vec<SortSpec>,
        marker: Option<Event>,
        limit: Option<usize>,
    ) -> EventStream {
        let conn = self.clone();
        let events = async_stream::try_stream! {
            let mut after = marker.map(|m| search_after(&m, &sort));
            let mut remaining = limit;
            loop {
                let size = remaining.map_or(conn.page_size, |n| n.min(conn.page_size));
                if size == 0 {
                    break;
                }
                let mut body = json!({
                    "query": query,
                    "sort": make_sort(&sort),
                    "size": size,
                    "track_total_hits": false,
                });
                if let Some(after) = &after {
                    body["search_after"] = after.clone();
                }
                let page = conn.search_page(&body).await?;
                let fetched = page.len();
                after = page.last().map(|last| search_after(last, &sort));
                for event in page {
                    yield event;
                }
                if let Some(n) = remaining.as_mut() {
                    *n -= fetched;
                }
                if fetched < size {
                    break;
                }
            }
        };
        events.boxed()
    }

    /// Every event of `event_type`, optionally only those carrying `trait_name`.
    async fn events_of_type(
        &self,
        event_type: &str,
        trait_name: Option<&str>,
    ) -> StorageResult<Vec<Event>> {
        let mut clauses = vec![json!({ "term": { FIELD_EVENT_TYPE: event_type } })];
        if let Some(name) = trait_name {
            clauses.push(json!({ "nested": {
                "path": TRAITS_PATH,
                "query": { "term": { "traits.name": name } },
            }}));
        }
        let query = json!({ "bool": { "filter": clauses } });
        let sort = vec![
            SortSpec::new(SortKey::Generated, SortDir::Asc),
            SortSpec::new(SortKey::MessageId, SortDir::Asc),
        ];
        let mut events = Vec::new();
        let mut stream = self.stream_query(query, sort, None, None);
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(events)
    }
}

#[async_trait]
impl Connection for EsConnection {
    async fn upgrade(&self) -> StorageResult<()> {
        let name = format!("{}{TEMPLATE_SUFFIX}", self.index);
        self.client.put_index_template(&name, &self.template()).await?;
        self.client.create_index(&self.index).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.client.delete_index(&self.index).await
    }

    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        let mut failure = None;
        let mut actions = Vec::with_capacity(events.len().min(BULK_CHUNK));
        for event in events {
            if let Err(e) = event.validate() {
                warn!(error = %e, "dropping malformed event");
                continue;
            }
            match event_to_document(event) {
                Ok(source) => actions.push(BulkCreate {
                    id: event.message_id.clone(),
                    source,
                }),
                Err(StorageError::InvalidInput(reason)) => {
                    warn!(message_id = %event.message_id, %reason, "dropping event the index cannot hold");
                }
                Err(e) => {
                    error!(message_id = %event.message_id, error = %e, "failed to record event");
                    failure = Some(e);
                }
            }
        }

        for chunk in actions.chunks(BULK_CHUNK) {
            let items = match self.client.bulk_create(&self.index, chunk, self.refresh).await {
                Ok(items) => items,
                Err(e) => {
                    error!(events = chunk.len(), error = %e, "bulk write failed");
                    failure = Some(e);
                    continue;
                }
            };
            for item in items {
                if item.is_success() {
                    continue;
                }
                let reason = item.error.clone().unwrap_or_default();
                if item.is_conflict() {
                    info!(message_id = %item.id, %reason, "duplicate event detected, skipping it");
                } else {
                    error!(message_id = %item.id, status = item.status, %reason, "failed to record event");
                    failure = Some(StorageError::Backend(format!(
                        "event {} rejected with status {}: {reason}",
                        item.id, item.status
                    )));
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
        let sort = match pagination {
            Some(p) => p.sort_or_default(),
            None => &DEFAULT_SORT,
        };
        let query = make_query(filter)?;
        let marker = match pagination.and_then(|p| p.marker.as_deref()) {
            Some(id) => Some(
                self.find_event(id)
                    .await?
                    .ok_or_else(|| marker_not_found(id))?,
            ),
            None => None,
        };
        let limit = pagination.and_then(|p| p.limit);
        Ok(self.stream_query(query, sort.to_vec(), marker, limit))
    }

    /// Distinct types through a paged `composite` aggregation.
    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        let mut types = BTreeSet::new();
        let mut after: Option<Value> = None;
        loop {
            let mut composite = json!({
                "size": self.page_size,
                "sources": [{ FIELD_EVENT_TYPE: { "terms": { "field": FIELD_EVENT_TYPE } } }],
            });
            if let Some(key) = after.take() {
                composite["after"] = key;
            }
            let body = json!({
                "size": 0,
                "aggs": { "types": { "composite": composite } },
            });
            let response = parse_response(self.client.search(&self.index, &body).await?)?;
            let Some(agg) = response.aggregations.as_ref().map(|a| &a["types"]) else {
                break;
            };
            let buckets = agg["buckets"].as_array().map(Vec::as_slice).unwrap_or_default();
            for bucket in buckets {
                if let Some(name) = bucket["key"][FIELD_EVENT_TYPE].as_str() {
                    types.insert(name.to_string());
                }
            }
            match agg.get("after_key") {
                Some(key) if buckets.len() == self.page_size => after = Some(key.clone()),
                _ => break,
            }
        }
        Ok(types.into_iter().collect())
    }

    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let found: BTreeSet<TraitDescriptor> = self
            .events_of_type(event_type, None)
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
            .events_of_type(event_type, trait_name)
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
        let Some(cutoff) = expiry_cutoff(ttl_seconds) else {
            return Ok(0);
        };
        let query = make_query(&EventFilter::new().end(cutoff, ComparisonOp::Lt))?;
        let deleted = self
            .client
            .delete_by_query(&self.index, &query, max_batch.filter(|b| *b > 0))
            .await?;
        info!(deleted, ttl_seconds, index = %self.index, "expired events removed");
        Ok(deleted)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::simple_query(true)
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::production_ready(true)
    }
}

fn event_to_document(event: &Event) -> StorageResult<Value> {
    let traits = event
        .traits
        .iter()
        .map(|t| {
            let mut doc = json!({ "name": t.name, "dtype": t.dtype.ordinal() });
            if let Some(field) = trait_value_field(t.dtype) {
                doc[field] = value_to_json(&t.value)?;
            }
            Ok(doc)
        })
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(json!({
        FIELD_MESSAGE_ID: event.message_id,
        FIELD_EVENT_TYPE: event.event_type,
        "timestamp": event.generated.to_rfc3339_opts(SecondsFormat::Micros, true),
        FIELD_GENERATED: event.generated.timestamp_micros(),
        TRAITS_PATH: traits,
        "raw": event.raw,
    }))
}

fn document_to_event(source: &Value) -> StorageResult<Event> {
    let bad = |what: &str| StorageError::Serialization(format!("document lacks {what}: {source}"));
    let text = |field: &str| {
        source[field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| bad(field))
    };
    let micros = source[FIELD_GENERATED]
        .as_i64()
        .ok_or_else(|| bad(FIELD_GENERATED))?;
    let generated = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp {micros} is out of range")))?;

    let mut traits = Vec::new();
    for item in source[TRAITS_PATH].as_array().map(Vec::as_slice).unwrap_or_default() {
        let name = item["name"].as_str().ok_or_else(|| bad("trait name"))?;
        let ordinal = item["dtype"].as_i64().ok_or_else(|| bad("trait dtype"))?;
        let dtype = TraitType::from_ordinal(ordinal)?;
        let raw = trait_value_field(dtype).map_or(&Value::Null, |field| &item[field]);
        let value = match (dtype, raw) {
            (TraitType::None, _) | (_, Value::Null) => TraitValue::None,
            (TraitType::Datetime, v) => {
                let us = v.as_i64().ok_or_else(|| bad("trait datetime"))?;
                TraitValue::Datetime(DateTime::from_timestamp_micros(us).ok_or_else(|| {
                    StorageError::Serialization(format!("timestamp {us} is out of range"))
                })?)
            }
            (dtype, v) => TraitValue::convert(dtype, v)?,
        };
        traits.push(Trait {
            name: name.to_string(),
            dtype: value.dtype(),
            value,
        });
    }
    traits.sort_by(|a, b| a.name.cmp(&b.name));

    let raw = match &source["raw"] {
        Value::Null => crate::model::empty_raw(),
        raw => raw.clone(),
    };
    Ok(Event {
        message_id: text(FIELD_MESSAGE_ID)?,
        event_type: text(FIELD_EVENT_TYPE)?,
        generated,
        traits,
        raw,
    })
}
