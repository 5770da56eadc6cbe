//! Document backend (MongoDB).
//!
//! One document per event in the `event` collection:
//! `{_id: message_id, event_type, timestamp, generated_us, traits:
//! [{trait_name, trait_type, trait_value}], raw}`.
//!
//! BSON dates only hold milliseconds. `generated_us` keeps the full
//! microsecond timestamp as an Int64 and drives time windows, sorting and
//! pagination markers; `timestamp` exists for the server-side TTL index that
//! expiry is delegated to. Datetime trait values are stored as BSON dates and
//! are truncated to milliseconds.

mod query;

pub use query::{keyset_clause, make_query, make_sort};

use self::query::{micros, value_to_bson};
use crate::config::StorageConfig;
use crate::connection_url::ConnectionUrl;
use crate::filter::EventFilter;
use crate::model::{
    Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor, TraitType, TraitValue,
};
use crate::pagination::{marker_not_found, Pagination, DEFAULT_SORT};
use crate::pool::ClientPool;
use crate::traits::{Connection, EventStream};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::DateTime;
use futures::{StreamExt, TryStreamExt};
use mongodb::error::{ErrorKind, WriteFailure, RETRYABLE_WRITE_ERROR};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const COLLECTION: &str = "event";
const TYPE_INDEX: &str = "event_type_idx";
const TTL_INDEX: &str = "event_ttl";
const MIN_VERSION: [i64; 2] = [2, 4];

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_SPEC_CONFLICT: i32 = 86;

/// Event store on a MongoDB database.
#[derive(Clone)]
pub struct MongoConnection {
    // Keeps the pooled client alive for as long as this connection.
    _client: Arc<Client>,
    db: Database,
}

impl MongoConnection {
    /// Connect, verify the server version and bring up indexes. Clients are
    /// shared per endpoint and user.
    pub async fn open(
        url: &ConnectionUrl,
        _config: &StorageConfig,
        pool: &ClientPool<Client>,
    ) -> StorageResult<Self> {
        let database = url.database().ok_or_else(|| {
            StorageError::Configuration("mongodb url names no database".into())
        })?;
        let target = url.without_driver();
        let client = pool
            .get_or_connect(&pool_key(url), || async move {
                let client = Client::with_uri_str(&target)
                    .await
                    .map_err(map_mongo_error)?;
                Ok(Arc::new(client))
            })
            .await?;

        let build_info = client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 }, None)
            .await
            .map_err(map_mongo_error)?;
        check_version(&build_info)?;

        let conn = Self {
            db: client.database(database),
            _client: client,
        };
        conn.upgrade().await?;
        Ok(conn)
    }

    fn events(&self) -> Collection<Document> {
        self.db.collection(COLLECTION)
    }

    async fn index_names(&self) -> StorageResult<Vec<String>> {
        match self.events().list_index_names().await {
            Ok(names) => Ok(names),
            Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(Vec::new()),
            Err(e) => Err(map_mongo_error(e)),
        }
    }

    /// Create an index, replacing a same-named one built with another spec.
    async fn ensure_index(&self, build: impl Fn() -> IndexModel, name: &str) -> StorageResult<()> {
        match self.events().create_index(build(), None).await {
            Ok(_) => Ok(()),
            Err(e) if command_code(&e) == Some(INDEX_SPEC_CONFLICT) => {
                info!(index = name, "index will be recreated");
                self.events()
                    .drop_index(name, None)
                    .await
                    .map_err(map_mongo_error)?;
                self.events()
                    .create_index(build(), None)
                    .await
                    .map_err(map_mongo_error)?;
                Ok(())
            }
            Err(e) => Err(map_mongo_error(e)),
        }
    }

    /// Create, retune or drop the expiring index on `timestamp`.
    async fn update_ttl(&self, ttl_seconds: i64) -> StorageResult<()> {
        let present = self.index_names().await?.iter().any(|n| n == TTL_INDEX);
        if ttl_seconds <= 0 {
            if present {
                self.events()
                    .drop_index(TTL_INDEX, None)
                    .await
                    .map_err(map_mongo_error)?;
            }
            return Ok(());
        }
        if present {
            self.db
                .run_command(
                    doc! {
                        "collMod": COLLECTION,
                        "index": { "keyPattern": { "timestamp": 1 }, "expireAfterSeconds": ttl_seconds },
                    },
                    None,
                )
                .await
                .map_err(map_mongo_error)?;
            return Ok(());
        }
        let model = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX.to_string())
                    .expire_after(Duration::from_secs(ttl_seconds.unsigned_abs()))
                    .build(),
            )
            .build();
        self.events()
            .create_index(model, None)
            .await
            .map_err(map_mongo_error)?;
        Ok(())
    }

    async fn find_event(&self, message_id: &str) -> StorageResult<Option<Event>> {
        self.events()
            .find_one(doc! { "_id": message_id }, None)
            .await
            .map_err(map_mongo_error)?
            .map(|d| document_to_event(&d))
            .transpose()
    }

    async fn scan_traits(&self, query: Document) -> StorageResult<Vec<Trait>> {
        let options = FindOptions::builder()
            .projection(doc! { "traits": 1 })
            .build();
        let docs: Vec<Document> = self
            .events()
            .find(query, options)
            .await
            .map_err(map_mongo_error)?
            .try_collect()
            .await
            .map_err(map_mongo_error)?;
        let mut traits = Vec::new();
        for d in &docs {
            traits.extend(document_traits(d)?);
        }
        Ok(traits)
    }
}

#[async_trait]
impl Connection for MongoConnection {
    async fn upgrade(&self) -> StorageResult<()> {
        self.ensure_index(
            || {
                IndexModel::builder()
                    .keys(doc! { "event_type": 1, "generated_us": 1 })
                    .options(IndexOptions::builder().name(TYPE_INDEX.to_string()).build())
                    .build()
            },
            TYPE_INDEX,
        )
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.db.drop(None).await.map_err(map_mongo_error)
    }

    async fn record_events(&self, events: &[Event]) -> StorageResult<()> {
        let mut failure = None;
        for event in events {
            if let Err(e) = event.validate() {
                warn!(error = %e, "dropping malformed event");
                continue;
            }
            let outcome = match event_to_document(event) {
                Ok(document) => self
                    .events()
                    .insert_one(document, None)
                    .await
                    .map(drop)
                    .map_err(map_mongo_error),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {}
                Err(StorageError::Conflict(reason)) => {
                    info!(message_id = %event.message_id, %reason, "duplicate event detected, skipping it");
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
        let sort = match pagination {
            Some(p) => p.sort_or_default(),
            None => &DEFAULT_SORT,
        };
        let keyset = match pagination.and_then(|p| p.marker.as_deref()) {
            Some(id) => {
                let marker = self
                    .find_event(id)
                    .await?
                    .ok_or_else(|| marker_not_found(id))?;
                Some(keyset_clause(&marker, sort))
            }
            None => None,
        };
        let query = make_query(filter, keyset)?;
        let options = FindOptions::builder()
            .sort(make_sort(sort))
            .limit(pagination.and_then(|p| p.limit).map(|n| n as i64))
            .build();
        let cursor = self
            .events()
            .find(query, options)
            .await
            .map_err(map_mongo_error)?;
        Ok(cursor
            .map(|item| item.map_err(map_mongo_error).and_then(|d| document_to_event(&d)))
            .boxed())
    }

    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        let values = self
            .events()
            .distinct("event_type", None, None)
            .await
            .map_err(map_mongo_error)?;
        let types: BTreeSet<String> = values
            .into_iter()
            .filter_map(|b| match b {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let found: BTreeSet<TraitDescriptor> = self
            .scan_traits(doc! { "event_type": event_type })
            .await?
            .into_iter()
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
        let query = match trait_name {
            Some(name) => doc! { "event_type": event_type, "traits.trait_name": name },
            None => doc! { "event_type": event_type },
        };
        let mut traits: Vec<Trait> = self
            .scan_traits(query)
            .await?
            .into_iter()
            .filter(|t| trait_name.map_or(true, |n| t.name == n))
            .collect();
        traits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(traits)
    }

    /// Expiry runs server-side; this only keeps the TTL index in step and
    /// always reports zero deletions.
    async fn clear_expired_data(
        &self,
        ttl_seconds: i64,
        _max_batch: Option<u64>,
    ) -> StorageResult<u64> {
        self.update_ttl(ttl_seconds).await?;
        info!(
            ttl_seconds,
            "clearing expired event data is based on the native TTL index and runs in the background"
        );
        Ok(0)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::simple_query(true)
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::production_ready(true)
    }
}

/// Client identity: endpoint plus user, never the password.
///
/// A driver client carries its credentials, so each user needs its own. The
/// database is picked per connection from a shared client and stays out of
/// the key.
fn pool_key(url: &ConnectionUrl) -> String {
    match url.username() {
        Some(user) => format!("{user}@{}", url.endpoint_key()),
        None => url.endpoint_key(),
    }
}

fn check_version(build_info: &Document) -> StorageResult<()> {
    let version: Vec<i64> = build_info
        .get_array("versionArray")
        .map_err(|e| StorageError::Backend(format!("buildInfo without versionArray: {e}")))?
        .iter()
        .filter_map(|v| match v {
            Bson::Int32(i) => Some(i64::from(*i)),
            Bson::Int64(i) => Some(*i),
            Bson::Double(f) => Some(*f as i64),
            _ => None,
        })
        .collect();
    if version.as_slice() < MIN_VERSION.as_slice() {
        return Err(StorageError::BadVersion(format!(
            "need at least MongoDB {}.{}, server reports {version:?}",
            MIN_VERSION[0], MIN_VERSION[1]
        )));
    }
    Ok(())
}

fn event_to_document(event: &Event) -> StorageResult<Document> {
    let traits: Vec<Document> = event
        .traits
        .iter()
        .map(|t| {
            doc! {
                "trait_name": t.name.as_str(),
                "trait_type": i32::from(t.dtype.ordinal()),
                "trait_value": value_to_bson(&t.value),
            }
        })
        .collect();
    let raw = bson::to_bson(&event.raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(doc! {
        "_id": event.message_id.as_str(),
        "event_type": event.event_type.as_str(),
        "timestamp": bson::DateTime::from_chrono(event.generated),
        "generated_us": micros(event.generated),
        "traits": traits,
        "raw": raw,
    })
}

fn bson_to_value(dtype: TraitType, value: &Bson) -> StorageResult<TraitValue> {
    Ok(match (dtype, value) {
        (_, Bson::Null) | (TraitType::None, _) => TraitValue::None,
        (TraitType::Text, Bson::String(s)) => TraitValue::Text(s.clone()),
        (TraitType::Int, Bson::Int64(i)) => TraitValue::Int(*i),
        (TraitType::Int, Bson::Int32(i)) => TraitValue::Int(i64::from(*i)),
        (TraitType::Float, Bson::Double(f)) => TraitValue::Float(*f),
        (TraitType::Float, Bson::Int64(i)) => TraitValue::Float(*i as f64),
        (TraitType::Float, Bson::Int32(i)) => TraitValue::Float(f64::from(*i)),
        (TraitType::Datetime, Bson::DateTime(dt)) => TraitValue::Datetime(dt.to_chrono()),
        (dtype, other) => {
            return Err(StorageError::Serialization(format!(
                "stored {dtype} trait holds {:?}",
                other.element_type()
            )))
        }
    })
}

fn document_traits(document: &Document) -> StorageResult<Vec<Trait>> {
    let Ok(items) = document.get_array("traits") else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .filter_map(Bson::as_document)
        .map(|t| {
            let bad = |e: bson::document::ValueAccessError| StorageError::Serialization(e.to_string());
            let name = t.get_str("trait_name").map_err(bad)?.to_string();
            let ordinal = match t.get("trait_type") {
                Some(Bson::Int32(i)) => i64::from(*i),
                Some(Bson::Int64(i)) => *i,
                _ => {
                    return Err(StorageError::Serialization(format!(
                        "trait {name} has no trait_type"
                    )))
                }
            };
            let dtype = TraitType::from_ordinal(ordinal)?;
            let value = bson_to_value(dtype, t.get("trait_value").unwrap_or(&Bson::Null))?;
            Ok(Trait {
                name,
                dtype: value.dtype(),
                value,
            })
        })
        .collect()
}

fn document_to_event(document: &Document) -> StorageResult<Event> {
    let bad = |e: bson::document::ValueAccessError| StorageError::Serialization(e.to_string());
    let mut traits = document_traits(document)?;
    traits.sort_by(|a, b| a.name.cmp(&b.name));
    let raw = match document.get("raw") {
        None | Some(Bson::Null) => crate::model::empty_raw(),
        Some(raw) => raw.clone().into_relaxed_extjson(),
    };
    let generated = match document.get_i64("generated_us") {
        Ok(us) => DateTime::from_timestamp_micros(us).ok_or_else(|| {
            StorageError::Serialization(format!("timestamp {us} is out of range"))
        })?,
        // Documents written before generated_us existed.
        Err(_) => document.get_datetime("timestamp").map_err(bad)?.to_chrono(),
    };
    Ok(Event {
        message_id: document.get_str("_id").map_err(bad)?.to_string(),
        event_type: document.get_str("event_type").map_err(bad)?.to_string(),
        generated,
        traits,
        raw,
    })
}

fn command_code(err: &mongodb::error::Error) -> Option<i32> {
    match &*err.kind {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

/// Classify driver errors: lost connectivity is transient, duplicate `_id`
/// writes are conflicts.
pub(crate) fn map_mongo_error(err: mongodb::error::Error) -> StorageError {
    if err.contains_label(RETRYABLE_WRITE_ERROR) {
        return StorageError::Transient(err.to_string());
    }
    match &*err.kind {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StorageError::Transient(err.to_string()),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            StorageError::Conflict(write.message.clone())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}
