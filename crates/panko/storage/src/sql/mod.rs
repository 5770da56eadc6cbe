//! Relational backend (PostgreSQL, MySQL, SQLite) over `sqlx`'s `Any` driver.
//!
//! Event types are normalised into `event_type`; traits are split by dtype
//! into `trait_text`, `trait_int`, `trait_float` and `trait_datetime`.
//! Timestamps are stored as microseconds since the epoch.

mod dialect;
mod query;
mod schema;

pub use dialect::{Dialect, SqlBuilder, SqlParam};

use self::query::{from_micros, select_events, to_micros, Marker};
use self::schema::{trait_table, TRAIT_TABLES};
use crate::connection_url::ConnectionUrl;
use crate::expirer::expiry_cutoff;
use crate::filter::EventFilter;
use crate::model::{
    Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor, TraitType, TraitValue,
};
use crate::pagination::{marker_not_found, Pagination, SortSpec, DEFAULT_SORT};
use crate::pool::ClientPool;
use crate::traits::{Connection, EventStream};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

const ID_CHUNK: usize = 500;
const EXPIRY_CHUNK: u64 = 1000;

/// Relational event store.
///
/// Query results stream a page at a time: each page is one keyset query
/// followed by one trait lookup, and no connection is held between pages.
#[derive(Clone)]
pub struct SqlConnection {
    pool: Arc<AnyPool>,
    dialect: Dialect,
    page_size: usize,
}

impl SqlConnection {
    /// Open a connection, sharing pooled handles per database. In-memory
    /// SQLite databases are private to the connection that opened them.
    pub async fn open(url: &ConnectionUrl, pool: &ClientPool<AnyPool>) -> StorageResult<Self> {
        let dialect = Dialect::from_family(url.family())?;
        let target = dress_url(url);
        let handle = if is_in_memory(url) {
            connect_pool(&target, true).await?
        } else {
            pool.get_or_connect(&pool_key(url), || connect_pool(&target, false))
                .await?
        };
        Ok(Self {
            pool: handle,
            dialect,
            page_size: ID_CHUNK,
        })
    }

    /// Rows fetched per round trip while streaming query results.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn find_event_type(&self, name: &str) -> StorageResult<Option<i64>> {
        let mut q = SqlBuilder::new(self.dialect);
        q.push("SELECT id FROM event_type WHERE name = ").bind(name);
        let row = q
            .query()
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| r.try_get::<i64, _>(0).map_err(map_sqlx_error))
            .transpose()
    }

    async fn insert_returning_id(
        &self,
        q: &mut SqlBuilder,
        executor: &mut sqlx::AnyConnection,
    ) -> StorageResult<i64> {
        if self.dialect.returns_ids() {
            q.push(" RETURNING id");
            let row = q
                .query()
                .fetch_one(&mut *executor)
                .await
                .map_err(map_sqlx_error)?;
            row.try_get::<i64, _>(0).map_err(map_sqlx_error)
        } else {
            q.query()
                .execute(&mut *executor)
                .await
                .map_err(map_sqlx_error)?
                .last_insert_id()
                .ok_or_else(|| StorageError::Backend("driver returned no insert id".into()))
        }
    }

    /// Look the type up by name, inserting it when absent.
    async fn event_type_id(&self, name: &str) -> StorageResult<i64> {
        if let Some(id) = self.find_event_type(name).await? {
            return Ok(id);
        }
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        let mut q = SqlBuilder::new(self.dialect);
        q.push("INSERT INTO event_type (name) VALUES (").bind(name).push(")");
        match self.insert_returning_id(&mut q, &mut *conn).await {
            Ok(id) => Ok(id),
            // Another writer created it first.
            Err(StorageError::Conflict(_)) => {
                drop(conn);
                self.find_event_type(name).await?.ok_or_else(|| {
                    StorageError::Backend(format!("event type `{name}` vanished after conflict"))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_event(&self, event: &Event) -> StorageResult<()> {
        let type_id = self.event_type_id(&event.event_type).await?;
        let raw = serde_json::to_string(&event.raw)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut q = SqlBuilder::new(self.dialect);
        q.push("INSERT INTO event (message_id, generated, event_type_id, raw) VALUES ")
            .bind_list([
                SqlParam::from(event.message_id.as_str()),
                SqlParam::Int(to_micros(event.generated)),
                SqlParam::Int(type_id),
                SqlParam::Text(raw),
            ]);
        let event_id = self.insert_returning_id(&mut q, &mut *tx).await?;

        let mut by_table: HashMap<&'static str, Vec<&Trait>> = HashMap::new();
        for t in &event.traits {
            by_table.entry(trait_table(t.dtype)).or_default().push(t);
        }
        for (table, traits) in by_table {
            let mut q = SqlBuilder::new(self.dialect);
            q.push(&format!("INSERT INTO {table} (event_id, name, value) VALUES "));
            for (i, t) in traits.iter().enumerate() {
                if i > 0 {
                    q.push(", ");
                }
                q.bind_list([
                    SqlParam::Int(event_id),
                    SqlParam::from(t.name.as_str()),
                    query::value_param(&t.value),
                ]);
            }
            q.query()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn marker(&self, message_id: &str) -> StorageResult<Marker> {
        let mut q = SqlBuilder::new(self.dialect);
        q.push("SELECT generated, message_id FROM event WHERE message_id = ")
            .bind(message_id);
        let row = q
            .query()
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| marker_not_found(message_id))?;
        Ok(Marker {
            generated: row.try_get(0).map_err(map_sqlx_error)?,
            message_id: row.try_get(1).map_err(map_sqlx_error)?,
        })
    }

    /// One keyset page of events with their traits attached.
    async fn fetch_page(
        &self,
        filter: &EventFilter,
        sort: &[SortSpec],
        marker: Option<&Marker>,
        size: usize,
    ) -> StorageResult<Vec<Event>> {
        let q = select_events(self.dialect, filter, sort, marker, Some(size))?;
        let rows = q
            .query()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        let events = rows
            .iter()
            .map(row_to_event)
            .collect::<StorageResult<Vec<_>>>()?;
        drop(rows);

        let ids: Vec<i64> = events.iter().map(|(id, _)| *id).collect();
        let mut traits = self.load_traits(&ids).await?;
        Ok(events
            .into_iter()
            .map(|(id, mut event)| {
                event.traits = traits.remove(&id).unwrap_or_default();
                event
            })
            .collect())
    }

    async fn load_traits(&self, event_ids: &[i64]) -> StorageResult<HashMap<i64, Vec<Trait>>> {
        let mut traits: HashMap<i64, Vec<Trait>> = HashMap::new();
        for chunk in event_ids.chunks(ID_CHUNK) {
            for (table, dtype) in TRAIT_TABLES {
                let mut q = SqlBuilder::new(self.dialect);
                q.push(&format!(
                    "SELECT event_id, name, value FROM {table} WHERE event_id IN "
                ))
                .bind_list(chunk.iter().copied());
                let rows = q
                    .query()
                    .fetch_all(self.pool.as_ref())
                    .await
                    .map_err(map_sqlx_error)?;
                for row in rows {
                    let event_id: i64 = row.try_get(0).map_err(map_sqlx_error)?;
                    let name: String = row.try_get(1).map_err(map_sqlx_error)?;
                    let value = decode_value(&row, 2, dtype)?;
                    traits.entry(event_id).or_default().push(Trait {
                        name,
                        dtype: value.dtype(),
                        value,
                    });
                }
            }
        }
        for list in traits.values_mut() {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(traits)
    }

    async fn expired_ids(&self, cutoff: i64, limit: u64) -> StorageResult<Vec<i64>> {
        let mut q = SqlBuilder::new(self.dialect);
        q.push("SELECT id FROM event WHERE generated < ")
            .bind(cutoff)
            .push(&format!(" ORDER BY generated LIMIT {limit}"));
        let rows = q
            .query()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>(0).map_err(map_sqlx_error))
            .collect()
    }

    async fn delete_events(&self, ids: &[i64]) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (table, _) in TRAIT_TABLES {
            let mut q = SqlBuilder::new(self.dialect);
            q.push(&format!("DELETE FROM {table} WHERE event_id IN "))
                .bind_list(ids.iter().copied());
            q.query()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        let mut q = SqlBuilder::new(self.dialect);
        q.push("DELETE FROM event WHERE id IN ")
            .bind_list(ids.iter().copied());
        let deleted = q
            .query()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(deleted)
    }

    async fn execute(&self, sql: &str) -> StorageResult<()> {
        sqlx::query(sql)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Connection for SqlConnection {
    async fn upgrade(&self) -> StorageResult<()> {
        for stmt in schema::ddl(self.dialect) {
            sqlx::query(&stmt)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        for (table, _) in TRAIT_TABLES {
            self.execute(&format!("DELETE FROM {table}")).await?;
        }
        self.execute("DELETE FROM event").await?;
        self.execute("DELETE FROM event_type").await
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
        let sort: &[SortSpec] = match pagination {
            Some(p) => p.sort_or_default(),
            None => &DEFAULT_SORT,
        };
        let marker = match pagination.and_then(|p| p.marker.as_deref()) {
            Some(id) => Some(self.marker(id).await?),
            None => None,
        };
        filter.validate()?;

        let conn = self.clone();
        let filter = filter.clone();
        let sort = sort.to_vec();
        let mut remaining = pagination.and_then(|p| p.limit);
        let mut marker = marker;
        let events = async_stream::try_stream! {
            loop {
                let size = remaining.map_or(conn.page_size, |n| n.min(conn.page_size));
                if size == 0 {
                    break;
                }
                let page = conn.fetch_page(&filter, &sort, marker.as_ref(), size).await?;
                let fetched = page.len();
                marker = page.last().map(|last| Marker {
                    generated: to_micros(last.generated),
                    message_id: last.message_id.clone(),
                });
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
        Ok(events.boxed())
    }

    async fn get_event_types(&self) -> StorageResult<Vec<String>> {
        sqlx::query("SELECT name FROM event_type ORDER BY name")
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?
            .iter()
            .map(|r| r.try_get::<String, _>(0).map_err(map_sqlx_error))
            .collect()
    }

    async fn get_trait_types(&self, event_type: &str) -> StorageResult<Vec<TraitDescriptor>> {
        let mut found = BTreeSet::new();
        let mut lookups: Vec<(&str, TraitType, &str)> = vec![
            ("trait_text", TraitType::None, " AND t.value IS NULL"),
            ("trait_text", TraitType::Text, " AND t.value IS NOT NULL"),
        ];
        for (table, dtype) in &TRAIT_TABLES[1..] {
            lookups.push((*table, *dtype, ""));
        }
        for (table, dtype, extra) in lookups {
            let mut q = SqlBuilder::new(self.dialect);
            q.push(&format!(
                "SELECT DISTINCT t.name FROM {table} t \
                 JOIN event e ON e.id = t.event_id \
                 JOIN event_type et ON et.id = e.event_type_id \
                 WHERE et.name = "
            ))
            .bind(event_type)
            .push(extra);
            for row in q
                .query()
                .fetch_all(self.pool.as_ref())
                .await
                .map_err(map_sqlx_error)?
            {
                found.insert(TraitDescriptor {
                    name: row.try_get(0).map_err(map_sqlx_error)?,
                    dtype,
                });
            }
        }
        Ok(found.into_iter().collect())
    }

    async fn get_traits(
        &self,
        event_type: &str,
        trait_name: Option<&str>,
    ) -> StorageResult<Vec<Trait>> {
        let mut traits = Vec::new();
        for (table, dtype) in TRAIT_TABLES {
            let mut q = SqlBuilder::new(self.dialect);
            q.push(&format!(
                "SELECT t.name, t.value FROM {table} t \
                 JOIN event e ON e.id = t.event_id \
                 JOIN event_type et ON et.id = e.event_type_id \
                 WHERE et.name = "
            ))
            .bind(event_type);
            if let Some(name) = trait_name {
                q.push(" AND t.name = ").bind(name);
            }
            q.push(" ORDER BY t.name");
            for row in q
                .query()
                .fetch_all(self.pool.as_ref())
                .await
                .map_err(map_sqlx_error)?
            {
                let value = decode_value(&row, 1, dtype)?;
                traits.push(Trait {
                    name: row.try_get(0).map_err(map_sqlx_error)?,
                    dtype: value.dtype(),
                    value,
                });
            }
        }
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
        let Some(cutoff) = expiry_cutoff(ttl_seconds).map(to_micros) else {
            return Ok(0);
        };
        let mut total = 0;
        match max_batch.filter(|b| *b > 0) {
            Some(batch) => {
                let ids = self.expired_ids(cutoff, batch).await?;
                if !ids.is_empty() {
                    total = self.delete_events(&ids).await?;
                }
            }
            None => loop {
                let ids = self.expired_ids(cutoff, EXPIRY_CHUNK).await?;
                if ids.is_empty() {
                    break;
                }
                total += self.delete_events(&ids).await?;
            },
        }

        self.execute(
            "DELETE FROM event_type WHERE NOT EXISTS \
             (SELECT 1 FROM event e WHERE e.event_type_id = event_type.id)",
        )
        .await?;
        info!(deleted = total, ttl_seconds, "expired events removed");
        Ok(total)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::simple_query(true)
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::production_ready(true)
    }
}

fn row_to_event(row: &AnyRow) -> StorageResult<(i64, Event)> {
    let id: i64 = row.try_get(0).map_err(map_sqlx_error)?;
    let message_id: String = row.try_get(1).map_err(map_sqlx_error)?;
    let generated = from_micros(row.try_get(2).map_err(map_sqlx_error)?)?;
    let raw: Option<String> = row.try_get(3).map_err(map_sqlx_error)?;
    let event_type: String = row.try_get(4).map_err(map_sqlx_error)?;
    let raw = match raw.as_deref() {
        Some(text) if !text.is_empty() => serde_json::from_str(text)
            .map_err(|e| StorageError::Serialization(format!("event {message_id}: {e}")))?,
        _ => crate::model::empty_raw(),
    };
    Ok((
        id,
        Event {
            message_id,
            event_type,
            generated,
            traits: Vec::new(),
            raw,
        },
    ))
}

fn decode_value(row: &AnyRow, idx: usize, dtype: TraitType) -> StorageResult<TraitValue> {
    Ok(match dtype {
        TraitType::None | TraitType::Text => row
            .try_get::<Option<String>, _>(idx)
            .map_err(map_sqlx_error)?
            .map_or(TraitValue::None, TraitValue::Text),
        TraitType::Int => TraitValue::Int(row.try_get(idx).map_err(map_sqlx_error)?),
        TraitType::Float => TraitValue::Float(row.try_get(idx).map_err(map_sqlx_error)?),
        TraitType::Datetime => {
            TraitValue::Datetime(from_micros(row.try_get(idx).map_err(map_sqlx_error)?)?)
        }
    })
}

/// URL handed to `sqlx`: driver suffix stripped, bare `sqlite://` in memory.
fn dress_url(url: &ConnectionUrl) -> String {
    if url.family() == "sqlite" && url.path().is_none() {
        return "sqlite::memory:".to_string();
    }
    url.without_driver()
}

/// Pool identity: endpoint, user and database, never the password.
///
/// An sqlx pool authenticates every connection as one user against one
/// database, so URLs differing in either must not share a pool. Sharing one
/// would serve a second user's queries with the first user's privileges.
fn pool_key(url: &ConnectionUrl) -> String {
    format!(
        "{}#{}@{}",
        url.endpoint_key(),
        url.username().unwrap_or_default(),
        url.path().unwrap_or_default()
    )
}

fn is_in_memory(url: &ConnectionUrl) -> bool {
    url.family() == "sqlite"
        && (url.path().map_or(true, |p| p.contains(":memory:"))
            || url.option("mode") == Some("memory"))
}

async fn connect_pool(target: &str, in_memory: bool) -> StorageResult<Arc<AnyPool>> {
    sqlx::any::install_default_drivers();
    let options = if in_memory {
        // Every connection to `:memory:` is a separate database.
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        AnyPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
    };
    let pool = options.connect(target).await.map_err(map_sqlx_error)?;
    Ok(Arc::new(pool))
}

/// Classify driver errors: connectivity loss is transient, unique-key
/// violations are conflicts.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Transient(err.to_string()),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StorageError::Conflict(db_err.message().to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dressing_strips_driver_and_defaults_sqlite_to_memory() {
        let url = ConnectionUrl::parse("mysql+pymysql://u:p@db/panko").unwrap();
        assert_eq!(dress_url(&url), "mysql://u:p@db/panko");
        let url = ConnectionUrl::parse("sqlite://").unwrap();
        assert_eq!(dress_url(&url), "sqlite::memory:");
        assert!(is_in_memory(&url));
        assert!(is_in_memory(&ConnectionUrl::parse("sqlite::memory:").unwrap()));
        assert!(!is_in_memory(&ConnectionUrl::parse("sqlite:///var/lib/panko.db").unwrap()));
    }

    #[test]
    fn pool_keys_separate_databases_but_hide_passwords() {
        let a = ConnectionUrl::parse("postgresql://panko:secret@db/events").unwrap();
        let b = ConnectionUrl::parse("postgresql://panko:other@db/audit").unwrap();
        assert_ne!(pool_key(&a), pool_key(&b));
        assert!(!pool_key(&a).contains("secret"));
    }

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::Backend(_)
        ));
    }

    async fn sqlite(page_size: usize) -> SqlConnection {
        let url = ConnectionUrl::parse("sqlite::memory:").unwrap();
        let conn = SqlConnection::open(&url, &ClientPool::new())
            .await
            .unwrap()
            .with_page_size(page_size);
        conn.upgrade().await.unwrap();
        conn
    }

    fn hourly(count: i64) -> Vec<Event> {
        use chrono::{Duration, TimeZone, Utc};
        let base = Utc.with_ymd_and_hms(2013, 12, 31, 5, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                Event::new(
                    format!("m{i}"),
                    "Foo",
                    // pairs share a timestamp so pages split ties
                    base + Duration::hours(i / 2),
                    vec![Trait::text("name", format!("n{i}")), Trait::int("seq", i)],
                    crate::model::empty_raw(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn results_stream_across_pages_with_traits() {
        use futures::TryStreamExt;

        let conn = sqlite(2).await;
        let events = hourly(7);
        conn.record_events(&events).await.unwrap();

        let all: Vec<Event> = conn
            .get_events(&EventFilter::new(), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all, events);

        let limited: Vec<Event> = conn
            .get_events(&EventFilter::new(), Some(&Pagination::limit(3)))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(limited, events[..3]);

        let newest_first = Pagination::from_params(Some(5), None, &["generated:desc"]).unwrap();
        let ids: Vec<String> = conn
            .get_events(&EventFilter::new(), Some(&newest_first))
            .await
            .unwrap()
            .map_ok(|e| e.message_id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, ["m6", "m4", "m5", "m2", "m3"]);
    }

    #[tokio::test]
    async fn first_page_arrives_before_the_rest_is_read() {
        use futures::StreamExt;

        let conn = sqlite(2).await;
        conn.record_events(&hourly(6)).await.unwrap();

        let mut stream = conn.get_events(&EventFilter::new(), None).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.message_id, "m0");

        // Rows inserted after the first page was read still show up, so later
        // pages were not fetched up front.
        let late = Event::new(
            "m9",
            "Foo",
            first.generated + chrono::Duration::days(1),
            vec![],
            crate::model::empty_raw(),
        );
        conn.record_events(&[late]).await.unwrap();
        let rest: Vec<String> = stream
            .map(|e| e.unwrap().message_id)
            .collect()
            .await;
        assert_eq!(rest, ["m1", "m2", "m3", "m4", "m5", "m9"]);
    }
}
