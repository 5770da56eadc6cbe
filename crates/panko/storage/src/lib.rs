//! Panko event storage.
//!
//! Immutable, timestamped events carrying typed traits, persisted behind one
//! [`Connection`] contract with interchangeable backends:
//! - document store (MongoDB), feature `mongodb`
//! - relational store (PostgreSQL, MySQL, SQLite), feature `sql`
//! - column store (HBase REST gateway, or an in-process engine), feature `hbase`
//! - search engine (Elasticsearch, or an in-process engine), feature `es`
//! - a `log://` sink that discards everything
//!
//! Backends are chosen at runtime from a connection URL through the
//! [`DriverRegistry`], and every connection it opens is wrapped in a
//! [`Retrying`] decorator that rides out transient connectivity loss.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod config;
pub mod connection_url;
mod error;
pub mod expirer;
mod filter;
pub mod ingest;
pub mod log;
mod model;
mod pagination;
pub mod pool;
mod registry;
pub mod retry;
mod traits;

#[cfg(feature = "es")]
pub mod es;
#[cfg(feature = "hbase")]
pub mod hbase;
#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "sql")]
pub mod sql;

pub use config::StorageConfig;
pub use connection_url::ConnectionUrl;
pub use error::{StorageError, StorageResult};
pub use filter::{ComparisonOp, EventFilter, QueryClause, TraitFilter};
pub use model::{
    parse_timestamp, Capabilities, Event, StorageCapabilities, Trait, TraitDescriptor, TraitType,
    TraitValue, MAX_TEXT_LEN,
};
pub use pagination::{Pagination, SortDir, SortKey, SortSpec, DEFAULT_SORT};
pub use registry::{DriverFactory, DriverRegistry};
pub use retry::{RetryPolicy, Retrying};
pub use traits::{Connection, EventStream};
