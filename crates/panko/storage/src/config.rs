//! Storage configuration (`[database]` section).

use crate::retry::RetryPolicy;
use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database connection and retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Connection URL, e.g. `mysql://user:pass@db/panko`.
    #[serde(default)]
    pub connection: Option<String>,

    /// Attempts made for a transiently failing call. Negative retries forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Seconds between attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Event retention in seconds; zero or negative keeps events forever.
    #[serde(default = "default_event_ttl")]
    pub event_time_to_live: i64,

    /// Events deleted per expiry pass; zero lets the expirer choose.
    #[serde(default)]
    pub events_delete_batch_size: u64,

    /// Talk https to the search engine backend.
    #[serde(default)]
    pub es_ssl_enabled: bool,

    /// Index holding events in the search engine backend.
    #[serde(default = "default_es_index")]
    pub es_index_name: String,
}

fn default_max_retries() -> i32 {
    10
}

fn default_retry_interval() -> u64 {
    10
}

fn default_event_ttl() -> i64 {
    -1
}

fn default_es_index() -> String {
    "events".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection: None,
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval(),
            event_time_to_live: default_event_ttl(),
            events_delete_batch_size: 0,
            es_ssl_enabled: false,
            es_index_name: default_es_index(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigRoot {
    #[serde(default)]
    database: StorageConfig,
}

impl StorageConfig {
    pub fn with_connection(url: impl Into<String>) -> Self {
        Self {
            connection: Some(url.into()),
            ..Self::default()
        }
    }

    /// Load the `[database]` section from an optional file, overridden by
    /// `PANKO_DATABASE__*` environment variables.
    pub fn load(path: Option<&str>) -> StorageResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&ConfigRoot::default()).map_err(config_error)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PANKO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let root: ConfigRoot = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        Ok(root.database)
    }

    pub fn connection_url(&self) -> StorageResult<&str> {
        self.connection
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| StorageError::Configuration("database.connection is not set".into()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_interval_secs))
    }
}

fn config_error(e: config::ConfigError) -> StorageError {
    StorageError::Configuration(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_service_defaults() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.max_retries, 10);
        assert_eq!(cfg.retry_interval_secs, 10);
        assert_eq!(cfg.event_time_to_live, -1);
        assert!(!cfg.es_ssl_enabled);
        assert_eq!(cfg.es_index_name, "events");
        assert!(matches!(
            cfg.connection_url(),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn load_reads_database_section() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nconnection = \"sqlite::memory:\"\nevent_time_to_live = 3600\nmax_retries = 2"
        )
        .unwrap();
        let cfg = StorageConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.connection_url().unwrap(), "sqlite::memory:");
        assert_eq!(cfg.event_time_to_live, 3600);
        assert_eq!(cfg.retry_policy().max_retries, 2);
        assert_eq!(cfg.retry_interval_secs, 10);
        assert_eq!(cfg.es_index_name, "events");
    }

    #[test]
    fn search_engine_options_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nconnection = \"es://search:9200\"\nes_ssl_enabled = true\nes_index_name = \"panko\""
        )
        .unwrap();
        let cfg = StorageConfig::load(file.path().to_str()).unwrap();
        assert!(cfg.es_ssl_enabled);
        assert_eq!(cfg.es_index_name, "panko");
    }
}
