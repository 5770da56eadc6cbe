//! Connection URL scheme to backend resolution.

use crate::config::StorageConfig;
use crate::connection_url::ConnectionUrl;
use crate::log::LogConnection;
use crate::retry::Retrying;
use crate::traits::Connection;
use crate::{StorageError, StorageResult};
use futures::future::BoxFuture;
use futures::{Future, FutureExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Builds a connection for a parsed URL.
pub type DriverFactory = Arc<
    dyn Fn(ConnectionUrl, StorageConfig) -> BoxFuture<'static, StorageResult<Arc<dyn Connection>>>
        + Send
        + Sync,
>;

/// Family name to backend constructor.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// A registry with no drivers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every backend compiled into this build. Each family gets its own
    /// client pool, shared by every connection the registry opens.
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::empty();

        registry.register("log", |_url, _config| async {
            Ok(Arc::new(LogConnection::new()) as Arc<dyn Connection>)
        });

        #[cfg(feature = "mongodb")]
        {
            let pool = Arc::new(crate::pool::ClientPool::<mongodb::Client>::new());
            registry.register("mongodb", move |url, config| {
                let pool = Arc::clone(&pool);
                async move {
                    let conn = crate::mongo::MongoConnection::open(&url, &config, &pool).await?;
                    Ok(Arc::new(conn) as Arc<dyn Connection>)
                }
            });
        }

        #[cfg(feature = "sql")]
        {
            let pool = Arc::new(crate::pool::ClientPool::<sqlx::AnyPool>::new());
            for family in ["mysql", "postgresql", "postgres", "sqlite"] {
                let pool = Arc::clone(&pool);
                registry.register(family, move |url, _config| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let conn = crate::sql::SqlConnection::open(&url, &pool).await?;
                        Ok(Arc::new(conn) as Arc<dyn Connection>)
                    }
                });
            }
        }

        #[cfg(feature = "hbase")]
        {
            let pool = Arc::new(crate::pool::ClientPool::<dyn crate::hbase::ColumnClient>::new());
            registry.register("hbase", move |url, _config| {
                let pool = Arc::clone(&pool);
                async move {
                    let conn = crate::hbase::ColumnConnection::open(&url, &pool).await?;
                    Ok(Arc::new(conn) as Arc<dyn Connection>)
                }
            });
        }

        #[cfg(feature = "es")]
        {
            let pool = Arc::new(crate::pool::ClientPool::<dyn crate::es::SearchClient>::new());
            for family in ["es", "elasticsearch"] {
                let pool = Arc::clone(&pool);
                registry.register(family, move |url, config| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let conn = crate::es::EsConnection::open(&url, &config, &pool).await?;
                        Ok(Arc::new(conn) as Arc<dyn Connection>)
                    }
                });
            }
        }

        registry
    }

    pub fn register<F, Fut>(&mut self, family: &str, factory: F)
    where
        F: Fn(ConnectionUrl, StorageConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StorageResult<Arc<dyn Connection>>> + Send + 'static,
    {
        let factory: DriverFactory = Arc::new(move |url, config| factory(url, config).boxed());
        self.drivers.insert(family.to_ascii_lowercase(), factory);
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Parse `url` and find its backend. Performs no I/O.
    pub fn resolve(&self, url: &str) -> StorageResult<(ConnectionUrl, DriverFactory)> {
        let url = ConnectionUrl::parse(url)?;
        let factory = self
            .drivers
            .get(url.family())
            .cloned()
            .ok_or_else(|| StorageError::UnknownBackend(url.family().to_string()))?;
        Ok((url, factory))
    }

    /// Open a bare backend connection, without the retry layer.
    pub async fn open(&self, url: &str, config: &StorageConfig) -> StorageResult<Arc<dyn Connection>> {
        let (url, factory) = self.resolve(url)?;
        info!(backend = url.family(), endpoint = %url, "opening storage connection");
        factory(url, config.clone()).await
    }

    /// Open a connection whose calls are retried under `config`'s policy.
    pub async fn connect(
        &self,
        url: &str,
        config: &StorageConfig,
    ) -> StorageResult<Arc<dyn Connection>> {
        let raw = self.open(url, config).await?;
        Ok(Arc::new(Retrying::new(raw, config.retry_policy())))
    }

    /// Connect to `config.connection`, retrying transient failures to open it.
    pub async fn connect_from_config(
        &self,
        config: &StorageConfig,
    ) -> StorageResult<Arc<dyn Connection>> {
        let url = config.connection_url()?;
        self.resolve(url)?;
        config
            .retry_policy()
            .run("connect", || self.connect(url, config))
            .await
    }
}
