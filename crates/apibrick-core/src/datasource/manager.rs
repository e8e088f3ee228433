//! Per-tenant data-source manager.
//!
//! Caches initialized data sources keyed by `(tenant_id, ds_id)` in a
//! concurrent map, and resolves factories by declared type. Creation is
//! idempotent per key: concurrent creators may both build an instance, but
//! only the first insert wins and the loser is closed immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apibrick_types::ValueMap;
use apibrick_types::datasource::{DEFAULT_PROBE_TIMEOUT_MS, DataSourceError, DataSourceType};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::source::{BoxDataSource, DataSourceFactory};

type CacheKey = (String, String);

/// Owner of every live data source in the process.
pub struct DataSourceManager {
    factories: HashMap<DataSourceType, Arc<dyn DataSourceFactory>>,
    cache: DashMap<CacheKey, Arc<BoxDataSource>>,
    probe_timeout: Duration,
}

impl DataSourceManager {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            cache: DashMap::new(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }

    /// Register a factory for its supported type, replacing any previous one.
    pub fn with_factory(mut self, factory: impl DataSourceFactory + 'static) -> Self {
        self.register_factory(Arc::new(factory));
        self
    }

    pub fn register_factory(&mut self, factory: Arc<dyn DataSourceFactory>) {
        let ds_type = factory.supported_type();
        tracing::debug!(ds_type = %ds_type, "Registered data source factory");
        self.factories.insert(ds_type, factory);
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Declared types a factory is registered for.
    pub fn supported_types(&self) -> Vec<DataSourceType> {
        self.factories.keys().copied().collect()
    }

    fn factory(&self, ds_type: DataSourceType) -> Result<&Arc<dyn DataSourceFactory>, DataSourceError> {
        self.factories
            .get(&ds_type)
            .ok_or_else(|| DataSourceError::UnsupportedType(ds_type.to_string()))
    }

    /// Return the cached instance for `(tenant_id, ds_id)`, creating and
    /// initializing it on first use.
    pub async fn get_or_create(
        &self,
        ds_id: &str,
        ds_type: DataSourceType,
        config: &ValueMap,
        tenant_id: &str,
        env: &str,
    ) -> Result<Arc<BoxDataSource>, DataSourceError> {
        let key = (tenant_id.to_string(), ds_id.to_string());
        if let Some(existing) = self.cache.get(&key).map(|entry| entry.value().clone()) {
            return Ok(existing);
        }

        let factory = self.factory(ds_type)?;
        let created = Arc::new(factory.create(config, tenant_id, env).await?);

        // The shard lock is released when the entry goes out of scope,
        // before any await below.
        let winner = match self.cache.entry(key) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(created.clone());
                None
            }
        };

        match winner {
            Some(winner) => {
                tracing::warn!(
                    ds_id,
                    tenant_id,
                    "Concurrent data source creation lost the race, closing duplicate"
                );
                created.close().await;
                Ok(winner)
            }
            None => {
                tracing::info!(ds_id, tenant_id, ds_type = %ds_type, env, "Created data source");
                Ok(created)
            }
        }
    }

    /// Cached instance, if any.
    pub fn get(&self, tenant_id: &str, ds_id: &str) -> Option<Arc<BoxDataSource>> {
        let key = (tenant_id.to_string(), ds_id.to_string());
        self.cache.get(&key).map(|entry| entry.value().clone())
    }

    /// Evict and close an instance. Returns whether one was cached.
    pub async fn remove(&self, tenant_id: &str, ds_id: &str) -> bool {
        let key = (tenant_id.to_string(), ds_id.to_string());
        match self.cache.remove(&key) {
            Some((_, source)) => {
                source.close().await;
                tracing::info!(ds_id, tenant_id, "Removed data source");
                true
            }
            None => false,
        }
    }

    /// Probe connectivity with a throwaway instance that is always closed.
    ///
    /// Construction failures and probe timeouts report `false`.
    pub async fn test_connection(
        &self,
        ds_type: DataSourceType,
        config: &ValueMap,
        tenant_id: &str,
        env: &str,
    ) -> bool {
        let factory = match self.factory(ds_type) {
            Ok(factory) => factory,
            Err(e) => {
                tracing::warn!(error = %e, "Connection test skipped");
                return false;
            }
        };

        let probe = match tokio::time::timeout(self.probe_timeout, factory.create(config, tenant_id, env)).await {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                tracing::warn!(ds_type = %ds_type, error = %e, "Connection test failed to initialize");
                return false;
            }
            Err(_) => {
                tracing::warn!(ds_type = %ds_type, "Connection test timed out during initialization");
                return false;
            }
        };

        let reachable = tokio::time::timeout(self.probe_timeout, probe.test_connection())
            .await
            .unwrap_or(false);
        probe.close().await;
        reachable
    }

    /// Close and evict every cached instance.
    pub async fn close_all(&self) {
        let keys: Vec<CacheKey> = self.cache.iter().map(|entry| entry.key().clone()).collect();
        for (tenant_id, ds_id) in keys {
            self.remove(&tenant_id, &ds_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for DataSourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::source::DataSource;
    use serde_json::{Value, json};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probes {
        created: AtomicUsize,
        closed: AtomicUsize,
    }

    struct Memory {
        tenant: String,
        reachable: bool,
        probes: Arc<Probes>,
        closed: AtomicBool,
    }

    impl DataSource for Memory {
        const TYPE: DataSourceType = DataSourceType::Mongodb;

        async fn init(_config: &ValueMap, _tenant_id: &str, _env: &str) -> Result<Self, DataSourceError> {
            Err(DataSourceError::InvalidConfig("built by CountingFactory".into()))
        }

        async fn execute_query(&self, _query_config: &ValueMap) -> Result<Value, DataSourceError> {
            Ok(json!({"tenant": self.tenant}))
        }

        async fn test_connection(&self) -> bool {
            self.reachable
        }

        async fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.probes.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct CountingFactory {
        probes: Arc<Probes>,
        reachable: bool,
        delay: Duration,
    }

    impl DataSourceFactory for CountingFactory {
        fn supported_type(&self) -> DataSourceType {
            DataSourceType::Mongodb
        }

        fn create<'a>(
            &'a self,
            config: &'a ValueMap,
            tenant_id: &'a str,
            _env: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<BoxDataSource, DataSourceError>> + Send + 'a>> {
            Box::pin(async move {
                if config.contains_key("broken") {
                    return Err(DataSourceError::Connection("refused".into()));
                }
                tokio::time::sleep(self.delay).await;
                self.probes.created.fetch_add(1, Ordering::SeqCst);
                Ok(BoxDataSource::new(Memory {
                    tenant: tenant_id.to_string(),
                    reachable: self.reachable,
                    probes: self.probes.clone(),
                    closed: AtomicBool::new(false),
                }))
            })
        }
    }

    fn manager(reachable: bool, delay: Duration) -> (DataSourceManager, Arc<Probes>) {
        let probes = Arc::new(Probes::default());
        let manager = DataSourceManager::new().with_factory(CountingFactory {
            probes: probes.clone(),
            reachable,
            delay,
        });
        (manager, probes)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (manager, probes) = manager(true, Duration::ZERO);
        let config = ValueMap::new();

        let first = manager
            .get_or_create("docs", DataSourceType::Mongodb, &config, "acme", "DEV")
            .await
            .unwrap();
        let second = manager
            .get_or_create("docs", DataSourceType::Mongodb, &config, "acme", "DEV")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(probes.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_instances_are_tenant_scoped() {
        let (manager, _) = manager(true, Duration::ZERO);
        let config = ValueMap::new();

        let acme = manager
            .get_or_create("docs", DataSourceType::Mongodb, &config, "acme", "DEV")
            .await
            .unwrap();
        let globex = manager
            .get_or_create("docs", DataSourceType::Mongodb, &config, "globex", "DEV")
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&acme, &globex));
        let result = globex.execute_query(&ValueMap::new()).await.unwrap();
        assert_eq!(result["tenant"], json!("globex"));
    }

    #[tokio::test]
    async fn test_unsupported_type() {
        let (manager, _) = manager(true, Duration::ZERO);
        let err = manager
            .get_or_create("db", DataSourceType::Mysql, &ValueMap::new(), "acme", "DEV")
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::UnsupportedType(ref t) if t == "MYSQL"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_is_not_cached() {
        let (manager, _) = manager(true, Duration::ZERO);
        let mut config = ValueMap::new();
        config.insert("broken".into(), json!(true));

        let err = manager
            .get_or_create("docs", DataSourceType::Mongodb, &config, "acme", "DEV")
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::Connection(_)));
        assert!(manager.get("acme", "docs").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creators_share_one_instance() {
        let (manager, probes) = manager(true, Duration::from_millis(10));
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .get_or_create("docs", DataSourceType::Mongodb, &ValueMap::new(), "acme", "DEV")
                    .await
                    .unwrap()
            }));
        }

        let mut sources = Vec::new();
        for handle in handles {
            sources.push(handle.await.unwrap());
        }

        for source in &sources[1..] {
            assert!(Arc::ptr_eq(&sources[0], source));
        }
        let created = probes.created.load(Ordering::SeqCst);
        // Every race loser was closed.
        assert_eq!(probes.closed.load(Ordering::SeqCst), created - 1);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_closes_instance() {
        let (manager, probes) = manager(true, Duration::ZERO);
        manager
            .get_or_create("docs", DataSourceType::Mongodb, &ValueMap::new(), "acme", "DEV")
            .await
            .unwrap();

        assert!(manager.remove("acme", "docs").await);
        assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
        assert!(!manager.remove("acme", "docs").await);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_connection_probe_is_always_closed() {
        let (manager, probes) = manager(true, Duration::ZERO);
        assert!(
            manager
                .test_connection(DataSourceType::Mongodb, &ValueMap::new(), "acme", "DEV")
                .await
        );
        assert_eq!(probes.created.load(Ordering::SeqCst), 1);
        assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
        // Probes never enter the cache.
        assert!(manager.is_empty());

        let (unreachable, probes) = self::manager(false, Duration::ZERO);
        assert!(
            !unreachable
                .test_connection(DataSourceType::Mongodb, &ValueMap::new(), "acme", "DEV")
                .await
        );
        assert_eq!(probes.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_probe_times_out() {
        let (manager, _) = manager(true, Duration::from_millis(200));
        let manager = manager.with_probe_timeout(Duration::from_millis(10));
        assert!(
            !manager
                .test_connection(DataSourceType::Mongodb, &ValueMap::new(), "acme", "DEV")
                .await
        );
    }

    #[tokio::test]
    async fn test_close_all() {
        let (manager, probes) = manager(true, Duration::ZERO);
        for tenant in ["a", "b", "c"] {
            manager
                .get_or_create("docs", DataSourceType::Mongodb, &ValueMap::new(), tenant, "DEV")
                .await
                .unwrap();
        }
        manager.close_all().await;
        assert!(manager.is_empty());
        assert_eq!(probes.closed.load(Ordering::SeqCst), 3);
    }
}
