//! Data-source contracts.
//!
//! Every backend implements [`DataSource`] (tenant-scoped handle: init,
//! query, probe, close), a [`QueryParser`] that turns a declarative query
//! configuration into a backend-native query and rejects dangerous
//! operations, and a [`DataConverter`] that normalizes backend-native values
//! into JSON-safe primitives.
//!
//! `DataSource` uses RPITIT; [`BoxDataSource`] erases it for the manager's
//! cache following the usual blanket-impl pattern.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use apibrick_types::ValueMap;
use apibrick_types::datasource::{DataSourceError, DataSourceType};
use serde_json::Value;

/// Query-config key holding an optional `{target: source}` column mapping.
pub const FIELD_MAPPING_KEY: &str = "fieldMapping";

// ---------------------------------------------------------------------------
// DataSource
// ---------------------------------------------------------------------------

/// A live, tenant-scoped handle to one backend.
pub trait DataSource: Send + Sync {
    /// Backend kind this implementation serves.
    const TYPE: DataSourceType;

    /// Build and initialize a handle from an opaque config map.
    fn init(
        config: &ValueMap,
        tenant_id: &str,
        env: &str,
    ) -> impl Future<Output = Result<Self, DataSourceError>> + Send
    where
        Self: Sized;

    /// Run a declarative query and return a JSON-safe result.
    fn execute_query(
        &self,
        query_config: &ValueMap,
    ) -> impl Future<Output = Result<Value, DataSourceError>> + Send;

    /// Probe connectivity.
    fn test_connection(&self) -> impl Future<Output = bool> + Send;

    /// Release pooled resources. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Object-safe version of [`DataSource`] with boxed futures.
pub trait DataSourceDyn: Send + Sync {
    fn ds_type(&self) -> DataSourceType;

    fn execute_query_boxed<'a>(
        &'a self,
        query_config: &'a ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<Value, DataSourceError>> + Send + 'a>>;

    fn test_connection_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl<T: DataSource> DataSourceDyn for T {
    fn ds_type(&self) -> DataSourceType {
        T::TYPE
    }

    fn execute_query_boxed<'a>(
        &'a self,
        query_config: &'a ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<Value, DataSourceError>> + Send + 'a>> {
        Box::pin(self.execute_query(query_config))
    }

    fn test_connection_boxed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.test_connection())
    }

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.close())
    }
}

/// Type-erased data source, as cached by the manager.
pub struct BoxDataSource {
    inner: Box<dyn DataSourceDyn>,
}

impl BoxDataSource {
    pub fn new<T: DataSource + 'static>(source: T) -> Self {
        Self {
            inner: Box::new(source),
        }
    }

    pub fn ds_type(&self) -> DataSourceType {
        self.inner.ds_type()
    }

    pub async fn execute_query(&self, query_config: &ValueMap) -> Result<Value, DataSourceError> {
        self.inner.execute_query_boxed(query_config).await
    }

    pub async fn test_connection(&self) -> bool {
        self.inner.test_connection_boxed().await
    }

    pub async fn close(&self) {
        self.inner.close_boxed().await
    }
}

impl std::fmt::Debug for BoxDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDataSource")
            .field("ds_type", &self.ds_type())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Constructs initialized data sources of one declared type.
///
/// Only ever used behind `dyn`, so the trait is object-safe directly.
pub trait DataSourceFactory: Send + Sync {
    fn supported_type(&self) -> DataSourceType;

    fn create<'a>(
        &'a self,
        config: &'a ValueMap,
        tenant_id: &'a str,
        env: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BoxDataSource, DataSourceError>> + Send + 'a>>;
}

/// Factory for any [`DataSource`] whose `init` is self-sufficient.
pub struct InitFactory<D> {
    _marker: PhantomData<fn() -> D>,
}

impl<D> InitFactory<D> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<D> Default for InitFactory<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DataSource + 'static> DataSourceFactory for InitFactory<D> {
    fn supported_type(&self) -> DataSourceType {
        D::TYPE
    }

    fn create<'a>(
        &'a self,
        config: &'a ValueMap,
        tenant_id: &'a str,
        env: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BoxDataSource, DataSourceError>> + Send + 'a>> {
        Box::pin(async move {
            let source = D::init(config, tenant_id, env).await?;
            Ok(BoxDataSource::new(source))
        })
    }
}

// ---------------------------------------------------------------------------
// Parser / converter
// ---------------------------------------------------------------------------

/// Turns a declarative query configuration into a backend-native query.
pub trait QueryParser: Send + Sync {
    type Query;

    /// Parse and validate. Never touches the backend.
    fn parse(&self, query_config: &ValueMap) -> Result<Self::Query, DataSourceError>;

    /// Reject dangerous or malformed queries.
    fn validate(&self, query: &Self::Query) -> Result<(), DataSourceError>;
}

/// Normalizes backend-native values into JSON-safe primitives.
pub trait DataConverter: Send + Sync {
    type Raw;

    fn convert(&self, raw: Self::Raw) -> Value;
}

/// Apply an optional `{target: source}` mapping to a converted record.
///
/// With a mapping, only mapped fields are kept, renamed to their targets;
/// missing sources become null. Without one the record is returned as-is.
pub fn apply_field_mapping(record: ValueMap, mapping: Option<&ValueMap>) -> ValueMap {
    let Some(mapping) = mapping.filter(|m| !m.is_empty()) else {
        return record;
    };

    mapping
        .iter()
        .map(|(target, source)| {
            let value = source
                .as_str()
                .and_then(|source| record.get(source))
                .cloned()
                .unwrap_or(Value::Null);
            (target.clone(), value)
        })
        .collect()
}

/// Read the optional field mapping out of a query config.
pub fn field_mapping(query_config: &ValueMap) -> Option<&ValueMap> {
    query_config.get(FIELD_MAPPING_KEY).and_then(Value::as_object)
}
