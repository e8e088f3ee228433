//! MongoDB data source.
//!
//! Config keys: `uri` (full connection string), or `host` and `port`
//! (default 27017). Also `database` (required), optional
//! `username`/`password`/`authSource`, and `serverSelectionTimeoutMs`.
//!
//! Tenants are isolated by collection name: a logical collection `orders`
//! queried for tenant `acme` reads the physical collection `acme_orders`.

mod converter;
mod parser;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use converter::MongoConverter;
pub use parser::{MongoQuery, MongoQueryParser};

use apibrick_core::datasource::source::{DataSource, QueryParser, apply_field_mapping, field_mapping};
use apibrick_types::ValueMap;
use apibrick_types::datasource::{DataSourceError, DataSourceType};
use futures_util::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Database};
use serde_json::{Value, json};

const DEFAULT_PORT: u16 = 27017;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Physical collection backing `collection` for `tenant_id`.
pub fn tenant_collection(tenant_id: &str, collection: &str) -> String {
    format!("{tenant_id}_{collection}")
}

pub struct MongoDataSource {
    client: Client,
    database: Database,
    tenant_id: String,
    parser: MongoQueryParser,
    converter: MongoConverter,
    closed: AtomicBool,
}

impl MongoDataSource {
    async fn client_options(config: &ValueMap) -> Result<(ClientOptions, String), DataSourceError> {
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let database = text("database")
            .or_else(|| text("dbName"))
            .ok_or_else(|| DataSourceError::InvalidConfig("MongoDB connection requires: database".into()))?;

        let uri = match text("uri") {
            Some(uri) => uri,
            None => {
                let host = text("host").ok_or_else(|| {
                    DataSourceError::InvalidConfig("MongoDB connection requires: host or uri".into())
                })?;
                let port = match config.get("port") {
                    None | Some(Value::Null) => DEFAULT_PORT,
                    Some(v) => v
                        .as_u64()
                        .and_then(|p| u16::try_from(p).ok())
                        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                        .ok_or_else(|| DataSourceError::InvalidConfig(format!("invalid MongoDB port: {v}")))?,
                };
                format!("mongodb://{host}:{port}/{database}")
            }
        };

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| DataSourceError::InvalidConfig(format!("invalid MongoDB connection string: {e}")))?;

        if let (Some(username), Some(password)) = (text("username"), text("password")) {
            options.credential = Some(
                Credential::builder()
                    .username(username)
                    .password(password)
                    .source(text("authSource"))
                    .build(),
            );
        }

        let selection_timeout = config
            .get("serverSelectionTimeoutMs")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_SERVER_SELECTION_TIMEOUT, Duration::from_millis);
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(selection_timeout);
        options.app_name = Some("apibrick".to_string());

        Ok((options, database))
    }

    async fn find(&self, query: &MongoQuery) -> Result<Vec<Document>, mongodb::error::Error> {
        let collection = self
            .database
            .collection::<Document>(&tenant_collection(&self.tenant_id, &query.collection));

        match query.limit {
            None => Ok(collection.find_one(query.filter.clone()).await?.into_iter().collect()),
            Some(limit) => {
                collection
                    .find(query.filter.clone())
                    .limit(limit)
                    .await?
                    .try_collect()
                    .await
            }
        }
    }
}

impl DataSource for MongoDataSource {
    const TYPE: DataSourceType = DataSourceType::Mongodb;

    async fn init(config: &ValueMap, tenant_id: &str, env: &str) -> Result<Self, DataSourceError> {
        let (options, database_name) = Self::client_options(config).await?;
        let client = Client::with_options(options).map_err(|e| DataSourceError::Connection(e.to_string()))?;
        let database = client.database(&database_name);

        tracing::info!(tenant_id, env, database = %database_name, "MongoDB data source initialized");
        Ok(Self {
            client,
            database,
            tenant_id: tenant_id.to_string(),
            parser: MongoQueryParser,
            converter: MongoConverter,
            closed: AtomicBool::new(false),
        })
    }

    /// Without `limit` the first matching document (or `{}`) is returned;
    /// with `limit` the result is `{data: [...], count: n}`.
    async fn execute_query(&self, query_config: &ValueMap) -> Result<Value, DataSourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataSourceError::Connection("data source is closed".into()));
        }
        let query = self.parser.parse(query_config)?;
        let mapping = field_mapping(query_config);

        let documents = self
            .find(&query)
            .await
            .map_err(|e| DataSourceError::Query(e.to_string()))?;

        tracing::debug!(
            tenant_id = %self.tenant_id,
            collection = %query.collection,
            documents = documents.len(),
            "MongoDB query executed"
        );

        let mut records = documents
            .into_iter()
            .map(|doc| apply_field_mapping(self.converter.convert_document(doc), mapping));

        match query.limit {
            None => Ok(Value::Object(records.next().unwrap_or_default())),
            Some(_) => {
                let data: Vec<ValueMap> = records.collect();
                let count = data.len();
                Ok(json!({"data": data, "count": count}))
            }
        }
    }

    async fn test_connection(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.database.run_command(doc! {"ping": 1}).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(tenant_id = %self.tenant_id, error = %e, "MongoDB connection test failed");
                false
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.client.clone().shutdown().await;
        tracing::info!(tenant_id = %self.tenant_id, "MongoDB data source closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn collection_is_tenant_namespaced() {
        assert_eq!(tenant_collection("acme", "orders"), "acme_orders");
    }

    #[tokio::test]
    async fn options_from_host_and_credentials() {
        let (options, database) = MongoDataSource::client_options(&config(serde_json::json!({
            "host": "mongo.internal",
            "port": "27018",
            "database": "catalog",
            "username": "app",
            "password": "p@ss:word",
            "serverSelectionTimeoutMs": 250
        })))
        .await
        .unwrap();

        assert_eq!(database, "catalog");
        assert_eq!(options.hosts.len(), 1);
        assert_eq!(options.hosts[0].to_string(), "mongo.internal:27018");
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("app"));
        assert_eq!(credential.password.as_deref(), Some("p@ss:word"));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn options_require_database_and_host() {
        let err = MongoDataSource::client_options(&config(serde_json::json!({"host": "h"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::InvalidConfig(_)));

        let err = MongoDataSource::client_options(&config(serde_json::json!({"database": "d"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("host or uri"));
    }

    #[tokio::test]
    async fn unreachable_server_fails_probe_and_queries() {
        let ds = MongoDataSource::init(
            &config(serde_json::json!({
                "host": "127.0.0.1",
                "port": 1,
                "database": "catalog",
                "serverSelectionTimeoutMs": 200
            })),
            "acme",
            "DEV",
        )
        .await
        .unwrap();

        assert!(!ds.test_connection().await);
        let err = ds
            .execute_query(&config(serde_json::json!({"collection": "orders"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::Query(_)));

        ds.close().await;
        ds.close().await;
        assert!(!ds.test_connection().await);
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_before_io() {
        let ds = MongoDataSource::init(
            &config(serde_json::json!({"host": "127.0.0.1", "port": 1, "database": "catalog"})),
            "acme",
            "DEV",
        )
        .await
        .unwrap();

        let err = ds
            .execute_query(&config(serde_json::json!({"conditions": []})))
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::InvalidQuery(_)));
    }
}
