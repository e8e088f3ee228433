//! SQLite data source over an `sqlx` pool.
//!
//! Config keys: `path` (database file) or `url` (`sqlite://...`), plus an
//! optional `maxConnections` (default 5). The database must already exist.

use std::str::FromStr;
use std::time::Duration;

use apibrick_core::datasource::source::{DataSource, QueryParser, field_mapping};
use apibrick_types::ValueMap;
use apibrick_types::datasource::{DataSourceError, DataSourceType};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Database, Row, Sqlite, TypeInfo, ValueRef};

use super::sql::{RelationalConverter, SqlDialect, SqlParam, SqlQueryParser, SqlValue};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteDataSource {
    pool: SqlitePool,
    tenant_id: String,
    parser: SqlQueryParser,
    converter: RelationalConverter,
}

impl SqliteDataSource {
    fn connect_options(config: &ValueMap) -> Result<SqliteConnectOptions, DataSourceError> {
        let options = if let Some(url) = config.get("url").and_then(Value::as_str) {
            SqliteConnectOptions::from_str(url)
                .map_err(|e| DataSourceError::InvalidConfig(format!("invalid SQLite url: {e}")))?
        } else if let Some(path) = config.get("path").and_then(Value::as_str).filter(|p| !p.is_empty()) {
            SqliteConnectOptions::new().filename(path)
        } else {
            return Err(DataSourceError::InvalidConfig(
                "SQLite connection requires: path or url".into(),
            ));
        };

        Ok(options.busy_timeout(BUSY_TIMEOUT).create_if_missing(false))
    }
}

impl DataSource for SqliteDataSource {
    const TYPE: DataSourceType = DataSourceType::Sqlite;

    async fn init(config: &ValueMap, tenant_id: &str, env: &str) -> Result<Self, DataSourceError> {
        let options = Self::connect_options(config)?;
        let max_connections = config
            .get("maxConnections")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| DataSourceError::Connection(e.to_string()))?;

        tracing::info!(tenant_id, env, max_connections, "SQLite data source initialized");
        Ok(Self {
            pool,
            tenant_id: tenant_id.to_string(),
            parser: SqlQueryParser::new(SqlDialect::Sqlite),
            converter: RelationalConverter,
        })
    }

    async fn execute_query(&self, query_config: &ValueMap) -> Result<Value, DataSourceError> {
        let query = self.parser.parse(query_config)?;

        let rows = bind(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataSourceError::Query(e.to_string()))?;

        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DataSourceError::Query(e.to_string()))?;

        tracing::debug!(tenant_id = %self.tenant_id, rows = decoded.len(), "SQLite query executed");
        Ok(self.converter.shape(decoded, field_mapping(query_config)))
    }

    async fn test_connection(&self) -> bool {
        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(tenant_id = %self.tenant_id, error = %e, "SQLite connection test failed");
                false
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

fn bind<'q>(mut query: SqliteQuery<'q>, params: &[SqlParam]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

/// SQLite is dynamically typed, so cells are decoded by their storage class.
/// An INTEGER cell in a column declared `BOOLEAN` decodes as a boolean.
fn decode_row(row: &SqliteRow) -> Result<Vec<(String, SqlValue)>, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok((column.name().to_string(), SqlValue::Null));
            }
            let storage = raw.type_info().name().to_ascii_uppercase();
            let declared = column.type_info().name().to_ascii_uppercase();

            let value = match storage.as_str() {
                "INTEGER" if declared == "BOOLEAN" => SqlValue::Bool(row.try_get_unchecked(idx)?),
                "INTEGER" => SqlValue::Int(row.try_get_unchecked(idx)?),
                "REAL" => SqlValue::Float(row.try_get_unchecked(idx)?),
                "BLOB" => SqlValue::Bytes(row.try_get_unchecked(idx)?),
                _ => SqlValue::Text(row.try_get_unchecked(idx)?),
            };
            Ok((column.name().to_string(), value))
        })
        .collect()
}
