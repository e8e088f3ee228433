//! MySQL data source over an `sqlx` pool.
//!
//! Config keys: `host`, `port` (default 3306), `dbName` (or `database`),
//! `username`, `password`. The pool holds at most 5 connections and the
//! initial connect is bounded to 10 seconds.

use std::time::Duration;

use apibrick_core::datasource::source::{DataSource, QueryParser, field_mapping};
use apibrick_types::ValueMap;
use apibrick_types::datasource::{DataSourceError, DataSourceType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Database, MySql, Row, TypeInfo, ValueRef};

use super::sql::{RelationalConverter, SqlDialect, SqlParam, SqlQueryParser, SqlValue};

const DEFAULT_PORT: u16 = 3306;
const MAX_CONNECTIONS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(8);
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Connection settings extracted from a config map.
#[derive(Debug, Clone, PartialEq)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl MySqlSettings {
    pub fn from_config(config: &ValueMap) -> Result<Self, DataSourceError> {
        let text = |key: &str| config.get(key).and_then(Value::as_str).map(str::to_string);

        let port = match config.get("port") {
            None | Some(Value::Null) => DEFAULT_PORT,
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()).ok_or_else(|| {
                DataSourceError::InvalidConfig(format!("invalid MySQL port: {n}"))
            })?,
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| DataSourceError::InvalidConfig(format!("invalid MySQL port: {s}")))?,
            Some(other) => {
                return Err(DataSourceError::InvalidConfig(format!("invalid MySQL port: {other}")));
            }
        };

        match (
            text("host").filter(|h| !h.is_empty()),
            text("dbName").or_else(|| text("database")).filter(|d| !d.is_empty()),
            text("username"),
            text("password"),
        ) {
            (Some(host), Some(database), Some(username), Some(password)) => Ok(Self {
                host,
                port,
                database,
                username,
                password,
            }),
            _ => Err(DataSourceError::InvalidConfig(
                "MySQL connection requires: host, dbName, username, password".into(),
            )),
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .ssl_mode(MySqlSslMode::Preferred)
    }
}

pub struct MySqlDataSource {
    pool: MySqlPool,
    tenant_id: String,
    parser: SqlQueryParser,
    converter: RelationalConverter,
}

impl DataSource for MySqlDataSource {
    const TYPE: DataSourceType = DataSourceType::Mysql;

    async fn init(config: &ValueMap, tenant_id: &str, env: &str) -> Result<Self, DataSourceError> {
        let settings = MySqlSettings::from_config(config)?;

        let connect = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .connect_with(settings.connect_options());

        let pool = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| DataSourceError::Connection(format!(
                "connecting to {}:{} timed out after {}s",
                settings.host,
                settings.port,
                CONNECT_TIMEOUT.as_secs()
            )))?
            .map_err(|e| DataSourceError::Connection(e.to_string()))?;

        tracing::info!(
            tenant_id,
            env,
            host = %settings.host,
            database = %settings.database,
            "MySQL data source initialized"
        );
        Ok(Self {
            pool,
            tenant_id: tenant_id.to_string(),
            parser: SqlQueryParser::new(SqlDialect::MySql),
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

        tracing::debug!(tenant_id = %self.tenant_id, rows = decoded.len(), "MySQL query executed");
        Ok(self.converter.shape(decoded, field_mapping(query_config)))
    }

    async fn test_connection(&self) -> bool {
        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(tenant_id = %self.tenant_id, error = %e, "MySQL connection test failed");
                false
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, <MySql as Database>::Arguments<'q>>;

fn bind<'q>(mut query: MySqlQuery<'q>, params: &[SqlParam]) -> MySqlQuery<'q> {
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

/// MySQL columns are statically typed; cells are decoded by the column's
/// reported type name.
fn decode_row(row: &MySqlRow) -> Result<Vec<(String, SqlValue)>, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            if row.try_get_raw(idx)?.is_null() {
                return Ok((column.name().to_string(), SqlValue::Null));
            }
            let type_name = column.type_info().name().to_ascii_uppercase();
            Ok((column.name().to_string(), decode_cell(row, idx, &type_name)?))
        })
        .collect()
}

fn decode_cell(row: &MySqlRow, idx: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    let value = match type_name {
        "BOOLEAN" => SqlValue::Bool(row.try_get_unchecked(idx)?),
        t if t.ends_with("UNSIGNED") && !t.starts_with("DECIMAL") => {
            SqlValue::UInt(row.try_get_unchecked(idx)?)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            SqlValue::Int(row.try_get_unchecked(idx)?)
        }
        "YEAR" => SqlValue::Int(i64::from(row.try_get_unchecked::<u16, _>(idx)?)),
        "FLOAT" => SqlValue::Float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => SqlValue::Float(row.try_get_unchecked(idx)?),
        t if t.starts_with("DECIMAL") => SqlValue::Decimal(row.try_get_unchecked::<Decimal, _>(idx)?),
        "DATE" => SqlValue::Date(row.try_get_unchecked::<NaiveDate, _>(idx)?),
        // TIME can be negative or exceed 24h; those fall back to text.
        "TIME" => match row.try_get_unchecked::<NaiveTime, _>(idx) {
            Ok(time) => SqlValue::Time(time),
            Err(_) => SqlValue::Text(row.try_get_unchecked(idx)?),
        },
        "DATETIME" => SqlValue::DateTime(row.try_get_unchecked::<NaiveDateTime, _>(idx)?),
        "TIMESTAMP" => SqlValue::Timestamp(row.try_get_unchecked::<DateTime<Utc>, _>(idx)?),
        "JSON" => SqlValue::Json(row.try_get_unchecked::<Value, _>(idx)?),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => SqlValue::Bytes(row.try_get_unchecked(idx)?),
        _ => SqlValue::Text(row.try_get_unchecked(idx)?),
    };
    Ok(value)
}
