//! Data-source types shared between the manager and backend adapters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ValueMap;

/// Default timeout for a single data-source query, in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for a connectivity probe, in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Backend kind a data source is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceType {
    Mysql,
    Sqlite,
    #[serde(alias = "MONGO")]
    Mongodb,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::Mysql => "MYSQL",
            DataSourceType::Sqlite => "SQLITE",
            DataSourceType::Mongodb => "MONGODB",
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceType {
    type Err = DataSourceError;

    /// Case-insensitive parse; `MONGO` is accepted for `MONGODB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MYSQL" => Ok(DataSourceType::Mysql),
            "SQLITE" => Ok(DataSourceType::Sqlite),
            "MONGODB" | "MONGO" => Ok(DataSourceType::Mongodb),
            _ => Err(DataSourceError::UnsupportedType(s.to_string())),
        }
    }
}

/// Errors raised by the data-source layer.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("unsupported data source type: {0}")]
    UnsupportedType(String),

    #[error("invalid data source configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("data source not found: {0}")]
    NotFound(String),
}

impl DataSourceError {
    /// Whether this error stems from static configuration rather than the
    /// backend at runtime.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DataSourceError::UnsupportedType(_)
                | DataSourceError::InvalidConfig(_)
                | DataSourceError::NotFound(_)
        )
    }
}

/// A statically declared data source, as listed under `[[datasources]]`
/// in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub ds_type: DataSourceType,
    /// Tenant the entry applies to. `None` applies to every tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Opaque backend configuration (host, port, credentials, ...).
    #[serde(default)]
    pub config: ValueMap,
}
