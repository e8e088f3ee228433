//! Runtime settings for APIBrick.
//!
//! `Settings` represents the top-level `config.toml`: engine timeouts and
//! context scoping, script sandbox limits, data-source timeouts, tenant
//! defaults, and statically declared data sources. All fields default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datasource::{DataSourceDescriptor, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_QUERY_TIMEOUT_MS};
use crate::script::{DEFAULT_SCRIPT_MEMORY_MB, DEFAULT_SCRIPT_TIMEOUT_MS, ScriptLimits};

/// Default tenant used when a caller supplies none.
pub const DEFAULT_TENANT: &str = "default-tenant";

/// Default environment tag used when a caller supplies none.
pub const DEFAULT_ENV: &str = "DEV";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub script: ScriptSettings,
    #[serde(default)]
    pub datasource: DataSourceSettings,
    #[serde(default)]
    pub tenant: TenantSettings,
    /// Statically declared data sources.
    #[serde(default)]
    pub datasources: Vec<DataSourceDescriptor>,
}

/// How step configuration keys are laid out in the context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Config keys are copied verbatim; every step sees every key.
    #[default]
    Flat,
    /// Config keys are copied as `"<stepId>.<key>"`; lookups through the
    /// step parameter accessor prefer the current step's namespace.
    StepNamespaced,
}

/// Pipeline engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Uniform per-step ceiling in milliseconds; 0 disables it.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default)]
    pub context_scope: ContextScope,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

impl EngineSettings {
    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_ms > 0).then(|| Duration::from_millis(self.step_timeout_ms))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            context_scope: ContextScope::default(),
        }
    }
}

/// Script sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSettings {
    #[serde(default = "default_script_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_script_memory_mb")]
    pub max_memory_mb: u64,
    /// Size of the bounded blocking pool scripts run on.
    #[serde(default = "default_script_workers")]
    pub workers: usize,
    /// Operation ceiling per execution; 0 means unlimited.
    #[serde(default)]
    pub max_operations: u64,
}

fn default_script_timeout_ms() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_MS
}

fn default_script_memory_mb() -> u64 {
    DEFAULT_SCRIPT_MEMORY_MB
}

fn default_script_workers() -> usize {
    4
}

impl ScriptSettings {
    pub fn limits(&self) -> ScriptLimits {
        ScriptLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            max_memory_bytes: self.max_memory_mb * 1024 * 1024,
            max_operations: self.max_operations,
        }
    }
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_script_timeout_ms(),
            max_memory_mb: default_script_memory_mb(),
            workers: default_script_workers(),
            max_operations: 0,
        }
    }
}

/// Data-source layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSettings {
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

impl DataSourceSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Tenant and environment defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_env")]
    pub default_env: String,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            default_env: default_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DataSourceType;

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.engine.step_timeout_ms, 30_000);
        assert_eq!(settings.engine.context_scope, ContextScope::Flat);
        assert_eq!(settings.script.timeout_ms, 500);
        assert_eq!(settings.script.workers, 4);
        assert_eq!(settings.datasource.query_timeout_ms, 3_000);
        assert_eq!(settings.tenant.default_tenant, "default-tenant");
        assert_eq!(settings.tenant.default_env, "DEV");
        assert!(settings.datasources.is_empty());
    }

    #[test]
    fn test_settings_deserialize_empty() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_deserialize_with_values() {
        let toml_str = r#"
[engine]
step_timeout_ms = 0
context_scope = "step_namespaced"

[script]
timeout_ms = 250
max_memory_mb = 16

[[datasources]]
id = "local"
type = "SQLITE"
[datasources.config]
path = "/tmp/app.db"
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.engine.step_timeout(), None);
        assert_eq!(settings.engine.context_scope, ContextScope::StepNamespaced);

        let limits = settings.script.limits();
        assert_eq!(limits.timeout_ms(), 250);
        assert_eq!(limits.max_memory_bytes, 16 * 1024 * 1024);

        assert_eq!(settings.datasources.len(), 1);
        assert_eq!(settings.datasources[0].ds_type, DataSourceType::Sqlite);
        assert!(settings.datasources[0].tenant.is_none());
    }

    #[test]
    fn test_step_timeout_enabled() {
        let engine = EngineSettings::default();
        assert_eq!(engine.step_timeout(), Some(Duration::from_secs(30)));
    }
}
