//! CLI command definitions for the `apibrick` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod datasource;
pub mod run;
pub mod steps;

use std::path::PathBuf;

use anyhow::{Context, bail};
use apibrick_types::ValueMap;
use clap::{Parser, Subcommand};
use serde_json::Value;

/// Run and inspect APIBrick workflow definitions.
#[derive(Parser)]
#[command(name = "apibrick", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all logging except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logging (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "APIBRICK_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter implied by the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info",
            2 => "info,apibrick=debug,apibrick_core=debug,apibrick_infra=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a flow file (YAML or JSON) and print the workflow result.
    Run {
        /// Path to the flow definition.
        flow: PathBuf,

        /// Tenant to execute as (defaults to the configured tenant).
        #[arg(long)]
        tenant: Option<String>,

        /// Environment to execute in (defaults to the configured environment).
        #[arg(long)]
        env: Option<String>,

        /// Request parameter as key=value; values that parse as JSON are
        /// passed typed. Repeatable.
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Request parameters as a JSON object, merged under --param.
        #[arg(long, value_name = "JSON")]
        params_json: Option<String>,
    },

    /// Check a flow file against the step registry without running it.
    Validate {
        /// Path to the flow definition.
        flow: PathBuf,
    },

    /// List registered step types.
    Steps,

    /// Data source utilities.
    #[command(name = "datasource", alias = "ds")]
    DataSource {
        #[command(subcommand)]
        action: datasource::DataSourceCommand,
    },
}

/// Split `key=value`; the value is parsed as JSON when it is valid JSON,
/// otherwise kept as a string.
pub fn parse_key_value(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Build a map from an optional JSON object plus `key=value` pairs.
/// Pairs override keys from the JSON object.
pub fn build_map(json: Option<&str>, pairs: &[String]) -> anyhow::Result<ValueMap> {
    let mut map = match json {
        Some(raw) => match serde_json::from_str(raw).context("Invalid JSON")? {
            Value::Object(map) => map,
            other => bail!("Expected a JSON object, got {other}"),
        },
        None => ValueMap::new(),
    };
    for pair in pairs {
        let (key, value) = parse_key_value(pair)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value_types() {
        assert_eq!(parse_key_value("age=42").unwrap(), ("age".into(), json!(42)));
        assert_eq!(parse_key_value("ok=true").unwrap(), ("ok".into(), json!(true)));
        assert_eq!(parse_key_value("name=Ada").unwrap(), ("name".into(), json!("Ada")));
        assert_eq!(parse_key_value("id=\"007\"").unwrap(), ("id".into(), json!("007")));
        assert_eq!(parse_key_value("q=a=b").unwrap(), ("q".into(), json!("a=b")));
        assert_eq!(parse_key_value("empty=").unwrap(), ("empty".into(), json!("")));
    }

    #[test]
    fn test_parse_key_value_rejects_malformed() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_build_map_pairs_override_json() {
        let map = build_map(
            Some(r#"{"a": 1, "b": "x"}"#),
            &["b=2".to_string(), "c=[1,2]".to_string()],
        )
        .unwrap();
        assert_eq!(Value::Object(map), json!({"a": 1, "b": 2, "c": [1, 2]}));

        assert!(build_map(Some("[1]"), &[]).is_err());
        assert!(build_map(Some("{"), &[]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "apibrick", "-vv", "run", "flow.yaml", "--tenant", "acme", "-p", "id=1", "--param", "x=y",
        ])
        .unwrap();
        assert_eq!(cli.log_filter(), "info,apibrick=debug,apibrick_core=debug,apibrick_infra=debug");
        match cli.command {
            Commands::Run { flow, tenant, env, params, params_json } => {
                assert_eq!(flow, PathBuf::from("flow.yaml"));
                assert_eq!(tenant.as_deref(), Some("acme"));
                assert!(env.is_none());
                assert_eq!(params, vec!["id=1", "x=y"]);
                assert!(params_json.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_datasource_test() {
        let cli = Cli::try_parse_from([
            "apibrick", "--json", "ds", "test", "--type", "sqlite", "--config", "path=/tmp/x.db",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::DataSource { .. }));
    }

    #[test]
    fn test_quiet_filter() {
        let cli = Cli::try_parse_from(["apibrick", "--quiet", "steps"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
    }
}
