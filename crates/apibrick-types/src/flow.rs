//! Flow and step definition types.
//!
//! A [`FlowDefinition`] is the declarative description of one API's
//! server-side logic: an ordered list of [`StepDefinition`]s plus an
//! execution mode. Definitions are immutable once loaded for an execution.
//!
//! Step records tolerate the persisted field aliases (`stepId`/`id`,
//! `stepType`/`type`, `stepConfig`/`config`) and the legacy boolean
//! `failStop` flag, which maps onto [`FailureStrategy`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValueMap;

/// Default interval between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Suffix appended to a step id to form its default output key.
pub const OUTPUT_KEY_SUFFIX: &str = ".output";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a step's failure affects the rest of the flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    /// Stop the walk after this step fails.
    #[default]
    Terminate,
    /// Continue with the next step.
    Skip,
    /// Declared retry policy. Retries are not attempted; the walk continues
    /// as with [`FailureStrategy::Skip`].
    Retry,
}

impl fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStrategy::Terminate => write!(f, "TERMINATE"),
            FailureStrategy::Skip => write!(f, "SKIP"),
            FailureStrategy::Retry => write!(f, "RETRY"),
        }
    }
}

/// Declared execution mode of a flow. Only `Sequential` is executed as
/// declared; the others run sequentially with a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
    Branch,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "SEQUENTIAL"),
            ExecutionMode::Parallel => write!(f, "PARALLEL"),
            ExecutionMode::Branch => write!(f, "BRANCH"),
        }
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// One step of a flow, as authored or persisted.
///
/// Deserialization goes through [`StepRecord`] so that persisted aliases
/// and the `failStop` flag are accepted alongside the canonical fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StepRecord")]
pub struct StepDefinition {
    /// Step id, unique within the flow.
    pub id: String,
    /// Type tag resolved against the step registry.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Static configuration copied into the context before the step runs.
    pub config: ValueMap,
    /// Context key for the step's output. Defaults to `"<id>.output"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    pub failure_strategy: FailureStrategy,
    /// Declared retry count (not acted on by the engine).
    pub retry_count: u32,
    /// Declared retry interval in milliseconds (not acted on by the engine).
    pub retry_interval_ms: u64,
}

impl StepDefinition {
    /// Create a step with empty config and the default failure strategy.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            config: ValueMap::new(),
            output_key: None,
            failure_strategy: FailureStrategy::default(),
            retry_count: 0,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }

    pub fn with_config(mut self, config: ValueMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    /// The context key this step's output is written under.
    pub fn resolved_output_key(&self) -> String {
        match &self.output_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => format!("{}{OUTPUT_KEY_SUFFIX}", self.id),
        }
    }
}

/// Wire shape of a step record, accepting both authored and persisted
/// field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepRecord {
    #[serde(alias = "stepId")]
    id: String,
    #[serde(rename = "type", alias = "stepType")]
    step_type: String,
    #[serde(default, alias = "stepConfig")]
    config: Option<ValueMap>,
    #[serde(default)]
    output_key: Option<String>,
    #[serde(default)]
    failure_strategy: Option<FailureStrategy>,
    #[serde(default)]
    fail_stop: Option<bool>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_retry_interval_ms", alias = "retryInterval")]
    retry_interval_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl From<StepRecord> for StepDefinition {
    fn from(record: StepRecord) -> Self {
        // An explicit strategy wins. Otherwise only `failStop: true` stops
        // the flow; a missing flag keeps going.
        let failure_strategy = match (record.failure_strategy, record.fail_stop) {
            (Some(strategy), _) => strategy,
            (None, Some(true)) => FailureStrategy::Terminate,
            (None, Some(false) | None) => FailureStrategy::Skip,
        };

        Self {
            id: record.id,
            step_type: record.step_type,
            config: record.config.unwrap_or_default(),
            output_key: record.output_key,
            failure_strategy,
            retry_count: record.retry_count,
            retry_interval_ms: record.retry_interval_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// FlowDefinition
// ---------------------------------------------------------------------------

/// A named, ordered pipeline of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(alias = "flowId")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            steps,
            execution_mode: ExecutionMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_key_defaults_to_step_id_suffix() {
        let step = StepDefinition::new("load", "DATASOURCE_QUERY");
        assert_eq!(step.resolved_output_key(), "load.output");

        let step = step.with_output_key("user");
        assert_eq!(step.resolved_output_key(), "user");
    }

    #[test]
    fn test_empty_output_key_falls_back_to_default() {
        let step = StepDefinition::new("load", "X").with_output_key("");
        assert_eq!(step.resolved_output_key(), "load.output");
    }

    #[test]
    fn test_deserialize_persisted_aliases() {
        let step: StepDefinition = serde_json::from_value(json!({
            "stepId": "s1",
            "stepType": "PARAM_TRANSFORM",
            "stepConfig": { "sourceParam": "age" },
            "failStop": false
        }))
        .unwrap();

        assert_eq!(step.id, "s1");
        assert_eq!(step.step_type, "PARAM_TRANSFORM");
        assert_eq!(step.config["sourceParam"], json!("age"));
        assert_eq!(step.failure_strategy, FailureStrategy::Skip);
        assert_eq!(step.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
    }

    #[test]
    fn test_deserialize_canonical_fields() {
        let step: StepDefinition = serde_json::from_value(json!({
            "id": "s2",
            "type": "SCRIPT",
            "config": { "scriptCode": "1" },
            "outputKey": "calc",
            "failureStrategy": "RETRY",
            "retryCount": 3,
            "retryIntervalMs": 250
        }))
        .unwrap();

        assert_eq!(step.failure_strategy, FailureStrategy::Retry);
        assert_eq!(step.retry_count, 3);
        assert_eq!(step.retry_interval_ms, 250);
        assert_eq!(step.resolved_output_key(), "calc");
    }

    #[test]
    fn test_only_fail_stop_true_terminates() {
        let stop: StepDefinition =
            serde_json::from_value(json!({"id": "a", "type": "X", "failStop": true})).unwrap();
        let absent: StepDefinition =
            serde_json::from_value(json!({"id": "b", "type": "X"})).unwrap();
        let null: StepDefinition =
            serde_json::from_value(json!({"id": "c", "type": "X", "failStop": null})).unwrap();
        assert_eq!(stop.failure_strategy, FailureStrategy::Terminate);
        assert_eq!(absent.failure_strategy, FailureStrategy::Skip);
        assert_eq!(null.failure_strategy, FailureStrategy::Skip);
        assert!(absent.config.is_empty());
    }

    #[test]
    fn test_explicit_strategy_wins_over_fail_stop() {
        let step: StepDefinition = serde_json::from_value(json!({
            "id": "a", "type": "X", "failStop": true, "failureStrategy": "SKIP"
        }))
        .unwrap();
        assert_eq!(step.failure_strategy, FailureStrategy::Skip);
    }

    #[test]
    fn test_null_config_is_empty() {
        let step: StepDefinition =
            serde_json::from_value(json!({"id": "a", "type": "X", "config": null})).unwrap();
        assert!(step.config.is_empty());
    }

    #[test]
    fn test_flow_definition_yaml() {
        let yaml = r#"
flowId: get-user
name: Get user
executionMode: PARALLEL
steps:
  - stepId: validate
    stepType: PARAM_TRANSFORM
    stepConfig:
      sourceParam: id
  - id: respond
    type: RESPONSE
"#;
        let flow: FlowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(flow.id, "get-user");
        assert_eq!(flow.execution_mode, ExecutionMode::Parallel);
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[1].step_type, "RESPONSE");
    }

    #[test]
    fn test_step_definition_serialization_round_trip() {
        let step = StepDefinition::new("x", "SCRIPT")
            .with_failure_strategy(FailureStrategy::Skip)
            .with_output_key("out");
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], json!("SCRIPT"));
        assert_eq!(value["failureStrategy"], json!("SKIP"));

        let back: StepDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(FailureStrategy::Terminate.to_string(), "TERMINATE");
        assert_eq!(ExecutionMode::Branch.to_string(), "BRANCH");
    }
}
