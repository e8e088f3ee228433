//! `SCRIPT`: run operator-supplied code in the sandbox.
//!
//! Config keys: `scriptCode` (required) and `timeoutMs` (optional override of
//! the engine's default wall-clock budget). The script's value is published
//! as `{result}`.

use std::sync::Arc;
use std::time::Duration;

use apibrick_types::ValueMap;
use apibrick_types::result::{ErrorKind, StepResult};
use apibrick_types::script::ScriptError;
use serde_json::Value;

use super::SCRIPT;
use crate::script::ScriptEngine;
use crate::workflow::context::StepContext;
use crate::workflow::step::{Step, StepError};

pub struct ScriptStep<E> {
    engine: Arc<E>,
    type_tag: &'static str,
}

impl<E: ScriptEngine> ScriptStep<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_type_tag(engine, SCRIPT)
    }

    /// Same step under another registry key.
    pub fn with_type_tag(engine: Arc<E>, type_tag: &'static str) -> Self {
        Self { engine, type_tag }
    }
}

impl<E: ScriptEngine> Step for ScriptStep<E> {
    fn step_type(&self) -> &str {
        self.type_tag
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        let Some(script) = ctx.param_str("scriptCode").map(str::to_string) else {
            return Ok(StepResult::failure("Script code is required"));
        };

        let mut limits = self.engine.default_limits();
        if let Some(ms) = ctx.param("timeoutMs").and_then(Value::as_u64).filter(|ms| *ms > 0) {
            limits = limits.with_timeout(Duration::from_millis(ms));
        }
        let bindings = ctx.script_bindings();

        match self.engine.execute(&script, bindings, limits).await {
            Ok(value) => {
                let mut output = ValueMap::new();
                output.insert("result".into(), value);
                Ok(StepResult::success(output))
            }
            Err(ScriptError::Timeout { timeout_ms }) => {
                tracing::warn!(timeout_ms, "Script execution timed out");
                Ok(StepResult::failure_of_kind(
                    format!("Script execution timeout after {timeout_ms}ms"),
                    ErrorKind::Timeout,
                ))
            }
            Err(ScriptError::Cancelled) => Err(StepError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Script execution failed");
                Ok(StepResult::failure(format!("Script execution error: {e}")))
            }
        }
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        let Some(script) = config.get("scriptCode") else {
            return Ok(());
        };
        let Some(script) = script.as_str().filter(|s| !s.trim().is_empty()) else {
            return Err(StepError::InvalidConfig(
                "stepConfig.scriptCode must be a non-empty string".into(),
            ));
        };
        if let Some(timeout) = config.get("timeoutMs") {
            if timeout.as_u64().is_none_or(|ms| ms == 0) {
                return Err(StepError::InvalidConfig(format!(
                    "stepConfig.timeoutMs must be a positive integer, got {timeout}"
                )));
            }
        }

        self.engine
            .validate_syntax(script)
            .map_err(|e| StepError::InvalidConfig(format!("stepConfig.scriptCode does not compile: {e}")))
    }
}
