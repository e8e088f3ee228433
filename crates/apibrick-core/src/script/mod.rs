//! Script sandbox port.
//!
//! A [`ScriptEngine`] runs operator-supplied script text against a snapshot
//! of context variables under [`ScriptLimits`]. Implementations must offload
//! execution from the async scheduler threads, enforce the wall-clock budget
//! by cancelling the in-flight run, and report timeouts as
//! [`ScriptError::Timeout`] rather than a runtime error. The budget starts
//! when the script starts running, so time spent waiting for a free worker
//! does not count against it.
//!
//! The sandbox is best-effort isolation, not a security boundary.

use std::future::Future;

use apibrick_types::ValueMap;
use apibrick_types::script::{ScriptError, ScriptLimits};
use serde_json::Value;

pub trait ScriptEngine: Send + Sync {
    /// Execute `script` with `bindings` in scope and return its value.
    fn execute(
        &self,
        script: &str,
        bindings: ValueMap,
        limits: ScriptLimits,
    ) -> impl Future<Output = Result<Value, ScriptError>> + Send;

    /// Compile without running.
    fn validate_syntax(&self, script: &str) -> Result<(), ScriptError>;

    /// Limits applied when a caller does not override them.
    fn default_limits(&self) -> ScriptLimits {
        ScriptLimits::default()
    }
}
