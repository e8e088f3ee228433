//! Step and workflow result types.
//!
//! Failures are represented as data: a failed [`StepResult`] carries an
//! error message and an [`ErrorKind`] so callers can tell configuration
//! faults and timeouts apart from ordinary execution failures.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValueMap;

/// Category of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Invalid or missing configuration, unknown step type, unsupported
    /// data-source type.
    Config,
    /// Failure raised by the step's own logic.
    Execution,
    /// The step exceeded its time budget.
    Timeout,
    /// The execution was cancelled by the caller.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "CONFIG"),
            ErrorKind::Execution => write!(f, "EXECUTION"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of one step invocation.
///
/// `elapsed_ms`, `step_id` and `step_type` are back-filled by the engine
/// after the step returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub output: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
}

impl StepResult {
    /// A successful result with the given output.
    pub fn success(output: ValueMap) -> Self {
        Self {
            success: true,
            output,
            error_message: None,
            error_kind: None,
            elapsed_ms: 0,
            step_id: None,
            step_type: None,
        }
    }

    /// A successful result with no output.
    pub fn empty() -> Self {
        Self::success(ValueMap::new())
    }

    /// A failed execution result.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::failure_of_kind(message, ErrorKind::Execution)
    }

    /// A failed result of a specific kind.
    pub fn failure_of_kind(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            success: false,
            output: ValueMap::new(),
            error_message: Some(message.into()),
            error_kind: Some(kind),
            elapsed_ms: 0,
            step_id: None,
            step_type: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}

// ---------------------------------------------------------------------------
// WorkflowResult
// ---------------------------------------------------------------------------

/// Terminal outcome of one flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default)]
    pub output: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Sum of the executed steps' individual times.
    pub elapsed_ms: u64,
    pub instance_id: String,
    /// Every collected step result, in execution order.
    #[serde(default)]
    pub step_results: Vec<StepResult>,
}

impl WorkflowResult {
    pub fn success(output: ValueMap, elapsed_ms: u64, instance_id: impl Into<String>) -> Self {
        Self {
            success: true,
            output,
            error_message: None,
            error_kind: None,
            elapsed_ms,
            instance_id: instance_id.into(),
            step_results: Vec::new(),
        }
    }

    pub fn failure(
        message: impl Into<String>,
        kind: Option<ErrorKind>,
        elapsed_ms: u64,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            output: ValueMap::new(),
            error_message: Some(message.into()),
            error_kind: kind,
            elapsed_ms,
            instance_id: instance_id.into(),
            step_results: Vec::new(),
        }
    }

    pub fn with_step_results(mut self, results: Vec<StepResult>) -> Self {
        self.step_results = results;
        self
    }
}
