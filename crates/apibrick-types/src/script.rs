//! Script sandbox limits and errors.

use std::time::Duration;

use thiserror::Error;

/// Default wall-clock budget for one script execution.
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 500;

/// Default memory ceiling for one script execution.
pub const DEFAULT_SCRIPT_MEMORY_MB: u64 = 100;

/// Resource limits applied to a single script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Hard wall-clock budget.
    pub timeout: Duration,
    /// Intended memory ceiling in bytes. Enforced on a best-effort basis by
    /// the runtime's size limits.
    pub max_memory_bytes: u64,
    /// Maximum number of runtime operations; 0 means unlimited.
    pub max_operations: u64,
}

impl ScriptLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        crate::duration_ms(self.timeout)
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_SCRIPT_TIMEOUT_MS),
            max_memory_bytes: DEFAULT_SCRIPT_MEMORY_MB * 1024 * 1024,
            max_operations: 0,
        }
    }
}

/// Errors raised by the script sandbox.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script compilation failed: {0}")]
    Compile(String),

    #[error("script runtime error: {0}")]
    Runtime(String),

    /// Distinct from [`ScriptError::Runtime`] so callers can alert on it.
    #[error("script execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("script exceeded resource limit: {0}")]
    ResourceLimit(String),

    #[error("script execution cancelled")]
    Cancelled,

    #[error("script worker pool unavailable: {0}")]
    Pool(String),
}

impl ScriptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScriptError::Timeout { .. })
    }
}
