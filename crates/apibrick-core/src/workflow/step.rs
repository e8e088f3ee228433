//! The step contract.
//!
//! A step is one unit of work in a flow. Implementations provide a stable
//! type tag, an async `execute` against the shared [`StepContext`], and
//! optional configuration validation plus init/destroy hooks.
//!
//! `Step` uses RPITIT and therefore cannot be a trait object. [`BoxStep`]
//! provides type erasure for the registry:
//! 1. `StepDyn` is an object-safe mirror with boxed futures
//! 2. a blanket impl covers every `T: Step`
//! 3. `BoxStep` wraps `Box<dyn StepDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use apibrick_types::ValueMap;
use apibrick_types::result::{ErrorKind, StepResult};

use super::context::StepContext;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors a step can raise instead of returning a failed [`StepResult`].
///
/// The engine converts every variant into a failed result; none of them
/// propagate past the step boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// Static configuration is structurally invalid.
    #[error("{0}")]
    InvalidConfig(String),

    /// The step's logic failed.
    #[error("{0}")]
    Execution(String),

    /// The step exceeded its time budget.
    #[error("{0}")]
    Timeout(String),

    /// The execution was cancelled.
    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::InvalidConfig(_) => ErrorKind::Config,
            StepError::Execution(_) => ErrorKind::Execution,
            StepError::Timeout(_) => ErrorKind::Timeout,
            StepError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Convert into the failed result the engine records.
    ///
    /// Execution errors are reported as `"Step execution error: <msg>"`.
    pub fn into_result(self) -> StepResult {
        let kind = self.kind();
        let message = match self {
            StepError::Execution(msg) => format!("Step execution error: {msg}"),
            other => other.to_string(),
        };
        StepResult::failure_of_kind(message, kind)
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// A polymorphic unit of work.
pub trait Step: Send + Sync {
    /// Stable, non-empty registry key (e.g. `"PARAM_TRANSFORM"`).
    fn step_type(&self) -> &str;

    /// Run the step against the shared context.
    ///
    /// Business failures are returned as `Ok(StepResult::failure(..))`;
    /// an `Err` is treated as a fault raised inside the call.
    fn execute(
        &self,
        ctx: &mut StepContext,
    ) -> impl Future<Output = Result<StepResult, StepError>> + Send;

    /// Reject structurally invalid static configuration before any
    /// context-dependent logic runs.
    fn validate_config(&self, _config: &ValueMap) -> Result<(), StepError> {
        Ok(())
    }

    /// Called once when the step is registered.
    fn init(&self, _config: &ValueMap) -> Result<(), StepError> {
        Ok(())
    }

    /// Called once at registry teardown.
    fn destroy(&self) {}
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Object-safe version of [`Step`] with boxed futures.
pub trait StepDyn: Send + Sync {
    fn step_type(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>>;

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError>;

    fn init(&self, config: &ValueMap) -> Result<(), StepError>;

    fn destroy(&self);
}

impl<T: Step> StepDyn for T {
    fn step_type(&self) -> &str {
        Step::step_type(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        Step::validate_config(self, config)
    }

    fn init(&self, config: &ValueMap) -> Result<(), StepError> {
        Step::init(self, config)
    }

    fn destroy(&self) {
        Step::destroy(self)
    }
}

/// Type-erased step held by the registry.
pub struct BoxStep {
    inner: Box<dyn StepDyn>,
}

impl BoxStep {
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self {
            inner: Box::new(step),
        }
    }

    pub fn step_type(&self) -> &str {
        self.inner.step_type()
    }

    pub async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        self.inner.execute_boxed(ctx).await
    }

    pub fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        self.inner.validate_config(config)
    }

    pub fn init(&self, config: &ValueMap) -> Result<(), StepError> {
        self.inner.init(config)
    }

    pub fn destroy(&self) {
        self.inner.destroy()
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep")
            .field("step_type", &self.step_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Step for Echo {
        fn step_type(&self) -> &str {
            "ECHO"
        }

        async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
            let mut output = ValueMap::new();
            output.insert("seen".into(), ctx.get("input").cloned().unwrap_or_default());
            Ok(StepResult::success(output))
        }

        fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
            if config.contains_key("input") {
                Ok(())
            } else {
                Err(StepError::InvalidConfig("input is required".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_box_step_delegates() {
        let step = BoxStep::new(Echo);
        assert_eq!(step.step_type(), "ECHO");

        let mut ctx = StepContext::new("f", "t", "DEV", ValueMap::new());
        ctx.set("input", json!(42));
        let result = step.execute(&mut ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["seen"], json!(42));
    }

    #[test]
    fn test_box_step_validate_config() {
        let step = BoxStep::new(Echo);
        let err = step.validate_config(&ValueMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.to_string(), "input is required");
    }

    #[test]
    fn test_execution_error_message_is_prefixed() {
        let result = StepError::Execution("disk on fire".into()).into_result();
        assert_eq!(
            result.error_message.as_deref(),
            Some("Step execution error: disk on fire")
        );
        assert_eq!(result.error_kind, Some(ErrorKind::Execution));
    }

    #[test]
    fn test_timeout_error_keeps_kind() {
        let result = StepError::Timeout("too slow".into()).into_result();
        assert!(result.is_timeout());
        assert_eq!(result.error_message.as_deref(), Some("too slow"));
    }
}
