//! Pipeline engine.
//!
//! Walks a [`FlowDefinition`] strictly in order, one step at a time:
//!
//! 1. An empty flow fails immediately ("No steps defined in workflow").
//! 2. Before each step its static config is copied into the context.
//! 3. The step type is resolved in the registry; an unknown type fails the
//!    slot and stops the walk regardless of failure strategy. The step's
//!    config is then validated.
//! 4. The step runs under the uniform step timeout and the caller's
//!    cancellation token. Elapsed time, step id and type are back-filled and
//!    a non-empty successful output is written under the step's output key.
//! 5. A failure with `TERMINATE` stops the walk; `SKIP` and `RETRY` continue
//!    (no retry is attempted).
//! 6. Overall success requires every collected result to have succeeded.
//!    On success a map-shaped `finalResponse` wins, otherwise step outputs
//!    are merged last-write-wins. On failure the first failure's message is
//!    reported. Elapsed time is the sum of step times.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apibrick_types::ValueMap;
use apibrick_types::config::EngineSettings;
use apibrick_types::flow::{ExecutionMode, FailureStrategy, FlowDefinition, StepDefinition};
use apibrick_types::result::{ErrorKind, StepResult, WorkflowResult};
use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::context::{CANCELLED_KEY, FINAL_RESPONSE_KEY, StepContext, TIMESTAMP_KEY};
use super::registry::StepRegistry;

/// Message of the result returned for a flow without steps.
pub const NO_STEPS_MESSAGE: &str = "No steps defined in workflow";

/// What the walk does after a step slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Continue,
    Stop,
}

/// Drives flow executions through the step registry.
///
/// Holds no per-execution state; one engine serves any number of
/// concurrent executions.
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    registry: Arc<StepRegistry>,
    step_timeout: Option<Duration>,
}

impl PipelineEngine {
    /// Engine with the default step timeout.
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self::with_settings(registry, &EngineSettings::default())
    }

    pub fn with_settings(registry: Arc<StepRegistry>, settings: &EngineSettings) -> Self {
        Self {
            registry,
            step_timeout: settings.step_timeout(),
        }
    }

    /// Override the uniform per-step timeout (`None` disables it).
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Execute a flow to completion.
    ///
    /// The context is borrowed so the caller keeps the final (or partial)
    /// state for diagnostics.
    pub async fn execute(
        &self,
        flow_id: &str,
        flow: &FlowDefinition,
        ctx: &mut StepContext,
    ) -> WorkflowResult {
        self.execute_with_cancellation(flow_id, flow, ctx, &CancellationToken::new())
            .await
    }

    /// Execute a flow, aborting the in-flight step when `cancel` fires.
    ///
    /// A cancelled execution records a failed `CANCELLED` result for the
    /// interrupted step, sets the `cancelled` context variable, and stops.
    pub async fn execute_with_cancellation(
        &self,
        flow_id: &str,
        flow: &FlowDefinition,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        if flow.steps.is_empty() {
            tracing::warn!(flow_id, "Flow has no steps");
            return WorkflowResult::failure(NO_STEPS_MESSAGE, None, 0, ctx.instance_id());
        }

        if flow.execution_mode != ExecutionMode::Sequential {
            tracing::warn!(
                flow_id,
                mode = %flow.execution_mode,
                "Execution mode not supported, running sequentially"
            );
        }

        tracing::info!(
            flow_id,
            instance_id = ctx.instance_id(),
            tenant_id = ctx.tenant_id(),
            steps = flow.steps.len(),
            "Starting flow execution"
        );

        ctx.set(TIMESTAMP_KEY, json!(chrono::Utc::now().timestamp_millis()));

        let mut results = Vec::with_capacity(flow.steps.len());
        for step in &flow.steps {
            let (result, walk) = self.run_step(step, ctx, cancel).await;
            results.push(result);
            if walk == Walk::Stop {
                break;
            }
        }
        ctx.leave_step();

        let workflow = aggregate(results, ctx);
        tracing::info!(
            flow_id,
            instance_id = %workflow.instance_id,
            success = workflow.success,
            elapsed_ms = workflow.elapsed_ms,
            "Flow execution finished"
        );
        workflow
    }

    /// Run one step slot and decide whether the walk continues.
    async fn run_step(
        &self,
        def: &StepDefinition,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> (StepResult, Walk) {
        ctx.enter_step(&def.id, &def.config);

        if cancel.is_cancelled() {
            return (cancelled(def, ctx, 0), Walk::Stop);
        }

        let Some(step) = self.registry.get(&def.step_type) else {
            tracing::warn!(step_id = %def.id, step_type = %def.step_type, "Step type not registered");
            let result = stamp(
                StepResult::failure_of_kind(
                    format!("Step type '{}' not found", def.step_type),
                    ErrorKind::Config,
                ),
                def,
                0,
            );
            return (result, Walk::Stop);
        };

        let started = Instant::now();

        let result = match step.validate_config(&def.config) {
            Err(e) => e.into_result(),
            Ok(()) => {
                tracing::debug!(step_id = %def.id, step_type = %def.step_type, "Executing step");
                let invocation = AssertUnwindSafe(step.execute(ctx)).catch_unwind();
                let bounded = async {
                    match self.step_timeout {
                        Some(limit) => tokio::time::timeout(limit, invocation).await.ok(),
                        None => Some(invocation.await),
                    }
                };

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = bounded => Some(outcome),
                };

                match outcome {
                    None => {
                        let elapsed = elapsed_ms(started);
                        tracing::warn!(step_id = %def.id, elapsed_ms = elapsed, "Step cancelled");
                        return (cancelled(def, ctx, elapsed), Walk::Stop);
                    }
                    Some(None) => StepResult::failure_of_kind(
                        format!(
                            "Step '{}' timed out after {}ms",
                            def.id,
                            self.step_timeout.map_or(0, |d| d.as_millis())
                        ),
                        ErrorKind::Timeout,
                    ),
                    Some(Some(Err(panic))) => StepResult::failure(format!(
                        "Step execution error: {}",
                        panic_message(panic.as_ref())
                    )),
                    Some(Some(Ok(Err(e)))) => e.into_result(),
                    Some(Some(Ok(Ok(result)))) => result,
                }
            }
        };

        let result = stamp(result, def, elapsed_ms(started));

        if result.success {
            tracing::debug!(
                step_id = %def.id,
                elapsed_ms = result.elapsed_ms,
                "Step succeeded"
            );
            if !result.output.is_empty() {
                ctx.set(def.resolved_output_key(), Value::Object(result.output.clone()));
            }
            return (result, Walk::Continue);
        }

        tracing::warn!(
            step_id = %def.id,
            step_type = %def.step_type,
            strategy = %def.failure_strategy,
            error = result.error_message.as_deref().unwrap_or(""),
            "Step failed"
        );

        let walk = match def.failure_strategy {
            FailureStrategy::Terminate => Walk::Stop,
            FailureStrategy::Skip => Walk::Continue,
            FailureStrategy::Retry => {
                tracing::warn!(
                    step_id = %def.id,
                    retry_count = def.retry_count,
                    "Retry strategy declared but not performed, continuing"
                );
                Walk::Continue
            }
        };
        (result, walk)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    apibrick_types::duration_ms(started.elapsed())
}

/// Back-fill timing and identity onto a step's result.
fn stamp(mut result: StepResult, def: &StepDefinition, elapsed_ms: u64) -> StepResult {
    result.elapsed_ms = elapsed_ms;
    result.step_id = Some(def.id.clone());
    result.step_type = Some(def.step_type.clone());
    result
}

fn cancelled(def: &StepDefinition, ctx: &mut StepContext, elapsed_ms: u64) -> StepResult {
    ctx.set(CANCELLED_KEY, json!(true));
    stamp(
        StepResult::failure_of_kind(format!("Step '{}' cancelled", def.id), ErrorKind::Cancelled),
        def,
        elapsed_ms,
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}

/// Fold collected step results into the workflow result.
fn aggregate(results: Vec<StepResult>, ctx: &StepContext) -> WorkflowResult {
    let elapsed: u64 = results.iter().map(|r| r.elapsed_ms).sum();

    if let Some(first_failure) = results.iter().find(|r| !r.success) {
        let message = first_failure
            .error_message
            .clone()
            .unwrap_or_else(|| "Workflow execution failed".to_string());
        let kind = first_failure.error_kind;
        return WorkflowResult::failure(message, kind, elapsed, ctx.instance_id())
            .with_step_results(results);
    }

    let output = match ctx.get(FINAL_RESPONSE_KEY) {
        Some(Value::Object(response)) => response.clone(),
        _ => {
            let mut merged = ValueMap::new();
            for result in &results {
                for (key, value) in &result.output {
                    merged.insert(key.clone(), value.clone());
                }
            }
            merged
        }
    };

    WorkflowResult::success(output, elapsed, ctx.instance_id()).with_step_results(results)
}
