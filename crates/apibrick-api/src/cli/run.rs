//! `apibrick run` and `apibrick validate`.

use std::path::Path;

use anyhow::{Context, Result};
use apibrick_core::workflow::definition::{load_flow_file, validate_against_registry};
use apibrick_types::ValueMap;
use apibrick_types::result::{StepResult, WorkflowResult};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Request-scoped inputs of a run.
pub struct RunRequest {
    pub tenant: Option<String>,
    pub env: Option<String>,
    pub params: ValueMap,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Execute a flow file. Returns whether the workflow succeeded.
///
/// Ctrl+C cancels the in-flight step; the partial result is still printed.
pub async fn handle_run(flow_path: &Path, request: RunRequest, state: &AppState, json: bool) -> Result<bool> {
    let result = run_flow(flow_path, request, state, &ctrl_c_token()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result.success)
}

/// Load and execute a flow under `cancel`.
pub async fn run_flow(
    flow_path: &Path,
    request: RunRequest,
    state: &AppState,
    cancel: &CancellationToken,
) -> Result<WorkflowResult> {
    let flow = load_flow_file(flow_path)
        .await
        .with_context(|| format!("Failed to load flow '{}'", flow_path.display()))?;

    let mut ctx = state.new_context(&flow.id, request.tenant, request.env, request.params);
    let result = state
        .engine
        .execute_with_cancellation(&flow.id, &flow, &mut ctx, cancel)
        .await;
    Ok(result)
}

fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling flow");
            trigger.cancel();
        }
    });
    token
}

fn print_result(result: &WorkflowResult) {
    println!();
    if result.success {
        println!(
            "  {} Flow succeeded in {}ms",
            style("*").green().bold(),
            result.elapsed_ms
        );
    } else {
        println!(
            "  {} Flow failed: {}",
            style("x").red().bold(),
            style(result.error_message.as_deref().unwrap_or("unknown error")).red()
        );
        if let Some(kind) = result.error_kind {
            println!("  Kind: {kind}");
        }
    }
    println!("  Instance: {}", style(&result.instance_id).dim());
    println!();

    if !result.step_results.is_empty() {
        println!("{}", step_table(&result.step_results));
        println!();
    }

    if result.success {
        println!("  {}", style("── Output ──").dim());
        let rendered = serde_json::to_string_pretty(&result.output).unwrap_or_default();
        for line in rendered.lines() {
            println!("  {line}");
        }
        println!();
    }
}

fn step_table(results: &[StepResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Step", "Type", "Status", "Time", "Error"]);

    for step in results {
        let status = if step.success {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("failed").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(step.step_id.as_deref().unwrap_or("-")),
            Cell::new(step.step_type.as_deref().unwrap_or("-")),
            status,
            Cell::new(format!("{}ms", step.elapsed_ms)),
            Cell::new(step.error_message.as_deref().unwrap_or("")),
        ]);
    }
    table
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Check a flow file against the registry. Returns whether it is valid.
pub async fn handle_validate(flow_path: &Path, state: &AppState, json: bool) -> Result<bool> {
    let flow = load_flow_file(flow_path)
        .await
        .with_context(|| format!("Failed to load flow '{}'", flow_path.display()))?;
    let problems = validate_against_registry(&flow, &state.registry);

    if json {
        let out = serde_json::json!({
            "flow": flow.id,
            "steps": flow.steps.len(),
            "valid": problems.is_empty(),
            "problems": problems,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(problems.is_empty());
    }

    println!();
    if problems.is_empty() {
        println!(
            "  {} Flow '{}' is valid ({} steps)",
            style("*").green().bold(),
            style(&flow.id).cyan(),
            flow.steps.len()
        );
    } else {
        println!(
            "  {} Flow '{}' has {} problem(s):",
            style("x").red().bold(),
            style(&flow.id).cyan(),
            problems.len()
        );
        for problem in &problems {
            println!("    - {problem}");
        }
    }
    println!();
    Ok(problems.is_empty())
}
