//! Flow definition parsing, validation, and file loading.
//!
//! Converts JSON or YAML documents into the canonical [`FlowDefinition`]
//! and validates structural constraints (non-empty id, unique step ids,
//! non-empty type tags). Registry-aware checks live in
//! [`validate_against_registry`].

use std::collections::HashSet;
use std::path::Path;

use apibrick_types::flow::FlowDefinition;
use thiserror::Error;

use super::registry::StepRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building a flow definition.
///
/// These happen outside the per-step walk and propagate to the caller.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a YAML flow document.
pub fn parse_flow_yaml(yaml: &str) -> Result<FlowDefinition, FlowError> {
    let flow: FlowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| FlowError::Parse(e.to_string()))?;
    validate_definition(&flow)?;
    Ok(flow)
}

/// Parse and validate a JSON flow document.
pub fn parse_flow_json(json: &str) -> Result<FlowDefinition, FlowError> {
    let flow: FlowDefinition =
        serde_json::from_str(json).map_err(|e| FlowError::Parse(e.to_string()))?;
    validate_definition(&flow)?;
    Ok(flow)
}

/// Load a flow from disk. `.json` files are parsed as JSON, everything else
/// as YAML.
pub async fn load_flow_file(path: &Path) -> Result<FlowDefinition, FlowError> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        parse_flow_json(&content)
    } else {
        parse_flow_yaml(&content)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check structural constraints that do not depend on the registry.
///
/// An empty step list is allowed here; the engine reports it as a failed
/// workflow result.
pub fn validate_definition(flow: &FlowDefinition) -> Result<(), FlowError> {
    if flow.id.trim().is_empty() {
        return Err(FlowError::Validation("flow id must be non-empty".into()));
    }

    let mut seen = HashSet::new();
    for step in &flow.steps {
        if step.id.trim().is_empty() {
            return Err(FlowError::Validation(format!(
                "flow '{}' has a step with an empty id",
                flow.id
            )));
        }
        if step.step_type.trim().is_empty() {
            return Err(FlowError::Validation(format!(
                "step '{}' has an empty type",
                step.id
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(FlowError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    Ok(())
}

/// Check every step type is registered and every step's static config
/// passes its `validate_config`. Returns one message per problem.
pub fn validate_against_registry(flow: &FlowDefinition, registry: &StepRegistry) -> Vec<String> {
    let mut problems = Vec::new();
    for step in &flow.steps {
        match registry.get(&step.step_type) {
            None => problems.push(format!(
                "step '{}': Step type '{}' not found",
                step.id, step.step_type
            )),
            Some(implementation) => {
                if let Err(e) = implementation.validate_config(&step.config) {
                    problems.push(format!("step '{}': {e}", step.id));
                }
            }
        }
    }
    problems
}
