//! Shared domain types for APIBrick.
//!
//! Plain serde data: flow and step definitions, step/workflow results,
//! data-source descriptors, script limits, settings, and the error enums
//! shared between the core engine and its infrastructure adapters.

pub mod config;
pub mod datasource;
pub mod flow;
pub mod result;
pub mod script;

/// Free-form string-keyed JSON map used for step configuration, step
/// outputs, request parameters, and context variables.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
