//! Response rendering.
//!
//! The `RESPONSE` step delegates to a [`ResponseRenderer`] to turn a
//! declarative template into the final response map. The default
//! [`TemplateResponseRenderer`] understands:
//!
//! - `"${expr}"` strings, evaluated as JEXL against the expression context
//! - nested maps and lists, rendered recursively
//! - field mappings: maps carrying `sourceType` (`fixed`, `stepOutput`,
//!   `requestParam`, `expression`) plus optional `sourceValue`,
//!   `defaultValue`, `condition` and `transform`
//! - any other value, passed through unchanged
//!
//! An empty or missing template renders `{code: 200, message: "success",
//! data: <variables>}`.

use apibrick_types::ValueMap;
use apibrick_types::flow::OUTPUT_KEY_SUFFIX;
use serde_json::{Value, json};

use super::context::StepContext;
use super::expression::ExpressionEvaluator;

/// Renders a response template against the step context.
pub trait ResponseRenderer: Send + Sync {
    fn render(&self, template: Option<&ValueMap>, ctx: &StepContext) -> ValueMap;
}

/// JEXL-backed default renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateResponseRenderer;

impl TemplateResponseRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseRenderer for TemplateResponseRenderer {
    fn render(&self, template: Option<&ValueMap>, ctx: &StepContext) -> ValueMap {
        let template = match template {
            Some(t) if !t.is_empty() => t,
            _ => return default_response(ctx),
        };

        let pass = RenderPass {
            evaluator: ExpressionEvaluator::new(),
            expression_context: ctx.to_expression_context(),
            ctx,
        };

        template
            .iter()
            .map(|(field, config)| (field.clone(), pass.field(config)))
            .collect()
    }
}

fn default_response(ctx: &StepContext) -> ValueMap {
    let mut response = ValueMap::new();
    response.insert("code".into(), json!(200));
    response.insert("message".into(), json!("success"));
    response.insert("data".into(), Value::Object(ctx.variables().clone()));
    response
}

/// State shared while rendering one template.
struct RenderPass<'a> {
    evaluator: ExpressionEvaluator,
    expression_context: Value,
    ctx: &'a StepContext,
}

impl RenderPass<'_> {
    fn field(&self, config: &Value) -> Value {
        match config {
            Value::Object(map) if map.contains_key("sourceType") => self.mapping(map),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, nested)| (key.clone(), self.field(nested)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.field(item)).collect()),
            Value::String(s) => match expression_body(s) {
                Some(expr) => self.evaluate(expr),
                None => config.clone(),
            },
            other => other.clone(),
        }
    }

    fn mapping(&self, map: &ValueMap) -> Value {
        let source_type = map.get("sourceType").and_then(Value::as_str).unwrap_or("");
        let source_value = map.get("sourceValue");
        let default_value = map.get("defaultValue").cloned().unwrap_or(Value::Null);

        if let Some(condition) = map.get("condition").and_then(Value::as_str) {
            if !condition.is_empty()
                && !ExpressionEvaluator::condition_value(&self.evaluate(condition))
            {
                return default_value;
            }
        }

        let source_str = source_value.and_then(Value::as_str);
        let value = match source_type {
            "fixed" => source_value.cloned().unwrap_or(Value::Null),
            "stepOutput" => source_str.map_or(Value::Null, |s| self.step_output(s)),
            "requestParam" => source_str
                .and_then(|s| self.ctx.request_param(s))
                .cloned()
                .unwrap_or(Value::Null),
            "expression" => source_str.map_or(Value::Null, |s| self.evaluate(s)),
            other => {
                tracing::warn!(source_type = other, "Unknown response field sourceType");
                default_value.clone()
            }
        };

        let value = if value.is_null() { default_value } else { value };

        match map.get("transform").and_then(Value::as_str) {
            Some(transform) if !value.is_null() => apply_transform(value, transform),
            _ => value,
        }
    }

    /// Resolve `"stepId.field"`, `"${expr}"`, or a plain context key.
    fn step_output(&self, source: &str) -> Value {
        if let Some(expr) = expression_body(source) {
            return self.evaluate(expr);
        }
        if let Some((step_id, field)) = source.split_once('.') {
            let key = format!("{step_id}{OUTPUT_KEY_SUFFIX}");
            if let Some(Value::Object(output)) = self.ctx.get(&key) {
                return output.get(field).cloned().unwrap_or(Value::Null);
            }
        }
        self.ctx.get(source).cloned().unwrap_or(Value::Null)
    }

    fn evaluate(&self, expression: &str) -> Value {
        match self
            .evaluator
            .evaluate_value(expression, &self.expression_context)
        {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(expression, error = %e, "Response expression failed");
                Value::Null
            }
        }
    }
}

fn expression_body(s: &str) -> Option<&str> {
    s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
}

fn apply_transform(value: Value, transform: &str) -> Value {
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match transform.to_ascii_lowercase().as_str() {
        "mask" => {
            let chars: Vec<char> = text.chars().collect();
            if chars.len() > 4 {
                let tail: String = chars[chars.len() - 4..].iter().collect();
                json!(format!("****{tail}"))
            } else {
                json!("****")
            }
        }
        "upper" => json!(text.to_uppercase()),
        "lower" => json!(text.to_lowercase()),
        "encrypt" | "format" => value,
        other => {
            tracing::warn!(transform = other, "Unknown response field transform");
            value
        }
    }
}
