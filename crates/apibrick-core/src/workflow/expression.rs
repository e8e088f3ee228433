//! JEXL expression evaluator for conditional steps and response templates.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//! Expressions are evaluated against the JSON object produced by
//! [`StepContext::to_expression_context`](super::context::StepContext::to_expression_context):
//! `request`, `variables`, `tenantId`, `env`, and `steps`.
//!
//! **Security note:** request data is always passed as context, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms registered.
///
/// Cheap to build; callers construct one per evaluation pass and drop it
/// before any await point.
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(|v| v.as_str()).unwrap_or("")
}

fn second_str(args: &[Value]) -> &str {
    args.get(1).and_then(|v| v.as_str()).unwrap_or("")
}

impl ExpressionEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| Ok(json!(first_str(args).to_lowercase())))
            .with_transform("upper", |args: &[Value]| Ok(json!(first_str(args).to_uppercase())))
            .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = first_str(args).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(first_str(args).contains(second_str(args))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(first_str(args).starts_with(second_str(args))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(first_str(args).ends_with(second_str(args))))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("default", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                if val.is_null() {
                    Ok(args.get(1).cloned().unwrap_or(Value::Null))
                } else {
                    Ok(val)
                }
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression as a condition.
    ///
    /// Booleans are taken as-is, strings are true only when equal to
    /// `"true"` (case-insensitive), null is false, and any other value is
    /// true.
    pub fn evaluate_condition(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let value = self.evaluate_value(expression, context)?;
        Ok(Self::condition_value(&value))
    }

    /// Coerce a value using the condition rules of [`Self::evaluate_condition`].
    pub fn condition_value(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            Value::Null => false,
            _ => true,
        }
    }

    /// JavaScript-like truthiness, used by the `not` transform.
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
