//! `PARAM_TRANSFORM`: read a request parameter, validate it, convert it to a
//! target type, and publish it under a target name.
//!
//! Config keys: `sourceParam` (required), `targetParam` (defaults to
//! `sourceParam`), `dataType` (`STRING` | `INTEGER` | `LONG` | `DOUBLE` |
//! `BOOLEAN`, default `STRING`), and `validationRules` with `required`,
//! `errorMsg`, `min`, `max`, `minLength`, `maxLength`.

use apibrick_types::ValueMap;
use apibrick_types::result::StepResult;
use serde_json::{Value, json};

use super::PARAM_TRANSFORM;
use crate::workflow::context::StepContext;
use crate::workflow::step::{Step, StepError};

const SUPPORTED_TYPES: [&str; 5] = ["STRING", "INTEGER", "LONG", "DOUBLE", "BOOLEAN"];

pub struct ParamTransformStep;

impl Step for ParamTransformStep {
    fn step_type(&self) -> &str {
        PARAM_TRANSFORM
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        let Some(source) = ctx.param_str("sourceParam").map(str::to_string) else {
            let msg = "sourceParam is required for PARAM_TRANSFORM step";
            tracing::error!("{msg}");
            return Ok(StepResult::failure(msg));
        };
        let target = ctx
            .param_str("targetParam")
            .map_or_else(|| source.clone(), str::to_string);
        let data_type = ctx.param_str("dataType").unwrap_or("STRING").to_ascii_uppercase();
        let rules = Rules(ctx.param("validationRules").and_then(Value::as_object).cloned());

        let raw = ctx.request_param(&source).cloned();
        let required = rules.flag("required");
        let custom_msg = rules.text("errorMsg");

        if is_blank(raw.as_ref()) {
            if required {
                let msg = custom_msg
                    .unwrap_or_else(|| format!("Required parameter '{source}' is missing"));
                tracing::warn!(param = %source, "Parameter validation failed: {msg}");
                return Ok(StepResult::failure(msg));
            }
            return Ok(StepResult::empty());
        }

        let raw = raw.unwrap_or(Value::Null);
        match convert(&raw, &data_type, &rules, &source) {
            Ok(value) => {
                tracing::debug!(source = %source, target = %target, "Parameter transformed");
                ctx.set(target.clone(), value.clone());
                let mut output = ValueMap::new();
                output.insert(target, value);
                Ok(StepResult::success(output))
            }
            Err(msg) => {
                let msg = custom_msg.unwrap_or(msg);
                tracing::warn!(param = %source, "Parameter transformation failed: {msg}");
                Ok(StepResult::failure(msg))
            }
        }
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        let source_ok = config
            .get("sourceParam")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !source_ok {
            return Err(StepError::InvalidConfig(
                "stepConfig.sourceParam must be a non-empty string".into(),
            ));
        }

        if let Some(data_type) = config.get("dataType").and_then(Value::as_str) {
            let upper = data_type.to_ascii_uppercase();
            if !SUPPORTED_TYPES.contains(&upper.as_str()) {
                return Err(StepError::InvalidConfig(format!(
                    "Unsupported dataType '{data_type}' for PARAM_TRANSFORM step"
                )));
            }
        }

        Ok(())
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Optional validation rules.
struct Rules(Option<ValueMap>);

impl Rules {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_ref().and_then(|rules| rules.get(key))
    }

    fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Numeric rule with its display form.
    fn number(&self, key: &str) -> Option<(f64, String)> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64().map(|v| (v, n.to_string())),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|v| (v, s.trim().to_string())),
            _ => None,
        }
    }

    fn length(&self, key: &str) -> Option<usize> {
        self.number(key).map(|(v, _)| v.max(0.0) as usize)
    }
}

fn convert(raw: &Value, data_type: &str, rules: &Rules, name: &str) -> Result<Value, String> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    let invalid = || format!("Parameter '{name}' value '{text}' is not a valid {data_type}");

    match data_type {
        "INTEGER" => {
            let v: i32 = text.parse().map_err(|_| invalid())?;
            check_range(f64::from(v), rules, name)?;
            Ok(json!(v))
        }
        "LONG" => {
            let v: i64 = text.parse().map_err(|_| invalid())?;
            check_range(v as f64, rules, name)?;
            Ok(json!(v))
        }
        "DOUBLE" => {
            let v: f64 = text.parse().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            check_range(v, rules, name)?;
            Ok(json!(v))
        }
        "BOOLEAN" => Ok(json!(text.eq_ignore_ascii_case("true"))),
        "STRING" => {
            let len = text.chars().count();
            if let Some(min) = rules.length("minLength") {
                if len < min {
                    return Err(format!("Parameter '{name}' length must be >= {min}"));
                }
            }
            if let Some(max) = rules.length("maxLength") {
                if len > max {
                    return Err(format!("Parameter '{name}' length must be <= {max}"));
                }
            }
            Ok(json!(text))
        }
        other => Err(format!("Unsupported dataType '{other}' for PARAM_TRANSFORM step")),
    }
}

fn check_range(value: f64, rules: &Rules, name: &str) -> Result<(), String> {
    if let Some((min, shown)) = rules.number("min") {
        if value < min {
            return Err(format!("Parameter '{name}' must be >= {shown}"));
        }
    }
    if let Some((max, shown)) = rules.number("max") {
        if value > max {
            return Err(format!("Parameter '{name}' must be <= {shown}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    /// Context whose request holds `params` and whose variables hold the
    /// step config, as the engine would have copied it.
    fn ctx(params: Value, step_config: Value) -> StepContext {
        let mut ctx = StepContext::new("f", "t", "DEV", config(params));
        ctx.enter_step("s", &config(step_config));
        ctx
    }

    async fn run(params: Value, step_config: Value) -> (StepResult, StepContext) {
        let mut c = ctx(params, step_config);
        let result = ParamTransformStep.execute(&mut c).await.unwrap();
        (result, c)
    }

    #[test]
    fn test_validate_config_requires_source_param() {
        let err = ParamTransformStep
            .validate_config(&config(json!({"dataType": "LONG"})))
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig(_)));
        assert!(err.to_string().contains("sourceParam"));

        let blank = ParamTransformStep.validate_config(&config(json!({"sourceParam": " "})));
        assert!(blank.is_err());
    }

    #[test]
    fn test_validate_config_rejects_unknown_type() {
        let err = ParamTransformStep
            .validate_config(&config(json!({"sourceParam": "a", "dataType": "DATE"})))
            .unwrap_err();
        assert!(err.to_string().contains("DATE"));
        assert!(
            ParamTransformStep
                .validate_config(&config(json!({"sourceParam": "a", "dataType": "long"})))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_converts_and_publishes_target() {
        let (result, c) = run(
            json!({"age": " 42 "}),
            json!({"sourceParam": "age", "targetParam": "userAge", "dataType": "INTEGER"}),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.output["userAge"], json!(42));
        assert_eq!(c.get("userAge"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_target_defaults_to_source() {
        let (result, _) = run(json!({"flag": "TRUE"}), json!({"sourceParam": "flag", "dataType": "BOOLEAN"})).await;
        assert_eq!(result.output["flag"], json!(true));
    }

    #[tokio::test]
    async fn test_numeric_request_values() {
        let (result, _) = run(json!({"id": 9_000_000_000i64}), json!({"sourceParam": "id", "dataType": "LONG"})).await;
        assert_eq!(result.output["id"], json!(9_000_000_000i64));

        let (result, _) = run(json!({"id": 9_000_000_000i64}), json!({"sourceParam": "id", "dataType": "INTEGER"})).await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Parameter 'id' value '9000000000' is not a valid INTEGER")
        );
    }

    #[tokio::test]
    async fn test_required_missing() {
        let (result, _) = run(
            json!({}),
            json!({"sourceParam": "id", "validationRules": {"required": true}}),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Required parameter 'id' is missing"));
    }

    #[tokio::test]
    async fn test_optional_missing_is_empty_success() {
        let (result, c) = run(json!({"id": "  "}), json!({"sourceParam": "id", "dataType": "LONG"})).await;
        assert!(result.success);
        assert!(result.output.is_empty());
        assert!(c.get("id").is_none());
    }

    #[tokio::test]
    async fn test_range_rules() {
        let step_config = json!({
            "sourceParam": "qty", "dataType": "DOUBLE",
            "validationRules": {"min": 1, "max": 10.5}
        });
        let (low, _) = run(json!({"qty": "0.5"}), step_config.clone()).await;
        assert_eq!(low.error_message.as_deref(), Some("Parameter 'qty' must be >= 1"));

        let (high, _) = run(json!({"qty": "11"}), step_config.clone()).await;
        assert_eq!(high.error_message.as_deref(), Some("Parameter 'qty' must be <= 10.5"));

        let (ok, _) = run(json!({"qty": "2.5"}), step_config).await;
        assert_eq!(ok.output["qty"], json!(2.5));
    }

    #[tokio::test]
    async fn test_string_length_rules() {
        let step_config = json!({
            "sourceParam": "code",
            "validationRules": {"minLength": 2, "maxLength": 4}
        });
        let (short, _) = run(json!({"code": "a"}), step_config.clone()).await;
        assert_eq!(short.error_message.as_deref(), Some("Parameter 'code' length must be >= 2"));

        let (long, _) = run(json!({"code": "abcde"}), step_config).await;
        assert_eq!(long.error_message.as_deref(), Some("Parameter 'code' length must be <= 4"));
    }

    #[tokio::test]
    async fn test_string_without_max_length_accepts_any_length() {
        let (result, _) = run(
            json!({"name": "a fairly long parameter value"}),
            json!({"sourceParam": "name", "dataType": "STRING"}),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.output["name"], json!("a fairly long parameter value"));
    }

    #[tokio::test]
    async fn test_custom_error_message() {
        let (result, _) = run(
            json!({"age": "abc"}),
            json!({"sourceParam": "age", "dataType": "INTEGER", "validationRules": {"errorMsg": "age must be numeric"}}),
        )
        .await;
        assert_eq!(result.error_message.as_deref(), Some("age must be numeric"));
    }

    #[tokio::test]
    async fn test_non_finite_double_rejected() {
        let (result, _) = run(json!({"x": "NaN"}), json!({"sourceParam": "x", "dataType": "DOUBLE"})).await;
        assert!(!result.success);
    }
}
