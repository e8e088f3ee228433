//! `CONDITIONAL`: evaluate a JEXL condition and record the verdict.

use apibrick_types::ValueMap;
use apibrick_types::result::StepResult;
use serde_json::{Value, json};

use super::CONDITIONAL;
use crate::workflow::context::StepContext;
use crate::workflow::expression::ExpressionEvaluator;
use crate::workflow::step::{Step, StepError};

pub const CONDITION_RESULT_KEY: &str = "conditionResult";
pub const CONDITION_MET_KEY: &str = "conditionMet";

pub struct ConditionalStep;

impl Step for ConditionalStep {
    fn step_type(&self) -> &str {
        CONDITIONAL
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        let Some(condition) = ctx.param_str("condition").map(str::to_string) else {
            return Ok(StepResult::failure("Condition expression is required"));
        };

        let verdict = evaluate(&condition, ctx);
        tracing::debug!(condition = %condition, result = verdict, "Condition evaluated");

        ctx.set(CONDITION_RESULT_KEY, json!(verdict));
        ctx.set(CONDITION_MET_KEY, json!(verdict));

        let mut output = ValueMap::new();
        output.insert("condition".into(), json!(condition));
        output.insert("result".into(), json!(verdict));
        Ok(StepResult::success(output))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        match config.get("condition") {
            None => Ok(()),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
            Some(_) => Err(StepError::InvalidConfig(
                "stepConfig.condition must be a non-empty expression".into(),
            )),
        }
    }
}

/// Evaluation errors count as `false`.
fn evaluate(condition: &str, ctx: &StepContext) -> bool {
    let evaluator = ExpressionEvaluator::new();
    match evaluator.evaluate_condition(condition, &ctx.to_expression_context()) {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!(condition, error = %e, "Condition evaluation failed, treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(params: Value, step_config: Value) -> StepContext {
        let mut ctx = StepContext::new(
            "f",
            "t",
            "DEV",
            params.as_object().cloned().unwrap(),
        );
        ctx.enter_step("check", step_config.as_object().unwrap());
        ctx
    }

    #[tokio::test]
    async fn test_true_condition() {
        let mut c = ctx(json!({"age": 30}), json!({"condition": "request.age > 18"}));
        let result = ConditionalStep.execute(&mut c).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], json!(true));
        assert_eq!(result.output["condition"], json!("request.age > 18"));
        assert_eq!(c.get(CONDITION_RESULT_KEY), Some(&json!(true)));
        assert_eq!(c.get(CONDITION_MET_KEY), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_false_condition() {
        let mut c = ctx(json!({"age": 10}), json!({"condition": "request.age > 18"}));
        let result = ConditionalStep.execute(&mut c).await.unwrap();
        assert_eq!(result.output["result"], json!(false));
        assert_eq!(c.get(CONDITION_MET_KEY), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_string_true_counts() {
        let mut c = ctx(json!({"flag": "TRUE"}), json!({"condition": "request.flag"}));
        let result = ConditionalStep.execute(&mut c).await.unwrap();
        assert_eq!(result.output["result"], json!(true));
    }

    #[tokio::test]
    async fn test_evaluation_error_is_false() {
        let mut c = ctx(json!({}), json!({"condition": "((("}));
        let result = ConditionalStep.execute(&mut c).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], json!(false));
    }

    #[tokio::test]
    async fn test_missing_condition_fails() {
        let mut c = ctx(json!({}), json!({}));
        let result = ConditionalStep.execute(&mut c).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Condition expression is required"));
    }

    #[test]
    fn test_validate_config_rejects_non_string() {
        let config = json!({"condition": 5}).as_object().cloned().unwrap();
        assert!(ConditionalStep.validate_config(&config).is_err());
    }
}
