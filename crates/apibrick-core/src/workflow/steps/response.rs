//! `RESPONSE`: render the final response body.

use std::sync::Arc;

use apibrick_types::ValueMap;
use apibrick_types::result::StepResult;
use serde_json::Value;

use super::RESPONSE;
use crate::workflow::context::{FINAL_RESPONSE_KEY, StepContext};
use crate::workflow::response::ResponseRenderer;
use crate::workflow::step::{Step, StepError};

pub struct ResponseStep {
    renderer: Arc<dyn ResponseRenderer>,
}

impl ResponseStep {
    pub fn new(renderer: Arc<dyn ResponseRenderer>) -> Self {
        Self { renderer }
    }
}

impl Step for ResponseStep {
    fn step_type(&self) -> &str {
        RESPONSE
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        let template = ctx.param("responseTemplate").and_then(Value::as_object).cloned();
        let response = Value::Object(self.renderer.render(template.as_ref(), ctx));

        ctx.set(FINAL_RESPONSE_KEY, response.clone());

        let mut output = ValueMap::new();
        output.insert("response".into(), response);
        Ok(StepResult::success(output))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        match config.get("responseTemplate") {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(StepError::InvalidConfig(
                "stepConfig.responseTemplate must be an object".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::response::TemplateResponseRenderer;

    fn step() -> ResponseStep {
        ResponseStep::new(Arc::new(TemplateResponseRenderer::new()))
    }

    #[tokio::test]
    async fn test_renders_template_and_sets_final_response() {
        let mut ctx = StepContext::new(
            "f",
            "acme",
            "DEV",
            json!({"name": "Ada"}).as_object().cloned().unwrap(),
        );
        ctx.enter_step(
            "respond",
            json!({"responseTemplate": {"code": 0, "greeting": "${request.name}"}})
                .as_object()
                .unwrap(),
        );

        let result = step().execute(&mut ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["response"]["greeting"], json!("Ada"));
        assert_eq!(result.output["response"]["code"], json!(0));
        assert_eq!(ctx.get(FINAL_RESPONSE_KEY), Some(&result.output["response"]));
    }

    #[tokio::test]
    async fn test_default_response_without_template() {
        let mut ctx = StepContext::new("f", "acme", "DEV", ValueMap::new());
        ctx.set("total", json!(3));

        let result = step().execute(&mut ctx).await.unwrap();
        let response = &result.output["response"];
        assert_eq!(response["code"], json!(200));
        assert_eq!(response["message"], json!("success"));
        assert_eq!(response["data"]["total"], json!(3));
    }

    #[test]
    fn test_validate_config() {
        let bad = json!({"responseTemplate": "nope"});
        assert!(step().validate_config(bad.as_object().unwrap()).is_err());
        assert!(step().validate_config(&ValueMap::new()).is_ok());
    }
}
