//! `DATASOURCE_QUERY`: run a declarative query against a tenant data source.
//!
//! Config keys: `dsId`, `dsType`, `queryConfig`, and an optional inline
//! `dsConfig` used when the configuration provider has no entry for the
//! source. The backend result is published as `{data}`.

use std::sync::Arc;
use std::time::Duration;

use apibrick_types::{ValueMap, duration_ms};
use apibrick_types::datasource::{DataSourceError, DataSourceType};
use apibrick_types::result::{ErrorKind, StepResult};
use serde_json::Value;

use super::DATASOURCE_QUERY;
use crate::datasource::manager::DataSourceManager;
use crate::datasource::provider::DataSourceConfigProvider;
use crate::workflow::context::StepContext;
use crate::workflow::step::{Step, StepError};

pub struct DataSourceQueryStep {
    manager: Arc<DataSourceManager>,
    configs: Arc<dyn DataSourceConfigProvider>,
    query_timeout: Duration,
}

impl DataSourceQueryStep {
    pub fn new(
        manager: Arc<DataSourceManager>,
        configs: Arc<dyn DataSourceConfigProvider>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            configs,
            query_timeout,
        }
    }

    fn backend_config(
        &self,
        ctx: &StepContext,
        ds_id: &str,
        ds_type: DataSourceType,
    ) -> Result<ValueMap, StepResult> {
        if let Some(descriptor) = self.configs.lookup(ctx.tenant_id(), ds_id) {
            if descriptor.ds_type != ds_type {
                return Err(StepResult::failure_of_kind(
                    format!(
                        "Data source query error: '{ds_id}' is declared as {}, not {ds_type}",
                        descriptor.ds_type
                    ),
                    ErrorKind::Config,
                ));
            }
            return Ok(descriptor.config);
        }

        ctx.param("dsConfig")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                let err = DataSourceError::NotFound(ds_id.to_string());
                StepResult::failure_of_kind(format!("Data source query error: {err}"), ErrorKind::Config)
            })
    }
}

impl Step for DataSourceQueryStep {
    fn step_type(&self) -> &str {
        DATASOURCE_QUERY
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult, StepError> {
        let Some(ds_id) = ctx.param_str("dsId").map(str::to_string) else {
            return Ok(StepResult::failure_of_kind("Data source ID is required", ErrorKind::Config));
        };
        let Some(raw_type) = ctx.param_str("dsType") else {
            return Ok(StepResult::failure_of_kind("Data source type is required", ErrorKind::Config));
        };
        let Ok(ds_type) = raw_type.parse::<DataSourceType>() else {
            return Ok(StepResult::failure_of_kind(
                format!("Invalid data source type: {raw_type}"),
                ErrorKind::Config,
            ));
        };
        let query_config = ctx
            .param("queryConfig")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let config = match self.backend_config(ctx, &ds_id, ds_type) {
            Ok(config) => config,
            Err(failed) => return Ok(failed),
        };

        let source = match self
            .manager
            .get_or_create(&ds_id, ds_type, &config, ctx.tenant_id(), ctx.env())
            .await
        {
            Ok(source) => source,
            Err(e) => return Ok(query_failure(&ds_id, &e)),
        };

        let result = match tokio::time::timeout(self.query_timeout, source.execute_query(&query_config)).await {
            Ok(result) => result,
            Err(_) => Err(DataSourceError::Timeout(duration_ms(self.query_timeout))),
        };

        match result {
            Ok(data) => {
                tracing::debug!(ds_id = %ds_id, ds_type = %ds_type, "Data source query completed");
                let mut output = ValueMap::new();
                output.insert("data".into(), data);
                Ok(StepResult::success(output))
            }
            Err(e) => Ok(query_failure(&ds_id, &e)),
        }
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), StepError> {
        if let Some(raw_type) = config.get("dsType").and_then(Value::as_str) {
            raw_type
                .parse::<DataSourceType>()
                .map_err(|_| StepError::InvalidConfig(format!("Invalid data source type: {raw_type}")))?;
        }
        for key in ["queryConfig", "dsConfig"] {
            if let Some(value) = config.get(key) {
                if !value.is_object() {
                    return Err(StepError::InvalidConfig(format!(
                        "stepConfig.{key} must be an object"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn query_failure(ds_id: &str, error: &DataSourceError) -> StepResult {
    let kind = match error {
        DataSourceError::Timeout(_) => ErrorKind::Timeout,
        DataSourceError::InvalidQuery(_) => ErrorKind::Config,
        e if e.is_config_error() => ErrorKind::Config,
        _ => ErrorKind::Execution,
    };
    tracing::warn!(ds_id, error = %error, "Data source query failed");
    StepResult::failure_of_kind(format!("Data source query error: {error}"), kind)
}
