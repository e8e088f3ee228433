//! Application state wiring the engine together.
//!
//! AppState holds the step registry, pipeline engine, data-source manager
//! and script sandbox used by every CLI command. Steps are generic over the
//! script engine port; AppState pins them to the Rhai sandbox.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use apibrick_core::datasource::manager::DataSourceManager;
use apibrick_core::datasource::provider::StaticDataSourceConfigs;
use apibrick_core::workflow::context::StepContext;
use apibrick_core::workflow::engine::PipelineEngine;
use apibrick_core::workflow::registry::StepRegistry;
use apibrick_core::workflow::response::TemplateResponseRenderer;
use apibrick_core::workflow::steps::{StepDependencies, framework_steps};
use apibrick_infra::config::{load_settings, resolve_home_dir};
use apibrick_infra::datasource::default_manager;
use apibrick_infra::script::RhaiScriptEngine;
use apibrick_types::ValueMap;
use apibrick_types::config::Settings;

/// Shared application state.
pub struct AppState {
    pub engine: PipelineEngine,
    pub registry: Arc<StepRegistry>,
    pub datasources: Arc<DataSourceManager>,
    pub settings: Settings,
    pub home_dir: PathBuf,
}

impl AppState {
    /// Load settings from the home directory and wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let home_dir = resolve_home_dir();
        let settings = load_settings(&home_dir).await;
        Self::from_settings(settings, home_dir)
    }

    pub fn from_settings(settings: Settings, home_dir: PathBuf) -> anyhow::Result<Self> {
        let datasources = Arc::new(default_manager(settings.datasource.probe_timeout()));
        let script_engine = Arc::new(RhaiScriptEngine::from_settings(&settings.script));

        let steps = framework_steps(StepDependencies {
            script_engine,
            datasources: datasources.clone(),
            datasource_configs: Arc::new(StaticDataSourceConfigs::new(settings.datasources.clone())),
            renderer: Arc::new(TemplateResponseRenderer::new()),
            query_timeout: settings.datasource.query_timeout(),
        });

        let registry = steps
            .into_iter()
            .fold(StepRegistry::builder(), |builder, step| builder.with_step(step))
            .build()
            .context("Failed to build step registry")?;
        let registry = Arc::new(registry);

        tracing::debug!(
            home_dir = %home_dir.display(),
            step_types = registry.len(),
            datasources = settings.datasources.len(),
            "Application state initialized"
        );

        Ok(Self {
            engine: PipelineEngine::with_settings(registry.clone(), &settings.engine),
            registry,
            datasources,
            settings,
            home_dir,
        })
    }

    /// A fresh context for one execution, falling back to the configured
    /// default tenant and environment.
    pub fn new_context(
        &self,
        flow_id: &str,
        tenant: Option<String>,
        env: Option<String>,
        request_params: ValueMap,
    ) -> StepContext {
        StepContext::new(
            flow_id,
            tenant.unwrap_or_else(|| self.settings.tenant.default_tenant.clone()),
            env.unwrap_or_else(|| self.settings.tenant.default_env.clone()),
            request_params,
        )
        .with_scope(self.settings.engine.context_scope)
    }

    /// Close cached data sources and run step destroy hooks.
    pub async fn shutdown(&self) {
        self.datasources.close_all().await;
        self.registry.shutdown();
    }
}
