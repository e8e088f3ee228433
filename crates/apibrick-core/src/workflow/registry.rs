//! Step registry.
//!
//! Maps type tags to step implementations. The registry is built during a
//! quiescent startup phase from two sources: framework-managed steps and
//! plugin-discovered steps. On a type collision the framework-managed step
//! wins and the plugin step is dropped. After construction the registry is
//! shared read-only (`Arc<StepRegistry>`), giving O(1) concurrent lookups.

use std::collections::HashMap;
use std::sync::Arc;

use apibrick_types::ValueMap;

use super::step::{BoxStep, StepError};

/// Errors raised while registering steps.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("step type must be non-empty")]
    EmptyType,

    #[error("step '{step_type}' failed to initialize: {source}")]
    InitFailed {
        step_type: String,
        #[source]
        source: StepError,
    },
}

/// Type-tag index of step implementations.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<BoxStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Register a step manually, running its `init` hook with an empty
    /// configuration. Replaces any step with the same type.
    pub fn register(&mut self, step: BoxStep) -> Result<(), RegistryError> {
        self.register_with_config(step, &ValueMap::new())
    }

    /// Register a step, running its `init` hook with `config`.
    pub fn register_with_config(
        &mut self,
        step: BoxStep,
        config: &ValueMap,
    ) -> Result<(), RegistryError> {
        let step_type = step.step_type().to_string();
        if step_type.is_empty() {
            return Err(RegistryError::EmptyType);
        }

        step.init(config).map_err(|source| RegistryError::InitFailed {
            step_type: step_type.clone(),
            source,
        })?;

        if let Some(previous) = self.steps.insert(step_type.clone(), Arc::new(step)) {
            previous.destroy();
            tracing::debug!(step_type = %step_type, "Replaced registered step");
        } else {
            tracing::debug!(step_type = %step_type, "Registered step");
        }
        Ok(())
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<BoxStep>> {
        self.steps.get(step_type).cloned()
    }

    pub fn has(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    /// All registered type tags, sorted.
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.steps.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step's `destroy` hook.
    pub fn shutdown(&self) {
        for step in self.steps.values() {
            step.destroy();
        }
        tracing::debug!(count = self.steps.len(), "Step registry shut down");
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects framework-managed and plugin-discovered steps before building
/// an immutable registry.
#[derive(Default)]
pub struct StepRegistryBuilder {
    framework: Vec<BoxStep>,
    plugins: Vec<BoxStep>,
    init_configs: HashMap<String, ValueMap>,
}

impl StepRegistryBuilder {
    /// Add a framework-managed step.
    pub fn with_step(mut self, step: BoxStep) -> Self {
        self.framework.push(step);
        self
    }

    /// Add steps found through plugin discovery.
    pub fn with_plugin_steps(mut self, steps: impl IntoIterator<Item = BoxStep>) -> Self {
        self.plugins.extend(steps);
        self
    }

    /// Configuration handed to the `init` hook of the step with `step_type`.
    pub fn with_init_config(mut self, step_type: impl Into<String>, config: ValueMap) -> Self {
        self.init_configs.insert(step_type.into(), config);
        self
    }

    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        let mut registry = StepRegistry::new();
        let empty = ValueMap::new();

        for step in self.framework {
            if registry.has(step.step_type()) {
                tracing::warn!(
                    step_type = step.step_type(),
                    "Duplicate framework step type, keeping the first"
                );
                continue;
            }
            let config = self.init_configs.get(step.step_type()).unwrap_or(&empty);
            registry.register_with_config(step, config)?;
        }

        for step in self.plugins {
            if registry.has(step.step_type()) {
                tracing::debug!(
                    step_type = step.step_type(),
                    "Plugin step shadowed by framework step, dropping"
                );
                continue;
            }
            let config = self.init_configs.get(step.step_type()).unwrap_or(&empty);
            registry.register_with_config(step, config)?;
        }

        tracing::info!(count = registry.len(), "Step registry built");
        Ok(registry)
    }
}
