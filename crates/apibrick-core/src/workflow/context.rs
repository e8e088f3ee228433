//! Per-execution step context.
//!
//! `StepContext` is the mutable data bag threaded through every step of one
//! flow execution. It holds identity (flow id, generated instance id, tenant,
//! environment), the read-only request parameters, and a flat key/value
//! variable map that steps read configuration and prior outputs from and
//! write their own outputs into.
//!
//! Visibility is intentionally unscoped: any step can observe any earlier
//! step's configuration keys or outputs. [`ContextScope::StepNamespaced`]
//! is an opt-in variant that copies configuration under `"<stepId>.<key>"`
//! so that config keys of different steps cannot collide.

use apibrick_types::ValueMap;
use apibrick_types::config::ContextScope;
use apibrick_types::flow::OUTPUT_KEY_SUFFIX;
use serde_json::{Value, json};
use uuid::Uuid;

/// Context key the response step writes the rendered response under.
pub const FINAL_RESPONSE_KEY: &str = "finalResponse";

/// Context key the engine writes the walk start time (epoch ms) under.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Context key set to `true` when an execution is cancelled mid-walk.
pub const CANCELLED_KEY: &str = "cancelled";

/// Live working set for one flow execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    flow_id: String,
    instance_id: String,
    tenant_id: String,
    env: String,
    request_params: ValueMap,
    variables: ValueMap,
    scope: ContextScope,
    current_step: Option<String>,
}

impl StepContext {
    /// Create a context with a freshly generated execution-instance id.
    pub fn new(
        flow_id: impl Into<String>,
        tenant_id: impl Into<String>,
        env: impl Into<String>,
        request_params: ValueMap,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            instance_id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            env: env.into(),
            request_params,
            variables: ValueMap::new(),
            scope: ContextScope::default(),
            current_step: None,
        }
    }

    pub fn with_scope(mut self, scope: ContextScope) -> Self {
        self.scope = scope;
        self
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn scope(&self) -> ContextScope {
        self.scope
    }

    /// Id of the step currently executing, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    // -----------------------------------------------------------------------
    // Request parameters (read-only)
    // -----------------------------------------------------------------------

    pub fn request_params(&self) -> &ValueMap {
        &self.request_params
    }

    pub fn request_param(&self, key: &str) -> Option<&Value> {
        self.request_params.get(key)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn variables(&self) -> &ValueMap {
        &self.variables
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// String value of a variable, if present and a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.variables.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Look up a step configuration parameter.
    ///
    /// Under [`ContextScope::StepNamespaced`] the current step's namespaced
    /// key wins; the flat key is always the fallback.
    pub fn param(&self, key: &str) -> Option<&Value> {
        if self.scope == ContextScope::StepNamespaced {
            if let Some(step_id) = &self.current_step {
                if let Some(value) = self.variables.get(&format!("{step_id}.{key}")) {
                    return Some(value);
                }
            }
        }
        self.variables.get(key)
    }

    /// String value of a step configuration parameter; empty strings count
    /// as absent.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Mark `step_id` as current and copy its static configuration into the
    /// variable map according to the context scope.
    pub(crate) fn enter_step(&mut self, step_id: &str, config: &ValueMap) {
        self.current_step = Some(step_id.to_string());
        for (key, value) in config {
            let target = match self.scope {
                ContextScope::Flat => key.clone(),
                ContextScope::StepNamespaced => format!("{step_id}.{key}"),
            };
            self.variables.insert(target, value.clone());
        }
    }

    pub(crate) fn leave_step(&mut self) {
        self.current_step = None;
    }

    // -----------------------------------------------------------------------
    // Derived views
    // -----------------------------------------------------------------------

    /// Step outputs keyed by step id, taken from variables whose key ends
    /// with `.output`.
    pub fn step_outputs(&self) -> ValueMap {
        self.variables
            .iter()
            .filter_map(|(key, value)| {
                key.strip_suffix(OUTPUT_KEY_SUFFIX)
                    .map(|step_id| (step_id.to_string(), value.clone()))
            })
            .collect()
    }

    /// The JSON object expressions are evaluated against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "request": { ... },
    ///   "variables": { ... },
    ///   "tenantId": "...",
    ///   "env": "...",
    ///   "steps": { "<stepId>": <output>, ... }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        json!({
            "request": self.request_params,
            "variables": self.variables,
            "tenantId": self.tenant_id,
            "env": self.env,
            "steps": self.step_outputs(),
        })
    }

    /// Flattened variable snapshot handed to scripts: request parameters,
    /// then variables (overriding), then `tenantId` and `env`.
    pub fn script_bindings(&self) -> ValueMap {
        let mut bindings = self.request_params.clone();
        for (key, value) in &self.variables {
            bindings.insert(key.clone(), value.clone());
        }
        bindings.insert("tenantId".into(), json!(self.tenant_id));
        bindings.insert("env".into(), json!(self.env));
        bindings
    }
}
