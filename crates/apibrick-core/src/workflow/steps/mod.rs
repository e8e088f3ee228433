//! Built-in step implementations.
//!
//! | type tag            | step                      |
//! |---------------------|---------------------------|
//! | `PARAM_TRANSFORM`   | [`ParamTransformStep`]    |
//! | `CONDITIONAL`       | [`ConditionalStep`]       |
//! | `SCRIPT`            | [`ScriptStep`]            |
//! | `DATASOURCE_QUERY`  | [`DataSourceQueryStep`]   |
//! | `RESPONSE`          | [`ResponseStep`]          |
//!
//! `GROOVY_SCRIPT` is registered as an alias of `SCRIPT` so that persisted
//! flows using the legacy tag keep resolving.

mod conditional;
mod datasource_query;
mod response;
mod script;
mod transform;

use std::sync::Arc;
use std::time::Duration;

pub use conditional::ConditionalStep;
pub use datasource_query::DataSourceQueryStep;
pub use response::ResponseStep;
pub use script::ScriptStep;
pub use transform::ParamTransformStep;

use crate::datasource::manager::DataSourceManager;
use crate::datasource::provider::DataSourceConfigProvider;
use crate::script::ScriptEngine;
use crate::workflow::response::ResponseRenderer;
use crate::workflow::step::BoxStep;

pub const PARAM_TRANSFORM: &str = "PARAM_TRANSFORM";
pub const CONDITIONAL: &str = "CONDITIONAL";
pub const SCRIPT: &str = "SCRIPT";
pub const LEGACY_SCRIPT: &str = "GROOVY_SCRIPT";
pub const DATASOURCE_QUERY: &str = "DATASOURCE_QUERY";
pub const RESPONSE: &str = "RESPONSE";

/// Collaborators the built-in steps are wired with.
pub struct StepDependencies<E> {
    pub script_engine: Arc<E>,
    pub datasources: Arc<DataSourceManager>,
    pub datasource_configs: Arc<dyn DataSourceConfigProvider>,
    pub renderer: Arc<dyn ResponseRenderer>,
    pub query_timeout: Duration,
}

/// The framework-managed step set.
pub fn framework_steps<E: ScriptEngine + 'static>(deps: StepDependencies<E>) -> Vec<BoxStep> {
    vec![
        BoxStep::new(ParamTransformStep),
        BoxStep::new(ConditionalStep),
        BoxStep::new(ScriptStep::new(deps.script_engine.clone())),
        BoxStep::new(ScriptStep::with_type_tag(deps.script_engine, LEGACY_SCRIPT)),
        BoxStep::new(DataSourceQueryStep::new(
            deps.datasources,
            deps.datasource_configs,
            deps.query_timeout,
        )),
        BoxStep::new(ResponseStep::new(deps.renderer)),
    ]
}
