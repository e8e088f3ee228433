//! Script sandbox implementations.

mod rhai_sandbox;

pub use rhai_sandbox::{CONTEXT_VARIABLE, RhaiScriptEngine};
