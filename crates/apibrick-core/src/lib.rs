//! Core engine for APIBrick.
//!
//! Defines the step contract and registry, the per-execution step context,
//! the pipeline engine that walks a flow definition, the built-in steps, and
//! the ports (traits) the data-source layer and script sandbox implement.
//! Concrete backends live in `apibrick-infra`.

pub mod datasource;
pub mod script;
pub mod workflow;
