//! Infrastructure layer for APIBrick.
//!
//! Concrete data-source backends (MySQL, SQLite, MongoDB), the Rhai script
//! sandbox, and settings loading from the APIBrick home directory.

pub mod config;
pub mod datasource;
pub mod script;
