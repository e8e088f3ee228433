//! Data-source abstraction: contracts, per-tenant manager, and config lookup.

pub mod manager;
pub mod provider;
pub mod source;
