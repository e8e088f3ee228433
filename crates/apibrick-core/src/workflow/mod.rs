pub mod context;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod registry;
pub mod response;
pub mod step;
pub mod steps;
