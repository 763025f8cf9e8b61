//! widget-core: shared infrastructure for the chat widget service.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
