//! # Observability
//!
//! Structured logging via `tracing`. HTTP request spans come from
//! `tower-http`'s `TraceLayer` in the router.

pub mod logging;

pub use logging::{init_logging, log_config_info};
