//! Prometheus metrics and structured logging for the hedge coordinator.
//!
//! - Prometheus metrics for the execution gate, hedge pairing, repricing,
//!   forced fills, price stops, budgets and settlement
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
