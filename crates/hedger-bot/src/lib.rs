//! Replay driver for the entry/hedge order coordinator.
//!
//! Runs the coordinator against an in-memory paper exchange:
//! - Layered configuration (defaults, TOML file, environment)
//! - JSON-lines replay of book ticks, decisions, cycles and waits
//! - Session report with the risk-management and ops views

pub mod app;
pub mod config;
pub mod error;
pub mod replay;

pub use app::{Application, SessionReport};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use replay::ReplayEvent;
