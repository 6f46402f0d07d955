//! Application error types.

use hedger_oms::OmsError;
use hedger_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Coordinator error: {0}")]
    Oms(#[from] OmsError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Replay line {line}: {message}")]
    Replay { line: usize, message: String },
}

pub type AppResult<T> = Result<T, AppError>;
