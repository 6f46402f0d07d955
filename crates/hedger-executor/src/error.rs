//! Executor error types.

use hedger_core::{CoreError, OrderId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The execution gate was shut down.
    #[error("queue-closed")]
    QueueClosed,

    /// The caller's cancellation token fired first.
    #[error("cancelled")]
    Cancelled,

    /// Timeouts and connectivity problems; retrying later may succeed.
    #[error("transient substrate error: {0}")]
    Transient(String),

    /// The substrate deliberately refused (trading paused, market mismatch).
    #[error("refused by substrate: {0}")]
    Refused(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order not found: {0}")]
    NotFound(OrderId),
}

impl ExecutorError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Fail-safe refusals are expected outcomes, not failures to retry.
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueClosed => "closed",
            Self::Cancelled => "cancelled",
            Self::Transient(_) => "transient",
            Self::Refused(_) => "refused",
            Self::InvalidOrder(_) => "invalid",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl From<CoreError> for ExecutorError {
    fn from(e: CoreError) -> Self {
        Self::InvalidOrder(e.to_string())
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
