//! Coordinator error types.

use hedger_core::{MarketSlug, OrderId, OrderStatus};
use hedger_executor::ExecutorError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OmsError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("market {market} in cooldown for {remaining_ms}ms: {reason}")]
    MarketCooldown {
        market: MarketSlug,
        remaining_ms: u64,
        reason: String,
    },

    #[error("order notional {notional} below minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },

    #[error("entry {id} not filled (status {status})")]
    EntryNotFilled { id: OrderId, status: OrderStatus },

    #[error("multi-leg request created {0} orders, expected 2")]
    IncompleteMultiLeg(usize),

    #[error("hedge price {0}c outside quotable band")]
    InvalidHedgePrice(i64),

    #[error("no market data: {0}")]
    NoMarketData(String),
}

impl OmsError {
    /// Refusals and cooldowns are expected outcomes, not failures.
    pub fn is_refusal(&self) -> bool {
        match self {
            Self::Executor(e) => e.is_refusal(),
            Self::MarketCooldown { .. } | Self::BelowMinNotional { .. } => true,
            _ => false,
        }
    }
}

pub type OmsResult<T> = Result<T, OmsError>;
