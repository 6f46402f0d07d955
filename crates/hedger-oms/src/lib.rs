//! Entry/hedge order coordinator for binary-outcome markets.
//!
//! Once a strategy decides to trade, the coordinator owns the pairing of
//! the entry with its hedge until the hedge is confirmed filled or the
//! exposure is surrendered to the operator.
//!
//! # Key Components
//!
//! - [`Oms`]: public handle (execute, order/price/cycle callbacks, status views)
//! - `order_executor`: sequential and parallel entry + hedge placement
//! - `hedge_reorder`: one monitor task per open pairing; reprices the hedge
//!   and escalates to a forced fill
//! - `price_stop`: event-driven stop-loss / take-profit on locked profit
//! - `forced_fill`: immediate-or-cancel completion of a hedge
//! - `settlement`: deferred merge of paired positions
//! - [`OmsConfig`]: every tunable, with defaults

mod coordinator;
mod forced_fill;
mod hedge_reorder;
mod order_executor;
mod price_stop;
mod settlement;
mod state;

pub mod config;
pub mod error;
pub mod oms;
pub mod status;

pub use config::{
    ExecutionConfig, HedgeConfig, LimitsConfig, MonitorConfig, OmsConfig, PriceStopConfig,
    PriceStopParams, SettlementConfig,
};
pub use error::{OmsError, OmsResult};
pub use forced_fill::ForcedFillReason;
pub use oms::Oms;
pub use order_executor::ExecutionOutcome;
pub use status::{
    OpsMetrics, PriceStopWatchInfo, PriceStopWatchesStatus, ReorderAction, ReorderStats,
    RepriceDetail, RiskExposureInfo, RiskManagementStatus, WatchStatus, ACTION_DISPLAY_MS,
};
