//! Trading substrate ports and order execution plumbing.
//!
//! # Key Components
//!
//! - [`TradingSubstrate`]: port to the exchange (orders, books, positions)
//! - [`Settlement`]: port to the position merge collaborator
//! - [`QueuedExecutionGate`]: single-worker serialization of every
//!   order-mutating call with a minimum spacing between calls
//! - [`PaperExchange`]: in-memory substrate for replays and tests

pub mod error;
pub mod gate;
pub mod paper;
pub mod substrate;

pub use error::{ExecutorError, ExecutorResult};
pub use gate::{GateConfig, QueuedExecutionGate};
pub use paper::{LoggingSettlement, PaperExchange};
pub use substrate::{BoxFuture, Settlement, TradingSubstrate};
