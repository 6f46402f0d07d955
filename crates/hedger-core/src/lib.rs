//! Core domain types for the entry/hedge order coordinator.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `Pips`, `Size`: integer price ticks (1/100 cent) and exact decimal sizes
//! - `MarketSlug`, `Market`, `TokenType`: binary-outcome market identity
//! - `Order`, `OrderRequest`, `OrderStatus`, `TimeInForce`: order lifecycle
//! - `Decision`: what a strategy asks the coordinator to trade
//! - `PriceChangedEvent`, `TopOfBook`, `BookSnapshot`: market data
//! - `Clock`: injectable wall clock

pub mod clock;
pub mod decision;
pub mod error;
pub mod event;
pub mod execution;
pub mod market;
pub mod order;
pub mod price;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::Decision;
pub use error::{CoreError, Result};
pub use event::PriceChangedEvent;
pub use execution::{ExecutionMode, MultiLegRequest};
pub use market::{BookSnapshot, Market, MarketSlug, Position, TokenType, TopOfBook};
pub use order::{Order, OrderId, OrderRequest, OrderSide, OrderStatus, TimeInForce};
pub use price::{Pips, Size, MAX_QUOTE_CENTS, MIN_QUOTE_CENTS, PIPS_PER_CENT, UNIT_TOTAL_CENTS};
