//! Market data events delivered to the coordinator.

use serde::{Deserialize, Serialize};

use crate::market::{MarketSlug, TokenType};
use crate::price::Pips;

/// Best price of one token moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChangedEvent {
    pub market: MarketSlug,
    pub token: TokenType,
    pub old_price: Pips,
    pub new_price: Pips,
    pub timestamp_ms: u64,
}
