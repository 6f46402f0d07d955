//! Order-related types and identifiers.
//!
//! An [`Order`] is created by the trading substrate on placement and then
//! mutated only through its status callbacks. It becomes terminal once the
//! status is filled, canceled or failed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::market::{Market, MarketSlug, TokenType};
use crate::price::{Pips, Size};

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    #[default]
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Time-in-force (order class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Rests on the book until filled or canceled.
    #[default]
    #[serde(rename = "gtc")]
    GoodTilCancelled,
    /// Fills what it can immediately and cancels the rest.
    #[serde(rename = "fak")]
    ImmediateOrCancel,
}

impl TimeInForce {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::ImmediateOrCancel)
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::ImmediateOrCancel => write!(f, "FAK"),
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Open,
    Partial,
    Filled,
    Canceled,
    Failed,
}

impl OrderStatus {
    /// Filled, canceled and failed orders never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Partial => "partial",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Order as reported by the trading substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: MarketSlug,
    pub asset_id: String,
    pub token: TokenType,
    pub side: OrderSide,
    pub price: Pips,
    pub size: Size,
    pub filled_size: Size,
    /// Average fill price, when known.
    pub filled_price: Option<Pips>,
    pub status: OrderStatus,
    pub tif: TimeInForce,
    pub is_entry: bool,
    /// For hedges, the entry this order covers.
    pub linked_order: Option<OrderId>,
    pub created_at_ms: u64,
    pub filled_at_ms: Option<u64>,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Fill price if known, limit price otherwise.
    pub fn effective_price(&self) -> Pips {
        match self.filled_price {
            Some(p) if p.is_positive() => p,
            _ => self.price,
        }
    }

    /// Filled size if anything filled, requested size otherwise.
    pub fn effective_size(&self) -> Size {
        if self.filled_size.is_positive() {
            self.filled_size
        } else {
            self.size
        }
    }

    /// Unfilled part of the requested size.
    pub fn remaining_size(&self) -> Size {
        self.size.saturating_sub(self.filled_size)
    }
}

/// Request to place one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market: MarketSlug,
    pub asset_id: String,
    pub token: TokenType,
    pub side: OrderSide,
    pub price: Pips,
    pub size: Size,
    pub tif: TimeInForce,
    pub is_entry: bool,
    pub linked_order: Option<OrderId>,
    /// Allowed through substrate-side risk-off switches (protective fills).
    pub bypass_risk_off: bool,
    /// Substrate must not round or top up the size.
    pub disable_size_adjust: bool,
}

impl OrderRequest {
    /// Entry leg buying `token`.
    pub fn entry(
        market: &Market,
        token: TokenType,
        price: Pips,
        size: Size,
        tif: TimeInForce,
    ) -> Self {
        Self {
            market: market.slug.clone(),
            asset_id: market.asset_for(token).to_string(),
            token,
            side: OrderSide::Buy,
            price,
            size,
            tif,
            is_entry: true,
            linked_order: None,
            bypass_risk_off: false,
            disable_size_adjust: false,
        }
    }

    /// Hedge leg buying `token`, linked to the entry it covers.
    pub fn hedge(
        market: &Market,
        token: TokenType,
        price: Pips,
        size: Size,
        tif: TimeInForce,
        entry_id: Option<OrderId>,
    ) -> Self {
        Self {
            is_entry: false,
            linked_order: entry_id,
            ..Self::entry(market, token, price, size, tif)
        }
    }

    /// Replacement for an existing hedge at a new price and size.
    pub fn replacing(previous: &Order, price: Pips, size: Size, tif: TimeInForce) -> Self {
        Self {
            market: previous.market.clone(),
            asset_id: previous.asset_id.clone(),
            token: previous.token,
            side: previous.side,
            price,
            size,
            tif,
            is_entry: false,
            linked_order: previous.linked_order.clone(),
            bypass_risk_off: false,
            disable_size_adjust: false,
        }
    }

    #[must_use]
    pub fn linked_to(mut self, entry_id: OrderId) -> Self {
        self.linked_order = Some(entry_id);
        self
    }

    /// Marks the request as a protective fill: bypasses risk-off switches
    /// and forbids size adjustment.
    #[must_use]
    pub fn protective(mut self) -> Self {
        self.bypass_risk_off = true;
        self.disable_size_adjust = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.price.is_quotable() {
            return Err(CoreError::InvalidPrice(format!(
                "{} outside quotable band",
                self.price
            )));
        }
        if !self.size.is_positive() {
            return Err(CoreError::InvalidSize(format!("{} is not positive", self.size)));
        }
        if self.asset_id.is_empty() {
            return Err(CoreError::InvalidMarket(format!(
                "missing asset id for {} on {}",
                self.token, self.market
            )));
        }
        Ok(())
    }
}
