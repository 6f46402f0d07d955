//! Binary-outcome market identity and market data.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::price::{Pips, Size};

/// Market slug (unique per market cycle, e.g. `"btc-updown-15m-1718000000"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketSlug(String);

impl MarketSlug {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarketSlug {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketSlug {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One of the two complementary outcome tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Up,
    Down,
}

impl TokenType {
    /// Returns the complementary token (the hedge side of an entry).
    pub fn opposite(&self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Market description as handed over by market discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub slug: MarketSlug,
    pub up_asset_id: String,
    pub down_asset_id: String,
}

impl Market {
    pub fn new(
        slug: impl Into<MarketSlug>,
        up_asset_id: impl Into<String>,
        down_asset_id: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            up_asset_id: up_asset_id.into(),
            down_asset_id: down_asset_id.into(),
        }
    }

    /// Asset id of the given token.
    pub fn asset_for(&self, token: TokenType) -> &str {
        match token {
            TokenType::Up => &self.up_asset_id,
            TokenType::Down => &self.down_asset_id,
        }
    }

    /// Reverse lookup of [`Market::asset_for`].
    pub fn token_for(&self, asset_id: &str) -> Option<TokenType> {
        if asset_id == self.up_asset_id {
            Some(TokenType::Up)
        } else if asset_id == self.down_asset_id {
            Some(TokenType::Down)
        } else {
            None
        }
    }
}

/// Best bid/ask of both tokens. A zero price means "no level".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopOfBook {
    pub up_bid: Pips,
    pub up_ask: Pips,
    pub down_bid: Pips,
    pub down_ask: Pips,
}

impl TopOfBook {
    pub fn ask_for(&self, token: TokenType) -> Pips {
        match token {
            TokenType::Up => self.up_ask,
            TokenType::Down => self.down_ask,
        }
    }

    pub fn bid_for(&self, token: TokenType) -> Pips {
        match token {
            TokenType::Up => self.up_bid,
            TokenType::Down => self.down_bid,
        }
    }
}

/// Top of book with the time it was last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub top: TopOfBook,
    pub updated_at_ms: u64,
}

impl BookSnapshot {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.updated_at_ms)
    }

    /// False once the snapshot is older than `max_age_ms`.
    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        self.age_ms(now_ms) <= max_age_ms
    }
}

/// Open position on one token of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub market: MarketSlug,
    pub token: TokenType,
    pub asset_id: String,
    pub size: Size,
    pub avg_price: Pips,
}
