//! Trade decision handed over by a strategy.

use serde::{Deserialize, Serialize};

use crate::market::TokenType;
use crate::price::{Pips, Size};

/// What a strategy wants traded: an entry on `direction` and a hedge on
/// the complementary token. How prices and sizes are chosen is the
/// strategy's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub should_trade: bool,
    pub direction: TokenType,
    pub entry_price: Pips,
    pub entry_size: Size,
    pub hedge_price: Pips,
    pub hedge_size: Size,
    #[serde(default)]
    pub reason: String,
}

impl Decision {
    /// Token the hedge leg buys.
    pub fn hedge_token(&self) -> TokenType {
        self.direction.opposite()
    }

    /// Sum of both legs in cents; below 100 means the pair locks a profit.
    pub fn total_cost_cents(&self) -> i64 {
        self.entry_price.to_cents() + self.hedge_price.to_cents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_hedge_token_and_cost() {
        let d = Decision {
            should_trade: true,
            direction: TokenType::Up,
            entry_price: Pips::from_cents(40),
            entry_size: Size::new(dec!(10)),
            hedge_price: Pips::from_cents(58),
            hedge_size: Size::new(dec!(10)),
            reason: String::new(),
        };
        assert_eq!(d.hedge_token(), TokenType::Down);
        assert_eq!(d.total_cost_cents(), 98);
    }
}
