//! Ledger of filled entries whose hedge has not filled yet.

use std::collections::HashMap;

use hedger_core::{
    MarketSlug, Order, OrderId, OrderStatus, Size, TokenType, TopOfBook, UNIT_TOTAL_CENTS,
};
use serde::Serialize;
use tracing::debug;

/// One filled entry awaiting a confirmed hedge fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exposure {
    pub market: MarketSlug,
    pub entry_order_id: OrderId,
    pub entry_token: TokenType,
    pub entry_size: Size,
    pub entry_price_cents: i64,
    pub entry_filled_at_ms: u64,
    /// Live hedge; replaced on every reprice.
    pub hedge_order_id: Option<OrderId>,
    pub hedge_status: OrderStatus,
    /// Locked profit if the hedge were bought at the current ask.
    pub max_loss_cents: i64,
}

impl Exposure {
    pub fn exposure_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entry_filled_at_ms) / 1000
    }
}

/// Exposure ledger keyed by entry order id.
#[derive(Debug, Default)]
pub struct RiskRegistry {
    exposures: HashMap<OrderId, Exposure>,
}

impl RiskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a filled entry, or refresh it if already known.
    ///
    /// A `None` hedge keeps whatever hedge was recorded before.
    pub fn register_entry(
        &mut self,
        entry: &Order,
        hedge_order_id: Option<OrderId>,
        now_ms: u64,
    ) {
        let entry_price_cents = entry.effective_price().to_cents();
        let entry_size = entry.effective_size();
        match self.exposures.get_mut(&entry.id) {
            Some(existing) => {
                existing.entry_size = entry_size;
                existing.entry_price_cents = entry_price_cents;
                if let Some(hedge) = hedge_order_id {
                    if existing.hedge_order_id.as_ref() != Some(&hedge) {
                        existing.hedge_order_id = Some(hedge);
                        existing.hedge_status = OrderStatus::Pending;
                    }
                }
            }
            None => {
                debug!(
                    market = %entry.market,
                    entry = %entry.id,
                    hedge = ?hedge_order_id,
                    "exposure registered"
                );
                self.exposures.insert(
                    entry.id.clone(),
                    Exposure {
                        market: entry.market.clone(),
                        entry_order_id: entry.id.clone(),
                        entry_token: entry.token,
                        entry_size,
                        entry_price_cents,
                        entry_filled_at_ms: entry.filled_at_ms.unwrap_or(now_ms),
                        hedge_order_id,
                        hedge_status: OrderStatus::Pending,
                        max_loss_cents: 0,
                    },
                );
            }
        }
    }

    /// Apply a hedge status callback. A filled hedge closes its exposure.
    ///
    /// Returns the entry whose exposure tracks this hedge, if any.
    pub fn update_hedge_status(
        &mut self,
        hedge_id: &OrderId,
        status: OrderStatus,
    ) -> Option<OrderId> {
        let entry_id = self
            .exposures
            .values()
            .find(|e| e.hedge_order_id.as_ref() == Some(hedge_id))
            .map(|e| e.entry_order_id.clone())?;

        if status == OrderStatus::Filled {
            self.exposures.remove(&entry_id);
            debug!(entry = %entry_id, hedge = %hedge_id, "exposure closed by hedge fill");
        } else if let Some(exposure) = self.exposures.get_mut(&entry_id) {
            exposure.hedge_status = status;
        }
        Some(entry_id)
    }

    /// Point the exposure at a replacement hedge.
    pub fn update_hedge_order_id(&mut self, entry_id: &OrderId, hedge_id: OrderId) {
        if let Some(exposure) = self.exposures.get_mut(entry_id) {
            exposure.hedge_order_id = Some(hedge_id);
            exposure.hedge_status = OrderStatus::Pending;
        }
    }

    /// Recompute locked profit at the current hedge-side ask.
    pub fn refresh_max_loss(&mut self, market: &MarketSlug, top: &TopOfBook) {
        for exposure in self.exposures.values_mut().filter(|e| &e.market == market) {
            let ask = top.ask_for(exposure.entry_token.opposite()).to_cents();
            if ask > 0 {
                exposure.max_loss_cents = UNIT_TOTAL_CENTS - (exposure.entry_price_cents + ask);
            }
        }
    }

    pub fn remove(&mut self, entry_id: &OrderId) -> Option<Exposure> {
        self.exposures.remove(entry_id)
    }

    pub fn get(&self, entry_id: &OrderId) -> Option<&Exposure> {
        self.exposures.get(entry_id)
    }

    /// Snapshot ordered by entry fill time.
    pub fn exposures(&self) -> Vec<Exposure> {
        let mut all: Vec<Exposure> = self.exposures.values().cloned().collect();
        all.sort_by_key(|e| (e.entry_filled_at_ms, e.entry_order_id.clone()));
        all
    }

    pub fn count_for_market(&self, market: &MarketSlug) -> usize {
        self.exposures.values().filter(|e| &e.market == market).count()
    }

    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }

    pub fn clear(&mut self) {
        self.exposures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hedger_core::{OrderSide, Pips, TimeInForce};
    use rust_decimal_macros::dec;

    fn entry(id: &str, filled_at_ms: u64) -> Order {
        Order {
            id: OrderId::from(id),
            market: MarketSlug::from("m1"),
            asset_id: "up-1".to_string(),
            token: TokenType::Up,
            side: OrderSide::Buy,
            price: Pips::from_cents(41),
            size: Size::new(dec!(10)),
            filled_size: Size::new(dec!(10)),
            filled_price: Some(Pips::from_cents(40)),
            status: OrderStatus::Filled,
            tif: TimeInForce::ImmediateOrCancel,
            is_entry: true,
            linked_order: None,
            created_at_ms: filled_at_ms,
            filled_at_ms: Some(filled_at_ms),
        }
    }

    #[test]
    fn test_register_and_close_on_hedge_fill() {
        let mut registry = RiskRegistry::new();
        registry.register_entry(&entry("e1", 1_000), Some(OrderId::from("h1")), 1_000);
        let exposure = registry.get(&OrderId::from("e1")).unwrap();
        assert_eq!(exposure.entry_price_cents, 40);
        assert_eq!(exposure.exposure_secs(16_500), 15);

        assert_eq!(
            registry.update_hedge_status(&OrderId::from("h1"), OrderStatus::Partial),
            Some(OrderId::from("e1"))
        );
        assert_eq!(
            registry.get(&OrderId::from("e1")).unwrap().hedge_status,
            OrderStatus::Partial
        );

        registry.update_hedge_status(&OrderId::from("h1"), OrderStatus::Filled);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reprice_supersedes_hedge() {
        let mut registry = RiskRegistry::new();
        registry.register_entry(&entry("e1", 0), Some(OrderId::from("h1")), 0);
        registry.update_hedge_status(&OrderId::from("h1"), OrderStatus::Canceled);
        registry.update_hedge_order_id(&OrderId::from("e1"), OrderId::from("h2"));

        let exposure = registry.get(&OrderId::from("e1")).unwrap();
        assert_eq!(exposure.hedge_order_id, Some(OrderId::from("h2")));
        assert_eq!(exposure.hedge_status, OrderStatus::Pending);
        // Callbacks for the superseded hedge no longer touch the exposure.
        assert_eq!(
            registry.update_hedge_status(&OrderId::from("h1"), OrderStatus::Filled),
            None
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_without_hedge_keeps_existing() {
        let mut registry = RiskRegistry::new();
        registry.register_entry(&entry("e1", 0), Some(OrderId::from("h1")), 0);
        registry.register_entry(&entry("e1", 0), None, 5);
        assert_eq!(
            registry.get(&OrderId::from("e1")).unwrap().hedge_order_id,
            Some(OrderId::from("h1"))
        );
    }

    #[test]
    fn test_refresh_max_loss() {
        let mut registry = RiskRegistry::new();
        registry.register_entry(&entry("e1", 0), None, 0);
        let top = TopOfBook {
            up_bid: Pips::from_cents(39),
            up_ask: Pips::from_cents(41),
            down_bid: Pips::from_cents(63),
            down_ask: Pips::from_cents(65),
        };
        registry.refresh_max_loss(&MarketSlug::from("m1"), &top);
        assert_eq!(registry.get(&OrderId::from("e1")).unwrap().max_loss_cents, -5);
    }

    #[test]
    fn test_snapshot_ordering() {
        let mut registry = RiskRegistry::new();
        registry.register_entry(&entry("late", 5_000), None, 0);
        registry.register_entry(&entry("early", 1_000), None, 0);
        let ids: Vec<_> = registry
            .exposures()
            .into_iter()
            .map(|e| e.entry_order_id)
            .collect();
        assert_eq!(ids, vec![OrderId::from("early"), OrderId::from("late")]);
        assert_eq!(registry.count_for_market(&MarketSlug::from("m1")), 2);
    }
}
