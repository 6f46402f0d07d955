//! Entry and hedge placement.
//!
//! `execute_order` turns a strategy decision into an entry plus its hedge,
//! in sequential or parallel mode. Hedge pricing shared with the reorder
//! monitor lives here as well.

use std::sync::Arc;
use std::time::Duration;

use hedger_core::{
    Decision, ExecutionMode, Market, MarketSlug, MultiLegRequest, Order, OrderId, OrderRequest,
    Pips, Size, TimeInForce, MAX_QUOTE_CENTS, MIN_QUOTE_CENTS, UNIT_TOTAL_CENTS,
};
use hedger_executor::ExecutorError;
use hedger_telemetry::Metrics;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{entry_fill_confirmed, OmsCore};
use crate::error::{OmsError, OmsResult};

/// Result of a successful `execute_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub entry: Order,
    pub hedge: Option<Order>,
}

/// A hedge price and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HedgeQuote {
    pub price_cents: i64,
    pub ideal_cents: i64,
    pub strategy: &'static str,
}

fn clamp_quote(cents: i64) -> i64 {
    cents.clamp(MIN_QUOTE_CENTS, MAX_QUOTE_CENTS)
}

impl OmsCore {
    pub(crate) async fn execute_order(
        self: &Arc<Self>,
        market: &Market,
        decision: &Decision,
    ) -> OmsResult<ExecutionOutcome> {
        validate_decision(decision)?;

        if let Some((remaining_ms, reason)) = self.market_cooldown(&market.slug) {
            warn!(
                market = %market.slug,
                remaining_ms,
                reason = %reason,
                "entry refused: market in cooldown"
            );
            return Err(OmsError::MarketCooldown {
                market: market.slug.clone(),
                remaining_ms,
                reason,
            });
        }

        let size = decision.entry_size.min(decision.hedge_size);
        let notional = size.notional(decision.entry_price);
        let min = self.config.execution.min_order_notional;
        if notional < min {
            return Err(OmsError::BelowMinNotional { notional, min });
        }

        self.state
            .write()
            .markets
            .insert(market.slug.clone(), market.clone());

        info!(
            market = %market.slug,
            mode = %self.config.execution.mode,
            direction = %decision.direction,
            entry_price = %decision.entry_price,
            hedge_price = %decision.hedge_price,
            size = %size,
            reason = %decision.reason,
            "executing decision"
        );

        let token = self.cycle_token();
        match self.config.execution.mode {
            ExecutionMode::Sequential => {
                self.execute_sequential(market, decision, size, &token)
                    .await
            }
            ExecutionMode::Parallel => self.execute_parallel(market, decision, size, &token).await,
        }
    }

    async fn execute_sequential(
        self: &Arc<Self>,
        market: &Market,
        decision: &Decision,
        size: Size,
        token: &CancellationToken,
    ) -> OmsResult<ExecutionOutcome> {
        let request = OrderRequest::entry(
            market,
            decision.direction,
            decision.entry_price,
            size,
            TimeInForce::ImmediateOrCancel,
        );
        let entry = self.gate().place_order(token, request).await?;
        let entry_id = entry.id.clone();
        self.claim(&entry_id);
        let result = self.hedge_sequential_entry(market, decision, entry, token).await;
        self.unclaim(&entry_id);
        result
    }

    async fn hedge_sequential_entry(
        self: &Arc<Self>,
        market: &Market,
        decision: &Decision,
        entry: Order,
        token: &CancellationToken,
    ) -> OmsResult<ExecutionOutcome> {
        let entry = self.await_entry_fill(entry, token).await?;
        let hedge_size = entry.filled_size;
        let hedge_price = self.initial_hedge_price(market, &entry, decision).await;
        let tif = self.hedge_tif(hedge_size);

        let request = OrderRequest::hedge(
            market,
            decision.hedge_token(),
            hedge_price,
            hedge_size,
            tif,
            Some(entry.id.clone()),
        );
        let hedge = match self.gate().place_order(token, request).await {
            Ok(hedge) => hedge,
            Err(e) => {
                error!(
                    market = %market.slug,
                    entry = %entry.id,
                    error = %e,
                    "hedge placement failed, entry unhedged"
                );
                Metrics::unhedged(market.slug.as_str(), "hedge_placement");
                let now = self.now_ms();
                self.state.write().registry.register_entry(&entry, None, now);
                self.publish_pairing_state(&market.slug);
                return Err(e.into());
            }
        };

        info!(
            market = %market.slug,
            entry = %entry.id,
            hedge = %hedge.id,
            price = %hedge.price,
            size = %hedge.size,
            tif = %hedge.tif,
            "hedge placed"
        );
        self.record_pending(&entry, &hedge);
        self.handle_entry_filled(&entry, Some(hedge.id.clone()));
        if hedge.is_filled() {
            self.handle_hedge_filled(&hedge);
        }
        Ok(ExecutionOutcome {
            entry,
            hedge: Some(hedge),
        })
    }

    /// Poll the entry until it fills, with one final re-check after the
    /// wait budget is spent.
    async fn await_entry_fill(&self, entry: Order, token: &CancellationToken) -> OmsResult<Order> {
        let exec = &self.config.execution;
        let interval = Duration::from_millis(exec.sequential_check_interval_ms.max(1));
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(exec.sequential_max_wait_ms);

        let mut current = entry;
        loop {
            if entry_fill_confirmed(&current) {
                return Ok(current);
            }
            if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(ExecutorError::Cancelled.into());
                }
                _ = tokio::time::sleep(interval) => {}
            }
            match self.substrate.get_order(&current.id).await {
                Ok(order) => current = order,
                Err(e) => debug!(entry = %current.id, error = %e, "entry poll failed"),
            }
        }

        if !current.status.is_terminal() {
            if let Ok(order) = self.substrate.get_order(&current.id).await {
                current = order;
            }
        }
        if entry_fill_confirmed(&current) {
            return Ok(current);
        }
        info!(
            market = %current.market,
            entry = %current.id,
            status = %current.status,
            "entry not filled"
        );
        Err(OmsError::EntryNotFilled {
            id: current.id,
            status: current.status,
        })
    }

    async fn execute_parallel(
        self: &Arc<Self>,
        market: &Market,
        decision: &Decision,
        size: Size,
        token: &CancellationToken,
    ) -> OmsResult<ExecutionOutcome> {
        let request = MultiLegRequest {
            name: format!("{}_entry_hedge", self.config.execution.strategy_id),
            market: market.slug.clone(),
            legs: vec![
                OrderRequest::entry(
                    market,
                    decision.direction,
                    decision.entry_price,
                    size,
                    TimeInForce::ImmediateOrCancel,
                ),
                OrderRequest::hedge(
                    market,
                    decision.hedge_token(),
                    decision.hedge_price,
                    size,
                    TimeInForce::GoodTilCancelled,
                    None,
                ),
            ],
        };
        let orders = self.gate().execute_multi_leg(token, request).await?;
        let (entry, hedge) = match split_legs(orders) {
            Ok(legs) => legs,
            Err((count, entry)) => {
                if let Some(entry) = entry.filter(entry_fill_confirmed) {
                    error!(
                        market = %market.slug,
                        entry = %entry.id,
                        "multi-leg incomplete, entry unhedged"
                    );
                    Metrics::unhedged(market.slug.as_str(), "multi_leg");
                    let now = self.now_ms();
                    self.state.write().registry.register_entry(&entry, None, now);
                }
                return Err(OmsError::IncompleteMultiLeg(count));
            }
        };

        self.record_pending(&entry, &hedge);
        if entry_fill_confirmed(&entry) {
            self.handle_entry_filled(&entry, Some(hedge.id.clone()));
            if hedge.is_filled() {
                self.handle_hedge_filled(&hedge);
            }
        } else if entry.status.is_terminal() {
            // The entry missed: the resting hedge would be a naked position.
            self.state.write().pending.remove(&entry.id);
            if let Err(e) = self.gate().cancel_order(token, hedge.id.clone()).await {
                warn!(hedge = %hedge.id, error = %e, "orphan hedge cancel failed");
            }
            return Err(OmsError::EntryNotFilled {
                id: entry.id,
                status: entry.status,
            });
        }

        Ok(ExecutionOutcome {
            entry,
            hedge: Some(hedge),
        })
    }

    // ========================================================================
    // Hedge pricing
    // ========================================================================

    /// Hedges too small to rest on the book go immediate-or-cancel.
    pub(crate) fn hedge_tif(&self, size: Size) -> TimeInForce {
        if size.inner() < self.config.hedge.min_resting_size {
            TimeInForce::ImmediateOrCancel
        } else {
            TimeInForce::GoodTilCancelled
        }
    }

    async fn initial_hedge_price(
        &self,
        market: &Market,
        entry: &Order,
        decision: &Decision,
    ) -> Pips {
        let hedge_token = entry.token.opposite();
        let ask = match self.substrate.top_of_book(&market.slug).await {
            Ok(top) => top.ask_for(hedge_token).to_cents(),
            Err(e) => {
                debug!(
                    market = %market.slug,
                    error = %e,
                    "book unavailable, using decision hedge price"
                );
                return decision.hedge_price;
            }
        };
        let quote = self.hedge_quote(&market.slug, entry.effective_price().to_cents(), ask);
        Pips::from_cents(quote.price_cents)
    }

    /// Hedge price for an entry bought at `entry_cents` with the hedge side
    /// currently asking `ask_cents` (0 = no ask).
    ///
    /// With negative profit allowed the hedge may pay up to
    /// `ideal + max_negative_profit + extra`; with the price stop enabled it
    /// never accepts a locked profit at or below the hard stop.
    pub(crate) fn hedge_quote(
        &self,
        market: &MarketSlug,
        entry_cents: i64,
        ask_cents: i64,
    ) -> HedgeQuote {
        let hedge = &self.config.hedge;
        let ideal = clamp_quote(UNIT_TOTAL_CENTS - entry_cents - hedge.offset_cents);

        if hedge.allow_negative_profit {
            let extra = self.hedge_price_extra_cents(market);
            let mut max_allowed = clamp_quote(ideal + hedge.max_negative_profit_cents + extra);
            if self.config.price_stop.enabled {
                let cap = UNIT_TOTAL_CENTS - entry_cents - self.price_stop.hard_loss_cents - 1;
                max_allowed = max_allowed.min(cap);
            }
            if ask_cents > 0 && ask_cents <= max_allowed {
                HedgeQuote {
                    price_cents: ask_cents,
                    ideal_cents: ideal,
                    strategy: "take_ask",
                }
            } else {
                HedgeQuote {
                    price_cents: max_allowed,
                    ideal_cents: ideal,
                    strategy: "max_negative_profit",
                }
            }
        } else if ask_cents > 0 && ideal >= ask_cents {
            HedgeQuote {
                price_cents: (ask_cents - 1).max(MIN_QUOTE_CENTS),
                ideal_cents: ideal,
                strategy: "below_ask",
            }
        } else {
            HedgeQuote {
                price_cents: ideal,
                ideal_cents: ideal,
                strategy: "ideal",
            }
        }
    }

    /// Premium (cents) the hedge may pay when fills are slow or exposure
    /// is piling up.
    pub(crate) fn hedge_price_extra_cents(&self, market: &MarketSlug) -> i64 {
        let state = self.state.read();
        let mut extra = 0;
        if state.registry.count_for_market(market) > 0 {
            extra += 2;
        }
        extra += (state.pending_for_market(market) as i64).min(3);
        let ewma = state.timing.ewma_secs(market);
        extra += if ewma > 25.0 {
            4
        } else if ewma > 15.0 {
            2
        } else if ewma > 8.0 {
            1
        } else {
            0
        };
        extra.min(8)
    }

    // ========================================================================
    // Fallback hedging
    // ========================================================================

    /// Hedge a filled entry one-to-one at the ask (or below it when the
    /// break-even price is lower).
    pub(crate) async fn auto_hedge_position(
        self: &Arc<Self>,
        market: &Market,
        entry: &Order,
    ) -> OmsResult<Order> {
        let hedge_token = entry.token.opposite();
        let top = self.substrate.top_of_book(&market.slug).await?;
        let ask = top.ask_for(hedge_token).to_cents();
        if ask <= 0 {
            return Err(OmsError::NoMarketData(format!(
                "no {hedge_token} ask on {}",
                market.slug
            )));
        }

        let entry_cents = entry.effective_price().to_cents();
        let ideal = UNIT_TOTAL_CENTS - entry_cents - self.config.hedge.offset_cents;
        let price = if (MIN_QUOTE_CENTS..=MAX_QUOTE_CENTS).contains(&ideal) && ideal < ask {
            ideal
        } else {
            clamp_quote(ask)
        };
        let size = entry.effective_size();
        let request = OrderRequest::hedge(
            market,
            hedge_token,
            Pips::from_cents(price),
            size,
            self.hedge_tif(size),
            Some(entry.id.clone()),
        );

        let hedge = self.gate().place_order(&self.cycle_token(), request).await?;
        info!(
            market = %market.slug,
            entry = %entry.id,
            hedge = %hedge.id,
            price_cents = price,
            size = %size,
            "auto hedge placed"
        );
        self.record_pending(entry, &hedge);
        self.handle_entry_filled(entry, Some(hedge.id.clone()));
        if hedge.is_filled() {
            self.handle_hedge_filled(&hedge);
        }
        Ok(hedge)
    }

    /// Sequential-mode entry fill without a recorded hedge: look again after
    /// a short delay and hedge it if nobody else did.
    pub(crate) fn spawn_fallback_hedge(self: &Arc<Self>, entry: Order) {
        let core = Arc::clone(self);
        let token = self.cycle_token();
        let delay = Duration::from_millis(self.config.monitor.fallback_hedge_delay_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            core.run_fallback_hedge(entry).await;
        });
    }

    async fn run_fallback_hedge(self: &Arc<Self>, entry: Order) {
        enum Next {
            Link(OrderId),
            Skip(&'static str),
            Hedge(Option<Market>),
        }

        let next = {
            let mut state = self.state.write();
            if state.completed.contains(&entry.id) {
                Next::Skip("pairing already complete")
            } else if let Some(pending) = state.pending.get(&entry.id) {
                Next::Link(pending.hedge_id.clone())
            } else if state.claimed.contains(&entry.id) {
                Next::Skip("executor still owns the entry")
            } else if !state.fallback_done.insert(entry.id.clone()) {
                Next::Skip("fallback already attempted")
            } else {
                Next::Hedge(state.markets.get(&entry.market).cloned())
            }
        };

        match next {
            Next::Link(hedge_id) => {
                debug!(
                    entry = %entry.id,
                    hedge = %hedge_id,
                    "fallback linked entry to recorded hedge"
                );
                self.handle_entry_filled(&entry, Some(hedge_id));
            }
            Next::Skip(why) => debug!(entry = %entry.id, reason = why, "fallback hedge skipped"),
            Next::Hedge(market) => {
                let market = market.or_else(|| {
                    self.substrate
                        .current_market()
                        .filter(|m| m.slug == entry.market)
                });
                let Some(market) = market else {
                    error!(
                        market = %entry.market,
                        entry = %entry.id,
                        "fallback hedge: unknown market"
                    );
                    Metrics::unhedged(entry.market.as_str(), "auto_hedge");
                    return;
                };
                warn!(
                    market = %market.slug,
                    entry = %entry.id,
                    "entry filled without hedge, auto hedging"
                );
                if let Err(e) = self.auto_hedge_position(&market, &entry).await {
                    error!(
                        market = %market.slug,
                        entry = %entry.id,
                        error = %e,
                        "auto hedge failed, entry unhedged"
                    );
                    Metrics::unhedged(market.slug.as_str(), "auto_hedge");
                }
            }
        }
    }
}

fn validate_decision(decision: &Decision) -> OmsResult<()> {
    if !decision.should_trade {
        return Err(OmsError::InvalidDecision("should_trade is false".to_string()));
    }
    if !decision.entry_size.is_positive() || !decision.hedge_size.is_positive() {
        return Err(OmsError::InvalidDecision(format!(
            "sizes must be positive (entry {}, hedge {})",
            decision.entry_size, decision.hedge_size
        )));
    }
    for (leg, price) in [("entry", decision.entry_price), ("hedge", decision.hedge_price)] {
        if !price.is_quotable() {
            return Err(OmsError::InvalidDecision(format!("{leg} price {price} outside 1..=99c")));
        }
    }
    Ok(())
}

/// Entry and hedge out of a multi-leg result. On failure returns the number
/// of orders created and the entry, if one was.
fn split_legs(orders: Vec<Order>) -> Result<(Order, Order), (usize, Option<Order>)> {
    let count = orders.len();
    let mut entry = None;
    let mut hedge = None;
    for order in orders {
        if order.is_entry && entry.is_none() {
            entry = Some(order);
        } else if !order.is_entry && hedge.is_none() {
            hedge = Some(order);
        }
    }
    match (entry, hedge) {
        (Some(entry), Some(hedge)) if count >= 2 => Ok((entry, hedge)),
        (entry, _) => Err((count, entry)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OmsConfig;
    use hedger_core::{ManualClock, TokenType, TopOfBook};
    use hedger_executor::PaperExchange;
    use rust_decimal_macros::dec;

    fn decision(entry: i64, hedge: i64, size: rust_decimal::Decimal) -> Decision {
        Decision {
            should_trade: true,
            direction: TokenType::Up,
            entry_price: Pips::from_cents(entry),
            entry_size: Size::new(size),
            hedge_price: Pips::from_cents(hedge),
            hedge_size: Size::new(size),
            reason: "test".to_string(),
        }
    }

    fn setup_core(config: OmsConfig) -> Arc<OmsCore> {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (exchange, _updates) = PaperExchange::new(clock.clone());
        exchange.set_market(Market::new("m1", "up-1", "down-1"));
        exchange.set_book(TopOfBook {
            up_bid: Pips::from_cents(39),
            up_ask: Pips::from_cents(40),
            down_bid: Pips::from_cents(54),
            down_ask: Pips::from_cents(55),
        });
        Arc::new(OmsCore::new(config, Arc::new(exchange), clock))
    }

    #[tokio::test]
    async fn test_validate_decision() {
        assert!(validate_decision(&decision(40, 58, dec!(10))).is_ok());
        let mut d = decision(40, 58, dec!(10));
        d.should_trade = false;
        assert!(matches!(validate_decision(&d), Err(OmsError::InvalidDecision(_))));
        assert!(validate_decision(&decision(0, 58, dec!(10))).is_err());
        assert!(validate_decision(&decision(40, 58, dec!(0))).is_err());
    }

    #[tokio::test]
    async fn test_quote_without_negative_profit() {
        let core = setup_core(OmsConfig::default());
        let m = MarketSlug::from("m1");
        // ideal = 100 - 40 - 1 = 59 >= ask 55: stay one tick under the ask.
        let q = core.hedge_quote(&m, 40, 55);
        assert_eq!(q.price_cents, 54);
        assert_eq!(q.ideal_cents, 59);
        // ideal below the ask rests at ideal.
        assert_eq!(core.hedge_quote(&m, 40, 65).price_cents, 59);
        // no ask: ideal.
        assert_eq!(core.hedge_quote(&m, 40, 0).price_cents, 59);
    }

    #[tokio::test]
    async fn test_quote_with_negative_profit_and_hard_cap() {
        let mut config = OmsConfig::default();
        config.hedge.allow_negative_profit = true;
        config.hedge.max_negative_profit_cents = 5;
        let core = setup_core(config.clone());
        let m = MarketSlug::from("m1");
        // max_allowed = 59 + 5 = 64.
        assert_eq!(core.hedge_quote(&m, 40, 63).price_cents, 63);
        assert_eq!(core.hedge_quote(&m, 40, 70).price_cents, 64);

        config.hedge.max_negative_profit_cents = 20;
        config.price_stop.enabled = true;
        let capped = setup_core(config);
        // cap = 100 - 40 - (-10) - 1 = 69: profit never reaches the hard stop.
        assert_eq!(capped.hedge_quote(&m, 40, 75).price_cents, 69);
    }

    #[tokio::test]
    async fn test_extra_cents_capped() {
        let core = setup_core(OmsConfig::default());
        let m = MarketSlug::from("m1");
        assert_eq!(core.hedge_price_extra_cents(&m), 0);
        {
            let mut state = core.state.write();
            state.timing.record_entry_filled(&"e0".into(), &m, 0);
            state.timing.record_hedge_filled(&"e0".into(), 30_000);
        }
        assert_eq!(core.hedge_price_extra_cents(&m), 4);
    }

    #[tokio::test]
    async fn test_refusals() {
        let core = setup_core(OmsConfig::default());
        let market = Market::new("m1", "up-1", "down-1");

        // 2 x 0.40 = 0.80 < 1.01
        let err = core
            .execute_order(&market, &decision(40, 58, dec!(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, OmsError::BelowMinNotional { .. }));
        assert!(err.is_refusal());

        {
            let now = core.now_ms();
            let mut state = core.state.write();
            state.guard.set_cooldown(&market.slug, 0, "entry_reorder_exceeded 3", now);
        }
        let err = core
            .execute_order(&market, &decision(40, 58, dec!(10)))
            .await
            .unwrap_err();
        match err {
            OmsError::MarketCooldown { reason, .. } => {
                assert!(reason.contains("entry_reorder_exceeded 3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_split_legs() {
        assert!(matches!(split_legs(Vec::new()), Err((0, None))));
    }
}
