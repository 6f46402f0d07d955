//! Per-entry hedge reorder monitor.
//!
//! One task per filled entry with a resting hedge. The monitor ticks every
//! `monitor.check_interval_ms` and is also woken by price events for its
//! market. Each step:
//!
//! 1. verifies it still owns the entry (pending record points at its hedge,
//!    no protective action running)
//! 2. escalates to a forced fill once the entry exceeds its maximum age
//! 3. exits on a filled hedge (success) or a hedge cancelled by someone
//!    else (external interference)
//! 4. escalates to a forced fill once the forced-fill deadline passes
//! 5. reprices the hedge once the reorder deadline passes, subject to the
//!    entry budget and the reorder rate limiter
//!
//! A bounded attempt counter freezes the monitor; after that only the age
//! and forced-fill deadlines act.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hedger_core::{
    Order, OrderId, OrderRequest, Pips, MAX_QUOTE_CENTS, MIN_QUOTE_CENTS, UNIT_TOTAL_CENTS,
};
use hedger_executor::ExecutorError;
use hedger_telemetry::Metrics;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::coordinator::OmsCore;
use crate::error::{OmsError, OmsResult};
use crate::forced_fill::{ForcedFillOutcome, ForcedFillReason};
use crate::state::MonitorHandle;
use crate::status::{ReorderAction, RepriceDetail};

/// Why a monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorExit {
    HedgeFilled,
    /// Another action now owns the pairing.
    Superseded,
    /// The hedge was cancelled or failed outside the monitor.
    ExternalCancel,
    ForcedFill(ForcedFillReason),
    /// Forced fills kept failing; the exposure is left to the operator.
    Unhedged,
    Cancelled,
}

enum Ownership {
    Owned(Order),
    Completed,
    Lost,
}

enum Reprice {
    Replaced(Order),
    Covered,
    Superseded,
}

pub(crate) struct HedgeReorderMonitor {
    core: Arc<OmsCore>,
    entry_id: OrderId,
    handle: MonitorHandle,
    hedge_id: OrderId,
    attempts: u32,
    frozen: bool,
    /// Set once the monitor itself cancelled the hedge and has not yet got
    /// a live replacement; a cancelled hedge is then expected.
    awaiting_replacement: bool,
    next_reorder_at_ms: u64,
    forced_fill_at_ms: Option<u64>,
    forced_fill_failures: u32,
}

impl HedgeReorderMonitor {
    pub fn new(core: Arc<OmsCore>, entry_id: OrderId, handle: MonitorHandle) -> Self {
        let now = core.now_ms();
        let hedge = &core.config.hedge;
        let next_reorder_at_ms = now + hedge.reorder_timeout_secs * 1000;
        let forced_fill_at_ms = (hedge.forced_fill_timeout_secs > 0)
            .then(|| now + hedge.forced_fill_timeout_secs * 1000);
        Self {
            hedge_id: handle.hedge_id.clone(),
            core,
            entry_id,
            handle,
            attempts: 0,
            frozen: false,
            awaiting_replacement: false,
            next_reorder_at_ms,
            forced_fill_at_ms,
            forced_fill_failures: 0,
        }
    }

    pub async fn run(mut self) {
        let period = Duration::from_millis(self.core.config.monitor.check_interval_ms.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let wake = Arc::clone(&self.handle.wake);
        let cancel = self.handle.cancel.clone();

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break MonitorExit::Cancelled,
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
            }
            if let Some(exit) = self.step().await {
                break exit;
            }
        };

        self.core.deregister_monitor(&self.entry_id, self.handle.id);
        debug!(
            market = %self.handle.market,
            entry = %self.entry_id,
            hedge = %self.hedge_id,
            attempts = self.attempts,
            exit = ?exit,
            "reorder monitor stopped"
        );
    }

    fn ownership(&self) -> Ownership {
        let state = self.core.state.read();
        if state.completed.contains(&self.entry_id) {
            return Ownership::Completed;
        }
        if state.protective.contains(&self.entry_id) {
            return Ownership::Lost;
        }
        let owned = state
            .pending
            .get(&self.entry_id)
            .is_some_and(|p| p.hedge_id == self.hedge_id);
        match state.entries.get(&self.entry_id) {
            Some(entry) if owned => Ownership::Owned(entry.clone()),
            _ => Ownership::Lost,
        }
    }

    async fn step(&mut self) -> Option<MonitorExit> {
        let entry = match self.ownership() {
            Ownership::Owned(entry) => entry,
            Ownership::Completed => return Some(MonitorExit::HedgeFilled),
            Ownership::Lost => return Some(MonitorExit::Superseded),
        };
        let now = self.core.now_ms();

        let age_exceeded = {
            let state = self.core.state.read();
            let started = state
                .guard
                .budget(&self.entry_id)
                .map(|b| b.started_at_ms)
                .or(entry.filled_at_ms)
                .unwrap_or(now);
            state.guard.is_age_exceeded(started, now)
        };
        if age_exceeded {
            return self.escalate(ForcedFillReason::MaxAge).await;
        }

        match self.core.substrate.get_order(&self.hedge_id).await {
            Ok(hedge) if hedge.is_filled() => {
                self.core.handle_hedge_filled(&hedge);
                return Some(MonitorExit::HedgeFilled);
            }
            Ok(hedge) if hedge.status.is_terminal() && !self.awaiting_replacement => {
                info!(
                    market = %entry.market,
                    entry = %self.entry_id,
                    hedge = %self.hedge_id,
                    status = %hedge.status,
                    "hedge ended outside the monitor"
                );
                return Some(MonitorExit::ExternalCancel);
            }
            Ok(hedge) => self.track_live_fill(&hedge),
            Err(e) => {
                debug!(hedge = %self.hedge_id, error = %e, "hedge lookup failed, retry next tick");
                return None;
            }
        }

        if self.forced_fill_at_ms.is_some_and(|at| now >= at) {
            return self.escalate(ForcedFillReason::Timeout).await;
        }

        if self.frozen || now < self.next_reorder_at_ms {
            return None;
        }
        let max_attempts = self.core.config.monitor.max_attempts;
        if max_attempts > 0 && self.attempts >= max_attempts {
            self.frozen = true;
            warn!(
                market = %entry.market,
                entry = %self.entry_id,
                attempts = self.attempts,
                "reprice attempts exhausted, monitor frozen"
            );
            return None;
        }

        let started = entry.filled_at_ms.unwrap_or(now);
        let budget = self.core.state.write().guard.consume_reorder_attempt(
            &self.entry_id,
            &entry.market,
            started,
            now,
        );
        if let Err(violation) = budget {
            Metrics::budget_skip(entry.market.as_str(), violation.kind());
            warn!(
                market = %entry.market,
                entry = %self.entry_id,
                violation = %violation,
                "reprice denied by entry budget"
            );
            self.next_reorder_at_ms = now + self.core.config.monitor.budget_retry_ms;
            return None;
        }

        if !self.core.reorder_limiter.allow(&entry.market, 1.0, now) {
            self.core
                .counters
                .reorder_budget_skips
                .fetch_add(1, Ordering::Relaxed);
            Metrics::budget_skip(entry.market.as_str(), "reorder_limiter");
            debug!(market = %entry.market, entry = %self.entry_id, "reprice rate limited");
            self.next_reorder_at_ms = now + self.core.config.monitor.limiter_retry_ms;
            return None;
        }

        self.attempts += 1;
        match self.reprice(&entry).await {
            Ok(Reprice::Replaced(order)) => {
                self.hedge_id = order.id.clone();
                let now = self.core.now_ms();
                if order.status.is_terminal() {
                    // Immediate-or-cancel replacement that missed.
                    self.awaiting_replacement = true;
                    self.next_reorder_at_ms = now + self.core.config.monitor.failure_retry_ms;
                } else {
                    self.awaiting_replacement = false;
                    self.next_reorder_at_ms =
                        now + self.core.config.hedge.reorder_timeout_secs * 1000;
                }
                None
            }
            Ok(Reprice::Covered) => Some(MonitorExit::HedgeFilled),
            Ok(Reprice::Superseded) => Some(MonitorExit::Superseded),
            Err(e) => {
                Metrics::reprice(entry.market.as_str(), "failed");
                warn!(
                    market = %entry.market,
                    entry = %self.entry_id,
                    hedge = %self.hedge_id,
                    attempt = self.attempts,
                    error = %e,
                    "reprice failed"
                );
                self.awaiting_replacement = true;
                self.next_reorder_at_ms =
                    self.core.now_ms() + self.core.config.monitor.failure_retry_ms;
                self.core.stats.lock().current_action = ReorderAction::Idle;
                None
            }
        }
    }

    /// Keep the pending record's live fill in step with the substrate.
    fn track_live_fill(&self, hedge: &Order) {
        if !hedge.filled_size.is_positive() {
            return;
        }
        let mut state = self.core.state.write();
        if let Some(pending) = state.pending.get_mut(&self.entry_id) {
            if pending.hedge_id == hedge.id && pending.live_filled < hedge.filled_size {
                pending.live_filled = hedge.filled_size;
            }
        }
    }

    async fn escalate(&mut self, reason: ForcedFillReason) -> Option<MonitorExit> {
        let market = self.handle.market.clone();
        warn!(
            market = %market,
            entry = %self.entry_id,
            hedge = %self.hedge_id,
            reason = %reason,
            "escalating to forced fill"
        );
        match self
            .core
            .forced_fill(&self.entry_id, &self.hedge_id, reason, None)
            .await
        {
            Ok(ForcedFillOutcome::Submitted(order)) if order.is_filled() => {
                Some(MonitorExit::ForcedFill(reason))
            }
            Ok(ForcedFillOutcome::Submitted(order)) => {
                self.hedge_id = order.id;
                self.awaiting_replacement = true;
                self.forced_fill_failed(reason)
            }
            Ok(ForcedFillOutcome::AlreadyFilled | ForcedFillOutcome::NothingRemaining) => {
                Some(MonitorExit::HedgeFilled)
            }
            Ok(ForcedFillOutcome::Superseded) => Some(MonitorExit::Superseded),
            Err(e) => {
                warn!(
                    market = %market,
                    entry = %self.entry_id,
                    reason = %reason,
                    error = %e,
                    "forced fill failed"
                );
                self.awaiting_replacement = true;
                self.forced_fill_failed(reason)
            }
        }
    }

    fn forced_fill_failed(&mut self, reason: ForcedFillReason) -> Option<MonitorExit> {
        self.forced_fill_failures += 1;
        if self.forced_fill_failures < self.core.config.monitor.max_forced_fill_retries {
            return None;
        }
        error!(
            market = %self.handle.market,
            entry = %self.entry_id,
            reason = %reason,
            attempts = self.forced_fill_failures,
            "forced fill retries exhausted, exposure remains unhedged"
        );
        Metrics::unhedged(self.handle.market.as_str(), "monitor");
        Some(MonitorExit::Unhedged)
    }

    /// Cancel the live hedge and rest a new one at the current quote.
    async fn reprice(&mut self, entry: &Order) -> OmsResult<Reprice> {
        let core = Arc::clone(&self.core);
        let market = &entry.market;
        let now = core.now_ms();
        core.state
            .write()
            .guard
            .record_cancel(&self.entry_id, market, now);
        core.stats.lock().set_action(
            ReorderAction::Canceling,
            &self.entry_id,
            &self.hedge_id,
            format!("cancel hedge {}", self.hedge_id),
            now,
        );

        let token = core.cycle_token();
        let gate = core.gate();
        let current = core.substrate.get_order(&self.hedge_id).await?;
        if !current.status.is_terminal() {
            gate.cancel_order(&token, self.hedge_id.clone()).await?;
        }
        tokio::time::sleep(Duration::from_millis(core.config.monitor.cancel_settle_ms)).await;

        let previous = core.substrate.get_order(&self.hedge_id).await?;
        if previous.is_filled() {
            info!(
                market = %market,
                entry = %self.entry_id,
                hedge = %previous.id,
                "hedge filled during reprice cancel"
            );
            core.handle_hedge_filled(&previous);
            return Ok(Reprice::Covered);
        }
        if !previous.status.is_terminal() {
            return Err(OmsError::Executor(ExecutorError::Transient(format!(
                "hedge {} still {} after cancel",
                previous.id, previous.status
            ))));
        }

        let superseded = match core.state.read().pending.get(&self.entry_id) {
            Some(p) if p.hedge_id == self.hedge_id => p.superseded_filled,
            _ => return Ok(Reprice::Superseded),
        };
        let remaining = entry
            .effective_size()
            .saturating_sub(superseded + previous.filled_size);
        if !remaining.is_positive() {
            core.finish_pairing(&self.entry_id, market, core.now_ms());
            return Ok(Reprice::Covered);
        }

        let top = core.substrate.top_of_book(market).await?;
        let ask_cents = top.ask_for(previous.token).to_cents();
        let entry_cents = entry.effective_price().to_cents();
        let quote = core.hedge_quote(market, entry_cents, ask_cents);
        if !(MIN_QUOTE_CENTS..=MAX_QUOTE_CENTS).contains(&quote.price_cents) {
            return Err(OmsError::InvalidHedgePrice(quote.price_cents));
        }

        let old_cents = previous.price.to_cents();
        core.stats.lock().set_action(
            ReorderAction::Reordering,
            &self.entry_id,
            &self.hedge_id,
            format!("{old_cents}c -> {}c ({})", quote.price_cents, quote.strategy),
            core.now_ms(),
        );
        let request = OrderRequest::replacing(
            &previous,
            Pips::from_cents(quote.price_cents),
            remaining,
            core.hedge_tif(remaining),
        )
        .linked_to(self.entry_id.clone());
        let order = gate.place_order(&token, request).await?;

        if !core.supersede_hedge(&self.entry_id, &self.hedge_id, previous.filled_size, &order) {
            warn!(
                market = %market,
                entry = %self.entry_id,
                orphan = %order.id,
                "pairing changed during reprice, cancelling replacement"
            );
            if !order.status.is_terminal() {
                if let Err(e) = gate.cancel_order(&token, order.id.clone()).await {
                    error!(order = %order.id, error = %e, "orphan hedge cancel failed");
                }
            }
            let orphan = core.substrate.get_order(&order.id).await.unwrap_or(order);
            core.absorb_orphan_fill(entry, &orphan);
            return Ok(Reprice::Superseded);
        }

        let at_ms = core.now_ms();
        let total_cost_cents = entry_cents + quote.price_cents;
        let detail = RepriceDetail {
            market: market.clone(),
            entry_order_id: self.entry_id.clone(),
            old_hedge_id: previous.id.clone(),
            new_hedge_id: order.id.clone(),
            old_price_cents: old_cents,
            new_price_cents: quote.price_cents,
            change_cents: quote.price_cents - old_cents,
            strategy: quote.strategy.to_string(),
            entry_cost_cents: entry_cents,
            market_ask_cents: ask_cents,
            ideal_cents: quote.ideal_cents,
            total_cost_cents,
            profit_cents: UNIT_TOTAL_CENTS - total_cost_cents,
            at_ms,
        };
        core.counters.total_reorders.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = core.stats.lock();
            stats.total_reorders += 1;
            stats.last_reprice = Some(detail);
        }
        Metrics::reprice(market.as_str(), "replaced");
        info!(
            market = %market,
            entry = %self.entry_id,
            old_hedge = %previous.id,
            new_hedge = %order.id,
            old_cents,
            new_cents = quote.price_cents,
            strategy = quote.strategy,
            size = %remaining,
            attempt = self.attempts,
            "hedge repriced"
        );

        if order.is_filled() {
            core.handle_hedge_filled(&order);
            return Ok(Reprice::Covered);
        }
        Ok(Reprice::Replaced(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OmsConfig;
    use crate::state::PendingHedge;
    use hedger_core::{
        ManualClock, Market, MarketSlug, OrderSide, OrderStatus, PriceChangedEvent, Size,
        TimeInForce, TokenType, TopOfBook,
    };
    use hedger_executor::PaperExchange;
    use rust_decimal_macros::dec;

    struct Harness {
        core: Arc<OmsCore>,
        exchange: Arc<PaperExchange>,
        clock: Arc<ManualClock>,
        market: Market,
    }

    fn book(down_bid: i64, down_ask: i64) -> TopOfBook {
        TopOfBook {
            up_bid: Pips::from_cents(39),
            up_ask: Pips::from_cents(41),
            down_bid: Pips::from_cents(down_bid),
            down_ask: Pips::from_cents(down_ask),
        }
    }

    fn harness(config: OmsConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (exchange, _updates) = PaperExchange::new(clock.clone());
        let exchange = Arc::new(exchange);
        let market = Market::new("m1", "up-1", "down-1");
        exchange.set_market(market.clone());
        exchange.set_book(book(60, 62));
        let core = Arc::new(OmsCore::new(config, exchange.clone(), clock.clone()));
        Harness {
            core,
            exchange,
            clock,
            market,
        }
    }

    fn filled_entry(clock: &ManualClock) -> Order {
        Order {
            id: OrderId::from("e1"),
            market: MarketSlug::from("m1"),
            asset_id: "up-1".to_string(),
            token: TokenType::Up,
            side: OrderSide::Buy,
            price: Pips::from_cents(40),
            size: Size::new(dec!(10)),
            filled_size: Size::new(dec!(10)),
            filled_price: Some(Pips::from_cents(40)),
            status: OrderStatus::Filled,
            tif: TimeInForce::ImmediateOrCancel,
            is_entry: true,
            linked_order: None,
            created_at_ms: clock.now_ms(),
            filled_at_ms: Some(clock.now_ms()),
        }
    }

    /// Resting hedge at 58c on the paper book (down ask 62c), entry tracked.
    async fn arm(h: &Harness) -> (Order, Order) {
        let entry = filled_entry(&h.clock);
        let request = OrderRequest::hedge(
            &h.market,
            TokenType::Down,
            Pips::from_cents(58),
            Size::new(dec!(10)),
            TimeInForce::GoodTilCancelled,
            Some(entry.id.clone()),
        );
        let hedge = h.exchange.place_order(request).await.unwrap();
        assert_eq!(hedge.status, OrderStatus::Open);
        h.core.record_pending(&entry, &hedge);
        h.core.handle_entry_filled(&entry, Some(hedge.id.clone()));
        (entry, hedge)
    }

    fn pending_hedge(core: &OmsCore) -> Option<PendingHedge> {
        core.state.read().pending.get(&OrderId::from("e1")).cloned()
    }

    use hedger_core::Clock;
    use hedger_executor::TradingSubstrate;

    #[tokio::test(start_paused = true)]
    async fn test_reprice_after_timeout() {
        let h = harness(OmsConfig::default());
        let (_, first) = arm(&h).await;

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(pending_hedge(&h.core).unwrap().hedge_id, first.id);

        h.clock.advance(16_000);
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        let pending = pending_hedge(&h.core).unwrap();
        assert_ne!(pending.hedge_id, first.id);
        assert_eq!(pending.original_price, Pips::from_cents(58));
        let replaced = h.exchange.get_order(&pending.hedge_id).await.unwrap();
        // ideal = 100 - 40 - 1 = 59, below the 62c ask: rests at 59c.
        assert_eq!(replaced.price, Pips::from_cents(59));
        assert_eq!(replaced.status, OrderStatus::Open);
        assert_eq!(replaced.linked_order, Some(OrderId::from("e1")));
        assert_eq!(
            h.exchange.get_order(&first.id).await.unwrap().status,
            OrderStatus::Canceled
        );

        let stats = h.core.stats.lock().clone();
        assert_eq!(stats.total_reorders, 1);
        let detail = stats.last_reprice.unwrap();
        assert_eq!(detail.old_price_cents, 58);
        assert_eq!(detail.new_price_cents, 59);
        assert_eq!(detail.strategy, "ideal");
        assert_eq!(detail.profit_cents, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filled_hedge_completes_pairing() {
        let h = harness(OmsConfig::default());
        let (_, hedge) = arm(&h).await;

        h.exchange.fill_order(&hedge.id, None).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(pending_hedge(&h.core).is_none());
        let state = h.core.state.read();
        assert!(state.completed.contains(&OrderId::from("e1")));
        assert!(state.monitors.is_empty());
        assert!(state.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_monitor() {
        let h = harness(OmsConfig::default());
        let (_, hedge) = arm(&h).await;

        h.exchange.cancel_order(hedge.id.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let state = h.core.state.read();
        assert!(state.monitors.is_empty());
        // The pairing stays visible as an unhedged exposure.
        assert!(state.pending.contains_key(&OrderId::from("e1")));
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_escalates_to_forced_fill() {
        let h = harness(OmsConfig::default());
        let (_, first) = arm(&h).await;

        h.clock.advance(121_000);
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        let placed = h.exchange.orders_placed();
        let forced = placed.last().unwrap();
        assert_eq!(forced.tif, TimeInForce::ImmediateOrCancel);
        assert_eq!(forced.price, Pips::from_cents(62));
        assert_eq!(forced.size, Size::new(dec!(10)));
        assert!(forced.is_filled());
        assert_ne!(forced.id, first.id);

        assert!(pending_hedge(&h.core).is_none());
        assert_eq!(h.core.stats.lock().total_forced_fills, 1);
        // One forced fill is within budget; no reprice happened.
        assert_eq!(h.core.stats.lock().total_reorders, 0);
    }

    fn forced_orders(exchange: &PaperExchange) -> Vec<Order> {
        exchange
            .orders_placed()
            .into_iter()
            .filter(|o| o.tif == TimeInForce::ImmediateOrCancel)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorder_limiter_postpones_reprice() {
        let mut config = OmsConfig::default();
        config.limits.reorder_capacity = 1;
        config.limits.reorder_refill_per_minute = 0.01;
        let h = harness(config);
        let (_, first) = arm(&h).await;
        let market = MarketSlug::from("m1");
        assert!(h.core.reorder_limiter.allow(&market, 1.0, h.clock.now_ms()));

        h.clock.advance(16_000);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let skips = || h.core.counters.reorder_budget_skips.load(Ordering::Relaxed);
        assert_eq!(skips(), 1);
        assert_eq!(pending_hedge(&h.core).unwrap().hedge_id, first.id);
        assert_eq!(h.exchange.orders_placed().len(), 1);
        assert_eq!(h.core.stats.lock().total_reorders, 0);

        // Next attempt waits for limiter_retry_ms (3s) of clock time.
        h.clock.advance(1_000);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(skips(), 1);

        h.clock.advance(2_500);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(skips(), 2);
        assert_eq!(h.exchange.orders_placed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_fill_timeout_escalates() {
        let mut config = OmsConfig::default();
        config.hedge.forced_fill_timeout_secs = 30;
        let h = harness(config);
        let (_, first) = arm(&h).await;

        // Past both the reorder deadline and the forced-fill deadline: the
        // forced fill wins and no reprice happens.
        h.clock.advance(31_000);
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        let forced = forced_orders(&h.exchange);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].price, Pips::from_cents(62));
        assert_eq!(forced[0].size, Size::new(dec!(10)));
        assert!(forced[0].is_filled());
        assert_eq!(
            h.exchange.get_order(&first.id).await.unwrap().status,
            OrderStatus::Canceled
        );

        assert!(pending_hedge(&h.core).is_none());
        let stats = h.core.stats.lock().clone();
        assert_eq!(stats.total_forced_fills, 1);
        assert_eq!(stats.total_reorders, 0);
        assert!(h.core.state.read().monitors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_fill_retries_exhausted_leaves_exposure() {
        let h = harness(OmsConfig::default());
        arm(&h).await;
        h.exchange.refuse_orders(Some("market halted".to_string()));

        h.clock.advance(121_000);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        // Two failed attempts so far; the monitor is still retrying.
        assert_eq!(h.core.state.read().monitors.len(), 1);

        tokio::time::sleep(Duration::from_millis(4_000)).await;

        let state = h.core.state.read();
        assert!(state.monitors.is_empty());
        assert!(state.protective.is_empty());
        assert!(state.pending.contains_key(&OrderId::from("e1")));
        assert_eq!(state.registry.len(), 1);
        assert_eq!(state.guard.budget(&OrderId::from("e1")).unwrap().forced_fills, 3);
        drop(state);
        assert!(forced_orders(&h.exchange).is_empty());
        assert_eq!(h.core.stats.lock().total_forced_fills, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_stop_during_monitor_forced_fill_does_not_double_hedge() {
        let mut config = OmsConfig::default();
        config.price_stop.enabled = true;
        config.price_stop.cancel_settle_ms = 150;
        config.monitor.cancel_settle_ms = 150;
        config.queue.min_interval_ms = 300;
        let h = harness(config);
        arm(&h).await;
        assert_eq!(h.core.state.read().watches.len(), 1);

        // First monitor tick after this sees the entry past its maximum age
        // and starts a forced fill; 50ms later it is inside the cancel
        // settle window.
        h.clock.advance(121_000);
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(h.core.state.read().protective.contains(&OrderId::from("e1")));

        // Hard stop level: 100 - 40 - 75 = -35c.
        h.exchange.set_book(book(74, 75));
        h.core.on_price_changed(&PriceChangedEvent {
            market: MarketSlug::from("m1"),
            token: TokenType::Down,
            old_price: Pips::from_cents(62),
            new_price: Pips::from_cents(75),
            timestamp_ms: h.clock.now_ms(),
        });
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        let forced = forced_orders(&h.exchange);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].filled_size, Size::new(dec!(10)));
        assert_eq!(h.core.stats.lock().total_forced_fills, 1);

        let state = h.core.state.read();
        assert!(state.pending.is_empty());
        assert!(state.watches.is_empty());
        assert!(state.protective.is_empty());
        assert!(state.completed.contains(&OrderId::from("e1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_fill_credited_to_open_pairing() {
        let h = harness(OmsConfig::default());
        let (entry, hedge) = arm(&h).await;
        let partial = h.exchange.fill_order(&hedge.id, Some(Size::new(dec!(4)))).unwrap();

        // A stray hedge order for the same entry fills 4 more.
        h.core.absorb_orphan_fill(&entry, &partial);
        let pending = pending_hedge(&h.core).unwrap();
        assert_eq!(pending.superseded_filled, Size::new(dec!(4)));

        // The next 6 complete the pairing.
        let mut rest = partial.clone();
        rest.filled_size = Size::new(dec!(6));
        h.core.absorb_orphan_fill(&entry, &rest);
        assert!(pending_hedge(&h.core).is_none());
        assert!(h.core.state.read().completed.contains(&entry.id));

        // Pairing already closed: nothing left to credit.
        h.core.absorb_orphan_fill(&entry, &rest);
        assert!(pending_hedge(&h.core).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_protective_mark_supersedes_monitor() {
        let h = harness(OmsConfig::default());
        arm(&h).await;
        h.core
            .state
            .write()
            .protective
            .insert(OrderId::from("e1"));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(h.core.state.read().monitors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_cancel_stops_monitor() {
        let h = harness(OmsConfig::default());
        arm(&h).await;
        assert_eq!(h.core.state.read().monitors.len(), 1);
        h.core.rotate_cycle();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.core.state.read().monitors.is_empty());
    }
}
