//! Shared coordinator internals.
//!
//! `OmsCore` is owned through an `Arc` by the public [`crate::Oms`] handle,
//! every reorder monitor and every deferred task. It holds the config, the
//! substrate ports, the execution gate, the rate limiters and the locked
//! [`OmsState`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hedger_core::{Clock, MarketSlug, Order, OrderId, OrderStatus, Size};
use hedger_executor::{QueuedExecutionGate, Settlement, TradingSubstrate};
use hedger_risk::TokenBucketLimiter;
use hedger_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{OmsConfig, PriceStopParams};
use crate::hedge_reorder::HedgeReorderMonitor;
use crate::price_stop::PriceStopWatch;
use crate::state::{MonitorHandle, OmsState, PendingHedge};
use crate::status::ReorderStats;

/// Monotonic counters surfaced in the ops metrics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub reorder_budget_skips: AtomicU64,
    pub forced_fill_budget_warnings: AtomicU64,
    pub total_reorders: AtomicU64,
    pub total_forced_fills: AtomicU64,
}

pub(crate) struct OmsCore {
    pub config: OmsConfig,
    pub price_stop: PriceStopParams,
    pub substrate: Arc<dyn TradingSubstrate>,
    pub clock: Arc<dyn Clock>,
    pub state: RwLock<OmsState>,
    pub reorder_limiter: TokenBucketLimiter,
    pub forced_fill_limiter: TokenBucketLimiter,
    pub stats: Mutex<ReorderStats>,
    pub counters: Counters,
    pub settlement: RwLock<Option<Arc<dyn Settlement>>>,
    pub settlement_scheduled: Mutex<HashSet<MarketSlug>>,
    gate: RwLock<Arc<QueuedExecutionGate>>,
    cycle: RwLock<CancellationToken>,
    pub lifecycle: Mutex<Option<CancellationToken>>,
    next_monitor_id: AtomicU64,
}

impl OmsCore {
    /// Must be called from within a Tokio runtime (starts the gate worker).
    pub fn new(
        config: OmsConfig,
        substrate: Arc<dyn TradingSubstrate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = QueuedExecutionGate::start(Arc::clone(&substrate), &config.queue);
        let limits = &config.limits;
        Self {
            price_stop: config.price_stop.params(),
            reorder_limiter: TokenBucketLimiter::new(
                "reorder",
                limits.reorder_capacity,
                limits.reorder_refill_per_minute,
            ),
            forced_fill_limiter: TokenBucketLimiter::new(
                "forced_fill",
                limits.forced_fill_capacity,
                limits.forced_fill_refill_per_minute,
            ),
            state: RwLock::new(OmsState::new(config.entry_guard.clone())),
            stats: Mutex::new(ReorderStats::default()),
            counters: Counters::default(),
            settlement: RwLock::new(None),
            settlement_scheduled: Mutex::new(HashSet::new()),
            gate: RwLock::new(Arc::new(gate)),
            cycle: RwLock::new(CancellationToken::new()),
            lifecycle: Mutex::new(None),
            next_monitor_id: AtomicU64::new(1),
            config,
            substrate,
            clock,
        }
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn gate(&self) -> Arc<QueuedExecutionGate> {
        Arc::clone(&self.gate.read())
    }

    /// Replace a closed gate with a fresh one.
    pub fn ensure_gate(&self) {
        let mut gate = self.gate.write();
        if gate.is_closed() {
            *gate = Arc::new(QueuedExecutionGate::start(
                Arc::clone(&self.substrate),
                &self.config.queue,
            ));
        }
    }

    /// Token of the current market cycle.
    pub fn cycle_token(&self) -> CancellationToken {
        self.cycle.read().clone()
    }

    /// Cancel the current cycle and install a fresh token.
    pub fn rotate_cycle(&self) {
        let mut cycle = self.cycle.write();
        cycle.cancel();
        *cycle = CancellationToken::new();
    }

    /// Install a fresh cycle token if the current one was cancelled.
    pub fn ensure_cycle(&self) {
        let mut cycle = self.cycle.write();
        if cycle.is_cancelled() {
            *cycle = CancellationToken::new();
        }
    }

    pub fn cancel_cycle(&self) {
        self.cycle.read().cancel();
    }

    // ========================================================================
    // Pairing bookkeeping
    // ========================================================================

    pub fn record_pending(&self, entry: &Order, hedge: &Order) {
        let mut state = self.state.write();
        state
            .pending
            .insert(entry.id.clone(), PendingHedge::new(hedge));
        debug!(
            market = %entry.market,
            entry = %entry.id,
            hedge = %hedge.id,
            price = %hedge.price,
            size = %hedge.size,
            "pending hedge recorded"
        );
    }

    /// Point the entry's pairing at `replacement`.
    ///
    /// Fails (returns false) when the pending record no longer points at
    /// `previous`; the caller lost a race and must not act further.
    pub fn supersede_hedge(
        &self,
        entry_id: &OrderId,
        previous: &OrderId,
        previous_filled: Size,
        replacement: &Order,
    ) -> bool {
        let mut state = self.state.write();
        let Some(pending) = state.pending.get_mut(entry_id) else {
            return false;
        };
        if &pending.hedge_id != previous {
            return false;
        }
        pending.superseded_filled = pending.superseded_filled + previous_filled;
        pending.live_filled = replacement.filled_size;
        pending.hedge_id = replacement.id.clone();
        state
            .registry
            .update_hedge_order_id(entry_id, replacement.id.clone());
        if let Some(handle) = state.monitors.get_mut(entry_id) {
            handle.hedge_id = replacement.id.clone();
        }
        true
    }

    /// Entry fill confirmed: register the exposure, arm the price stop and
    /// start the reorder monitor. Safe to call repeatedly for one entry.
    pub fn handle_entry_filled(self: &Arc<Self>, entry: &Order, hedge_id: Option<OrderId>) {
        let now = self.now_ms();
        let filled_at = entry.filled_at_ms.unwrap_or(now);
        let hedge_id = {
            let mut state = self.state.write();
            if state.completed.contains(&entry.id) {
                return;
            }
            state.entries.insert(entry.id.clone(), entry.clone());
            state
                .guard
                .ensure_budget(&entry.id, &entry.market, filled_at, now);
            state
                .timing
                .record_entry_filled(&entry.id, &entry.market, filled_at);
            let hedge_id =
                hedge_id.or_else(|| state.pending.get(&entry.id).map(|p| p.hedge_id.clone()));
            state.registry.register_entry(entry, hedge_id.clone(), now);
            if let Some(hedge) = &hedge_id {
                if self.config.price_stop.enabled && !state.watches.contains_key(&entry.id) {
                    state
                        .watches
                        .insert(entry.id.clone(), PriceStopWatch::new(entry, hedge.clone()));
                }
            }
            hedge_id
        };

        info!(
            market = %entry.market,
            entry = %entry.id,
            token = %entry.token,
            price = %entry.effective_price(),
            size = %entry.effective_size(),
            hedge = ?hedge_id,
            "entry filled"
        );
        self.publish_pairing_state(&entry.market);

        if let Some(hedge) = hedge_id {
            self.start_monitor(entry.id.clone(), hedge, entry.market.clone());
        }
    }

    /// Hedge fill reported. Acts only if the order is the entry's live hedge.
    pub fn handle_hedge_filled(self: &Arc<Self>, hedge: &Order) -> bool {
        let entry_id = self
            .state
            .read()
            .entry_for_hedge(&hedge.id, hedge.linked_order.as_ref());
        match entry_id {
            Some(entry_id) => {
                let filled_at = hedge.filled_at_ms.unwrap_or_else(|| self.now_ms());
                self.finish_pairing(&entry_id, &hedge.market, filled_at)
            }
            None => {
                debug!(hedge = %hedge.id, "fill for untracked hedge ignored");
                false
            }
        }
    }

    /// Close the pairing of `entry_id`: the entry is fully hedged.
    pub fn finish_pairing(
        self: &Arc<Self>,
        entry_id: &OrderId,
        market: &MarketSlug,
        hedge_filled_at_ms: u64,
    ) -> bool {
        let (sample, ewma) = {
            let mut state = self.state.write();
            let Some(pending) = state.pending.remove(entry_id) else {
                return false;
            };
            state.guard.clear_budget(entry_id);
            state.watches.remove(entry_id);
            state.protective.remove(entry_id);
            state
                .registry
                .update_hedge_status(&pending.hedge_id, OrderStatus::Filled);
            state.registry.remove(entry_id);
            state.entries.remove(entry_id);
            state.completed.insert(entry_id.clone());
            if let Some(handle) = state.monitors.get(entry_id) {
                handle.wake.notify_one();
            }
            let sample = state.timing.record_hedge_filled(entry_id, hedge_filled_at_ms);
            (sample, state.timing.ewma_secs(market))
        };

        match sample {
            Some(secs) => {
                Metrics::hedge_latency(market.as_str(), secs, ewma);
                info!(
                    market = %market,
                    entry = %entry_id,
                    latency_secs = secs,
                    ewma_secs = ewma,
                    "hedge pair complete"
                );
            }
            None => info!(market = %market, entry = %entry_id, "hedge pair complete"),
        }
        self.publish_pairing_state(market);
        self.schedule_settlement(market);
        true
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Start the reorder monitor for an entry unless one already watches
    /// the same hedge.
    pub fn start_monitor(
        self: &Arc<Self>,
        entry_id: OrderId,
        hedge_id: OrderId,
        market: MarketSlug,
    ) {
        let cancel = self.cycle_token().child_token();
        let handle = {
            let mut state = self.state.write();
            if !state.pending.contains_key(&entry_id) {
                return;
            }
            if let Some(existing) = state.monitors.get(&entry_id) {
                if existing.hedge_id == hedge_id && !existing.cancel.is_cancelled() {
                    return;
                }
                existing.cancel.cancel();
            }
            let handle = MonitorHandle {
                id: self.next_monitor_id.fetch_add(1, Ordering::Relaxed),
                hedge_id: hedge_id.clone(),
                market: market.clone(),
                wake: Arc::new(Notify::new()),
                cancel,
            };
            state.monitors.insert(entry_id.clone(), handle.clone());
            handle
        };

        debug!(
            market = %market,
            entry = %entry_id,
            hedge = %hedge_id,
            "reorder monitor started"
        );
        let monitor = HedgeReorderMonitor::new(Arc::clone(self), entry_id, handle);
        tokio::spawn(monitor.run());
    }

    /// Forget a finished monitor. A newer monitor for the entry is kept.
    pub fn deregister_monitor(&self, entry_id: &OrderId, monitor_id: u64) {
        let mut state = self.state.write();
        if state.monitors.get(entry_id).is_some_and(|h| h.id == monitor_id) {
            state.monitors.remove(entry_id);
        }
    }

    pub fn claim(&self, entry_id: &OrderId) {
        self.state.write().claimed.insert(entry_id.clone());
    }

    pub fn unclaim(&self, entry_id: &OrderId) {
        self.state.write().claimed.remove(entry_id);
    }

    /// Remaining cooldown of `market` in ms, with its reason.
    pub fn market_cooldown(&self, market: &MarketSlug) -> Option<(u64, String)> {
        let now = self.now_ms();
        self.state.write().guard.market_cooldown(market, now)
    }

    pub fn publish_pairing_state(&self, market: &MarketSlug) {
        let (pending, exposures) = {
            let state = self.state.read();
            (
                state.pending_for_market(market),
                state.registry.count_for_market(market),
            )
        };
        Metrics::pairing_state(market.as_str(), pending, exposures);
    }
}

/// An entry counts as filled once fully filled, or once terminal with a
/// partial fill (immediate-or-cancel remainder dropped).
pub(crate) fn entry_fill_confirmed(order: &Order) -> bool {
    order.is_filled() || (order.status.is_terminal() && order.filled_size.is_positive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hedger_core::{OrderSide, Pips, TimeInForce, TokenType};
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus, filled: Size) -> Order {
        Order {
            id: OrderId::from("e1"),
            market: MarketSlug::from("m1"),
            asset_id: "up-1".to_string(),
            token: TokenType::Up,
            side: OrderSide::Buy,
            price: Pips::from_cents(40),
            size: Size::new(dec!(10)),
            filled_size: filled,
            filled_price: None,
            status,
            tif: TimeInForce::ImmediateOrCancel,
            is_entry: true,
            linked_order: None,
            created_at_ms: 0,
            filled_at_ms: None,
        }
    }

    #[test]
    fn test_entry_fill_confirmed() {
        assert!(entry_fill_confirmed(&order(OrderStatus::Filled, Size::new(dec!(10)))));
        assert!(entry_fill_confirmed(&order(OrderStatus::Canceled, Size::new(dec!(4)))));
        assert!(!entry_fill_confirmed(&order(OrderStatus::Canceled, Size::ZERO)));
        assert!(!entry_fill_confirmed(&order(OrderStatus::Partial, Size::new(dec!(4)))));
    }
}
