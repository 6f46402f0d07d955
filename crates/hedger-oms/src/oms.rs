//! Public coordinator handle.
//!
//! [`Oms`] is the surface the strategy layer talks to. It forwards into the
//! shared `OmsCore` and owns the lifecycle tasks (monitor resume and the
//! periodic metrics log).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hedger_core::{
    Clock, Decision, ExecutionMode, Market, MarketSlug, Order, OrderId, PriceChangedEvent, Size,
    SystemClock, TokenType,
};
use hedger_executor::{Settlement, TradingSubstrate};
use hedger_risk::Exposure;
use hedger_telemetry::Metrics;
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OmsConfig;
use crate::coordinator::{entry_fill_confirmed, OmsCore};
use crate::error::OmsResult;
use crate::order_executor::ExecutionOutcome;
use crate::status::{OpsMetrics, PriceStopWatchesStatus, RiskExposureInfo, RiskManagementStatus};

/// Position imbalance tolerated before a market counts as unhedged.
const POSITION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Entry/hedge order coordinator.
///
/// Cheap to clone; every clone drives the same state.
#[derive(Clone)]
pub struct Oms {
    core: Arc<OmsCore>,
}

impl Oms {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: OmsConfig, substrate: Arc<dyn TradingSubstrate>) -> Self {
        Self::with_clock(config, substrate, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: OmsConfig,
        substrate: Arc<dyn TradingSubstrate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(OmsCore::new(config, substrate, clock)),
        }
    }

    /// Attach the collaborator that merges paired positions.
    pub fn set_settlement(&self, settlement: Arc<dyn Settlement>) {
        *self.core.settlement.write() = Some(settlement);
    }

    pub fn config(&self) -> &OmsConfig {
        &self.core.config
    }

    // ========================================================================
    // Strategy surface
    // ========================================================================

    /// Place an entry and its hedge for `decision`.
    pub async fn execute_order(
        &self,
        market: &Market,
        decision: &Decision,
    ) -> OmsResult<ExecutionOutcome> {
        self.core.execute_order(market, decision).await
    }

    /// Must be called for every order status change reported by the
    /// substrate.
    pub fn on_order_update(&self, order: &Order) {
        if order.is_entry {
            self.on_entry_update(order);
        } else {
            self.on_hedge_update(order);
        }
    }

    fn on_entry_update(&self, entry: &Order) {
        if !entry_fill_confirmed(entry) {
            return;
        }
        let (completed, hedge_id) = {
            let state = self.core.state.read();
            (
                state.completed.contains(&entry.id),
                state.pending.get(&entry.id).map(|p| p.hedge_id.clone()),
            )
        };
        if completed {
            return;
        }
        if let Some(hedge_id) = hedge_id {
            self.core.handle_entry_filled(entry, Some(hedge_id));
            return;
        }

        let now = self.core.now_ms();
        self.core
            .state
            .write()
            .registry
            .register_entry(entry, None, now);
        self.core.publish_pairing_state(&entry.market);
        match self.core.config.execution.mode {
            ExecutionMode::Sequential => self.core.spawn_fallback_hedge(entry.clone()),
            ExecutionMode::Parallel => warn!(
                market = %entry.market,
                entry = %entry.id,
                "entry filled without a recorded hedge"
            ),
        }
    }

    fn on_hedge_update(&self, hedge: &Order) {
        {
            let mut state = self.core.state.write();
            state.registry.update_hedge_status(&hedge.id, hedge.status);
            let entry_id = state.entry_for_hedge(&hedge.id, hedge.linked_order.as_ref());
            if let Some(pending) = entry_id.and_then(|id| state.pending.get_mut(&id)) {
                if hedge.filled_size > pending.live_filled {
                    pending.live_filled = hedge.filled_size;
                }
            }
        }
        if hedge.is_filled() {
            self.core.handle_hedge_filled(hedge);
        }
    }

    /// Must be called for every price tick.
    pub fn on_price_changed(&self, event: &PriceChangedEvent) {
        self.core.on_price_changed(event);
    }

    /// Market rollover: stop every monitor and forget the old cycle.
    pub fn on_cycle(&self, old: Option<&Market>, new: &Market) {
        self.core.rotate_cycle();
        {
            let mut state = self.core.state.write();
            state.reset_cycle();
            state.markets.insert(new.slug.clone(), new.clone());
        }
        self.core.stats.lock().current_action = Default::default();
        if let Some(old) = old {
            self.core.publish_pairing_state(&old.slug);
        }
        info!(
            old = ?old.map(|m| m.slug.as_str()),
            new = %new.slug,
            "market cycle rolled over"
        );
    }

    /// Hedge an already filled entry at the ask.
    pub async fn auto_hedge_position(&self, market: &Market, entry: &Order) -> OmsResult<Order> {
        self.core.auto_hedge_position(market, entry).await
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub async fn risk_management_status(&self) -> RiskManagementStatus {
        let core = &self.core;
        let now = core.now_ms();
        let reorder = core.stats.lock().view(now);
        let mut exposures: Vec<(Exposure, Option<i64>)> = {
            let state = core.state.read();
            state
                .registry
                .exposures()
                .into_iter()
                .map(|e| {
                    let original = state
                        .pending
                        .get(&e.entry_order_id)
                        .map(|p| p.original_price.to_cents());
                    (e, original)
                })
                .collect()
        };
        exposures.sort_by(|a, b| a.0.entry_order_id.cmp(&b.0.entry_order_id));

        let horizon = core.config.hedge.aggressive_timeout_secs;
        let mut infos = Vec::with_capacity(exposures.len());
        for (exposure, original) in exposures {
            let live_price = match &exposure.hedge_order_id {
                Some(id) => core
                    .substrate
                    .get_order(id)
                    .await
                    .ok()
                    .map(|o| o.price.to_cents()),
                None => None,
            };
            let new_price = reorder
                .last_reprice
                .as_ref()
                .filter(|r| r.entry_order_id == exposure.entry_order_id)
                .map(|r| r.new_price_cents);
            let exposure_secs = exposure.exposure_secs(now);
            infos.push(RiskExposureInfo {
                market: exposure.market,
                entry_order_id: exposure.entry_order_id,
                entry_token: exposure.entry_token,
                entry_size: exposure.entry_size,
                entry_price_cents: exposure.entry_price_cents,
                hedge_order_id: exposure.hedge_order_id,
                hedge_status: exposure.hedge_status,
                exposure_secs,
                countdown_secs: horizon.saturating_sub(exposure_secs),
                max_loss_cents: exposure.max_loss_cents,
                original_hedge_price_cents: original.or(live_price),
                new_hedge_price_cents: new_price,
            });
        }

        RiskManagementStatus {
            exposures: infos,
            reorder,
        }
    }

    pub fn ops_metrics(&self, market: &MarketSlug) -> OpsMetrics {
        ops_snapshot(&self.core, market)
    }

    pub fn price_stop_status(&self, market: &MarketSlug) -> PriceStopWatchesStatus {
        self.core.price_stop_status(market)
    }

    /// True while a hedge is pending on `market`, or while the open
    /// positions on its two tokens differ. A failed position read counts
    /// as unhedged.
    pub async fn has_unhedged_risk(&self, market: &MarketSlug) -> bool {
        if self.core.state.read().pending_for_market(market) > 0 {
            return true;
        }
        match self.core.substrate.open_positions(market).await {
            Ok(positions) => {
                let held = |token: TokenType| {
                    positions
                        .iter()
                        .filter(|p| p.token == token)
                        .fold(Size::ZERO, |acc, p| acc + p.size)
                        .inner()
                };
                (held(TokenType::Up) - held(TokenType::Down)).abs() > POSITION_TOLERANCE
            }
            Err(e) => {
                warn!(market = %market, error = %e, "position read failed, assuming unhedged");
                true
            }
        }
    }

    /// Remaining cooldown in milliseconds and its reason.
    pub fn market_cooldown(&self, market: &MarketSlug) -> Option<(u64, String)> {
        self.core.market_cooldown(market)
    }

    pub fn exposures(&self) -> Vec<Exposure> {
        self.core.state.read().registry.exposures()
    }

    /// Live hedge tracked for `entry_id`.
    pub fn pending_hedge(&self, entry_id: &OrderId) -> Option<OrderId> {
        self.core
            .state
            .read()
            .pending
            .get(entry_id)
            .map(|p| p.hedge_id.clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the gate, resume monitors for unfilled hedges and start the
    /// metrics log.
    pub fn start(&self) {
        self.core.ensure_gate();
        self.core.ensure_cycle();
        let token = CancellationToken::new();
        if let Some(previous) = self.core.lifecycle.lock().replace(token.clone()) {
            previous.cancel();
        }

        let core = Arc::clone(&self.core);
        let resume_token = token.clone();
        let delay = Duration::from_millis(core.config.monitor.resume_delay_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = resume_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            resume_monitors(&core).await;
        });

        let interval_secs = self.core.config.metrics_log_interval_secs;
        if interval_secs > 0 {
            let core = Arc::clone(&self.core);
            tokio::spawn(metrics_loop(core, token, Duration::from_secs(interval_secs)));
        }
        info!(mode = %self.core.config.execution.mode, "order coordinator started");
    }

    /// Close the gate and stop every background task.
    pub fn stop(&self) {
        if let Some(token) = self.core.lifecycle.lock().take() {
            token.cancel();
        }
        self.core.gate().close();
        self.core.cancel_cycle();
        {
            let mut state = self.core.state.write();
            for handle in state.monitors.values() {
                handle.cancel.cancel();
            }
            state.monitors.clear();
            state.watches.clear();
        }
        info!("order coordinator stopped");
    }
}

/// Restart monitors for filled entries whose hedge still rests.
async fn resume_monitors(core: &Arc<OmsCore>) {
    let candidates: Vec<(OrderId, OrderId, MarketSlug)> = {
        let state = core.state.read();
        state
            .pending
            .iter()
            .filter(|(entry, _)| state.entries.contains_key(*entry))
            .filter(|(entry, _)| !state.monitors.contains_key(*entry))
            .map(|(entry, p)| (entry.clone(), p.hedge_id.clone(), p.market.clone()))
            .collect()
    };

    for (entry_id, hedge_id, market) in candidates {
        match core.substrate.get_order(&hedge_id).await {
            Ok(hedge) if hedge.is_filled() => {
                core.handle_hedge_filled(&hedge);
            }
            Ok(hedge) if !hedge.status.is_terminal() => {
                info!(market = %market, entry = %entry_id, hedge = %hedge_id, "monitor resumed");
                core.start_monitor(entry_id, hedge_id, market);
            }
            Ok(hedge) => debug!(
                entry = %entry_id,
                hedge = %hedge_id,
                status = %hedge.status,
                "hedge ended, monitor not resumed"
            ),
            Err(e) => warn!(hedge = %hedge_id, error = %e, "hedge lookup failed on resume"),
        }
    }
}

async fn metrics_loop(core: Arc<OmsCore>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let markets: Vec<MarketSlug> = core.state.read().markets.keys().cloned().collect();
        Metrics::gate_queue_depth(core.gate().queue_len());
        for market in markets {
            let snapshot = ops_snapshot(&core, &market);
            Metrics::hedge_ewma(market.as_str(), snapshot.hedge_ewma_secs);
            core.publish_pairing_state(&market);
            debug!(metrics = ?snapshot, "ops metrics");
        }
    }
}

fn ops_snapshot(core: &OmsCore, market: &MarketSlug) -> OpsMetrics {
    let cooldown = core.market_cooldown(market);
    let queue_len = core.gate().queue_len();
    let state = core.state.read();
    OpsMetrics {
        market: market.clone(),
        queue_len,
        pending_hedges: state.pending_for_market(market),
        exposures: state.registry.count_for_market(market),
        active_monitors: state.monitors.values().filter(|h| &h.market == market).count(),
        active_watches: state.watches.values().filter(|w| &w.market == market).count(),
        hedge_ewma_secs: state.timing.ewma_secs(market),
        hedge_ewma_samples: state.timing.sample_count(market),
        reorder_budget_skips: core.counters.reorder_budget_skips.load(Ordering::Relaxed),
        forced_fill_budget_warnings: core
            .counters
            .forced_fill_budget_warnings
            .load(Ordering::Relaxed),
        cooldown_remaining_secs: cooldown.as_ref().map_or(0, |(ms, _)| ms.div_ceil(1000)),
        cooldown_reason: cooldown.map(|(_, reason)| reason),
    }
}
