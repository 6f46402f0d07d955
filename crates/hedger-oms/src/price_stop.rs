//! Event-driven stop-loss / take-profit on locked profit.
//!
//! A watch is armed for every filled entry with a hedge. Each price event
//! for the market re-evaluates `100 - (entry + hedge-side ask)` in cents:
//!
//! - hard stop: at or below `hard_loss_cents`, fires immediately
//! - soft stop: at or below `soft_loss_cents` for `confirm_ticks`
//!   consecutive evaluations
//! - take profit: at or above `take_profit_cents` (when > 0) for
//!   `take_profit_confirm_ticks` consecutive evaluations
//!
//! A fired watch hands the entry to the forced fill, which buys exactly the
//! remaining size immediate-or-cancel.

use std::sync::Arc;

use hedger_core::{
    BookSnapshot, MarketSlug, Order, OrderId, Pips, PriceChangedEvent, Size, TokenType,
    UNIT_TOTAL_CENTS,
};
use hedger_telemetry::Metrics;
use tracing::{debug, error, info, warn};

use crate::config::PriceStopParams;
use crate::coordinator::OmsCore;
use crate::forced_fill::{ForcedFillOutcome, ForcedFillReason};
use crate::state::OmsState;
use crate::status::{PriceStopWatchInfo, PriceStopWatchesStatus, WatchStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PriceStopWatch {
    pub market: MarketSlug,
    pub entry_token: TokenType,
    pub entry_price_cents: i64,
    pub entry_size: Size,
    pub first_hedge_id: OrderId,
    pub soft_hits: u32,
    pub take_profit_hits: u32,
    pub triggered: bool,
    pub last_eval_ms: u64,
    pub last_profit_cents: Option<i64>,
}

impl PriceStopWatch {
    pub fn new(entry: &Order, hedge_id: OrderId) -> Self {
        Self {
            market: entry.market.clone(),
            entry_token: entry.token,
            entry_price_cents: entry.effective_price().to_cents(),
            entry_size: entry.effective_size(),
            first_hedge_id: hedge_id,
            soft_hits: 0,
            take_profit_hits: 0,
            triggered: false,
            last_eval_ms: 0,
            last_profit_cents: None,
        }
    }

    /// Locked profit in cents if the hedge were bought at `hedge_ask`.
    pub fn profit_cents(&self, hedge_ask: Pips) -> i64 {
        UNIT_TOTAL_CENTS - (self.entry_price_cents + hedge_ask.to_cents())
    }

    /// Feed one observation. Returns the trigger, if any.
    ///
    /// Hard and soft checks run before take-profit.
    pub fn observe(&mut self, profit_cents: i64, params: &PriceStopParams) -> Option<StopTrigger> {
        self.last_profit_cents = Some(profit_cents);
        if profit_cents <= params.hard_loss_cents {
            return Some(StopTrigger::Hard);
        }

        if profit_cents <= params.soft_loss_cents {
            self.soft_hits += 1;
            if self.soft_hits >= params.confirm_ticks {
                return Some(StopTrigger::Soft);
            }
        } else {
            self.soft_hits = 0;
        }

        if params.take_profit_cents > 0 && profit_cents >= params.take_profit_cents {
            self.take_profit_hits += 1;
            if self.take_profit_hits >= params.take_profit_confirm_ticks {
                return Some(StopTrigger::TakeProfit);
            }
        } else {
            self.take_profit_hits = 0;
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopTrigger {
    Hard,
    Soft,
    TakeProfit,
}

impl From<StopTrigger> for ForcedFillReason {
    fn from(trigger: StopTrigger) -> Self {
        match trigger {
            StopTrigger::Hard => Self::HardStop,
            StopTrigger::Soft => Self::SoftStop,
            StopTrigger::TakeProfit => Self::TakeProfit,
        }
    }
}

struct Fired {
    entry_id: OrderId,
    hedge_id: OrderId,
    trigger: StopTrigger,
    ask: Pips,
    profit_cents: i64,
}

impl OmsCore {
    /// Price tick: wake the market's monitors, refresh exposure max loss and
    /// evaluate the price-stop watches.
    pub(crate) fn on_price_changed(self: &Arc<Self>, event: &PriceChangedEvent) {
        {
            let state = self.state.read();
            for handle in state.monitors.values().filter(|h| h.market == event.market) {
                handle.wake.notify_one();
            }
        }

        let snapshot = self.substrate.best_book_snapshot(&event.market);
        if let Some(snapshot) = &snapshot {
            self.state
                .write()
                .registry
                .refresh_max_loss(&event.market, &snapshot.top);
        }

        if !self.config.price_stop.enabled {
            return;
        }
        let Some(snapshot) = snapshot else {
            debug!(market = %event.market, "no book snapshot, price stop skipped");
            return;
        };
        let now = self.now_ms();
        if !snapshot.is_fresh(now, self.config.price_stop.stale_after_ms) {
            Metrics::stale_snapshot(event.market.as_str());
            debug!(
                market = %event.market,
                age_ms = snapshot.age_ms(now),
                "stale book snapshot, price stop skipped"
            );
            return;
        }

        let fired = {
            let mut state = self.state.write();
            evaluate_watches(&mut state, &event.market, &snapshot, &self.price_stop, now)
        };

        for fired in fired {
            let reason = ForcedFillReason::from(fired.trigger);
            Metrics::price_stop_triggered(event.market.as_str(), reason.as_str());
            warn!(
                market = %event.market,
                entry = %fired.entry_id,
                hedge = %fired.hedge_id,
                trigger = %reason,
                profit_cents = fired.profit_cents,
                ask = %fired.ask,
                "price stop triggered"
            );

            let core = Arc::clone(self);
            let market = event.market.clone();
            tokio::spawn(async move {
                match core
                    .forced_fill(&fired.entry_id, &fired.hedge_id, reason, Some(fired.ask))
                    .await
                {
                    Ok(ForcedFillOutcome::Submitted(order)) => debug!(
                        entry = %fired.entry_id,
                        order = %order.id,
                        status = %order.status,
                        "price stop forced fill sent"
                    ),
                    Ok(outcome) => info!(
                        entry = %fired.entry_id,
                        outcome = ?outcome,
                        "price stop forced fill not needed"
                    ),
                    Err(e) => {
                        error!(
                            market = %market,
                            entry = %fired.entry_id,
                            error = %e,
                            "price stop forced fill failed, exposure remains unhedged"
                        );
                        Metrics::unhedged(market.as_str(), "price_stop");
                    }
                }
            });
        }
    }

    pub(crate) fn price_stop_status(&self, market: &MarketSlug) -> PriceStopWatchesStatus {
        let params = &self.price_stop;
        let state = self.state.read();
        let mut watches: Vec<PriceStopWatchInfo> = state
            .watches
            .iter()
            .filter(|(_, w)| &w.market == market)
            .map(|(entry_id, w)| {
                let pending = state.pending.get(entry_id);
                let remaining = pending.map_or(Size::ZERO, |p| {
                    w.entry_size.saturating_sub(p.hedged_size())
                });
                let status = if w.triggered {
                    WatchStatus::Triggered
                } else if !remaining.is_positive() {
                    WatchStatus::Completed
                } else {
                    WatchStatus::Monitoring
                };
                PriceStopWatchInfo {
                    entry_order_id: entry_id.clone(),
                    hedge_order_id: pending.map(|p| p.hedge_id.clone()),
                    entry_token: w.entry_token,
                    entry_price_cents: w.entry_price_cents,
                    remaining_size: remaining,
                    profit_now_cents: w.last_profit_cents,
                    soft_hits: w.soft_hits,
                    take_profit_hits: w.take_profit_hits,
                    last_eval_ms: w.last_eval_ms,
                    status,
                }
            })
            .collect();
        watches.sort_by(|a, b| a.entry_order_id.cmp(&b.entry_order_id));

        PriceStopWatchesStatus {
            market: market.clone(),
            enabled: self.config.price_stop.enabled,
            soft_loss_cents: params.soft_loss_cents,
            hard_loss_cents: params.hard_loss_cents,
            take_profit_cents: params.take_profit_cents,
            confirm_ticks: params.confirm_ticks,
            take_profit_confirm_ticks: params.take_profit_confirm_ticks,
            watches,
        }
    }
}

/// Evaluate every watch of `market` against `snapshot`.
///
/// Fired entries are marked protective before returning so that no other
/// action starts on them. Entries already protective belong to a running
/// forced fill and are not evaluated.
fn evaluate_watches(
    state: &mut OmsState,
    market: &MarketSlug,
    snapshot: &BookSnapshot,
    params: &PriceStopParams,
    now_ms: u64,
) -> Vec<Fired> {
    let OmsState {
        watches,
        pending,
        protective,
        ..
    } = state;

    let mut fired = Vec::new();
    let mut dropped = Vec::new();
    for (entry_id, watch) in watches.iter_mut().filter(|(_, w)| &w.market == market) {
        let Some(pending) = pending.get(entry_id) else {
            dropped.push(entry_id.clone());
            continue;
        };
        if watch.triggered || protective.contains(entry_id) {
            continue;
        }
        if params.min_eval_interval_ms > 0
            && watch.last_eval_ms > 0
            && now_ms.saturating_sub(watch.last_eval_ms) < params.min_eval_interval_ms
        {
            continue;
        }
        watch.last_eval_ms = now_ms;

        let remaining = watch.entry_size.saturating_sub(pending.hedged_size());
        if !remaining.is_positive() {
            dropped.push(entry_id.clone());
            continue;
        }

        let ask = snapshot.top.ask_for(watch.entry_token.opposite());
        if !ask.is_positive() {
            continue;
        }
        let profit_cents = watch.profit_cents(ask);
        if let Some(trigger) = watch.observe(profit_cents, params) {
            watch.triggered = true;
            protective.insert(entry_id.clone());
            fired.push(Fired {
                entry_id: entry_id.clone(),
                hedge_id: pending.hedge_id.clone(),
                trigger,
                ask,
                profit_cents,
            });
        }
    }
    for entry_id in dropped {
        watches.remove(&entry_id);
    }
    fired
}
