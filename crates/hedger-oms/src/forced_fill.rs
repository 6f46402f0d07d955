//! Last-resort hedging with an immediate-or-cancel order.
//!
//! Used by the reorder monitor (age or timeout escalation) and by the
//! price stop. Sequence: cancel the live hedge, re-read it, then buy the
//! exact remaining size at the ask.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hedger_core::{Order, OrderId, OrderRequest, Pips, TimeInForce};
use hedger_executor::ExecutorError;
use hedger_telemetry::Metrics;
use tracing::{error, info, warn};

use crate::coordinator::OmsCore;
use crate::error::{OmsError, OmsResult};
use crate::status::ReorderAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedFillReason {
    /// Entry older than the guard's maximum age.
    MaxAge,
    /// Resting hedge older than the forced-fill timeout.
    Timeout,
    HardStop,
    SoftStop,
    TakeProfit,
}

impl ForcedFillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxAge => "max_age",
            Self::Timeout => "timeout",
            Self::HardStop => "hard_stop",
            Self::SoftStop => "soft_stop",
            Self::TakeProfit => "take_profit",
        }
    }

    /// Price-stop triggers mark the entry protective before calling in.
    pub fn is_price_stop(&self) -> bool {
        matches!(self, Self::HardStop | Self::SoftStop | Self::TakeProfit)
    }
}

impl fmt::Display for ForcedFillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForcedFillOutcome {
    /// Immediate-or-cancel order sent; check its status for the result.
    Submitted(Order),
    /// The hedge filled before the cancel landed.
    AlreadyFilled,
    /// Earlier fills already cover the entry.
    NothingRemaining,
    /// Another action owns the pairing now.
    Superseded,
}

impl OmsCore {
    /// Force-fill the remainder of `entry_id`'s hedge.
    ///
    /// `snapshot_ask` is the hedge-side ask the price stop evaluated; the
    /// monitor passes `None` and a fresh top of book is read.
    pub(crate) async fn forced_fill(
        self: &Arc<Self>,
        entry_id: &OrderId,
        hedge_id: &OrderId,
        reason: ForcedFillReason,
        snapshot_ask: Option<Pips>,
    ) -> OmsResult<ForcedFillOutcome> {
        let now = self.now_ms();
        let claimed = {
            let mut state = self.state.write();
            let owned = state
                .pending
                .get(entry_id)
                .is_some_and(|p| &p.hedge_id == hedge_id);
            match state.entries.get(entry_id).cloned() {
                Some(entry) if owned => {
                    // The price stop marks the entry when it fires; every
                    // other caller must take the mark here.
                    let claimed = if reason.is_price_stop() {
                        state.protective.contains(entry_id)
                    } else {
                        state.protective.insert(entry_id.clone())
                    };
                    if claimed {
                        let market = entry.market.clone();
                        state.guard.record_forced_fill(entry_id, &market, now);
                        state.guard.record_cancel(entry_id, &market, now);
                        Some(entry)
                    } else {
                        // Another forced fill is already running.
                        None
                    }
                }
                _ => None,
            }
        };
        let Some(entry) = claimed else {
            if reason.is_price_stop() {
                let mut state = self.state.write();
                state.protective.remove(entry_id);
                state.watches.remove(entry_id);
            }
            return Ok(ForcedFillOutcome::Superseded);
        };

        let result = self.run_forced_fill(&entry, hedge_id, reason, snapshot_ask).await;

        {
            let mut state = self.state.write();
            state.protective.remove(entry_id);
            if reason.is_price_stop() {
                state.watches.remove(entry_id);
            }
        }
        self.stats.lock().current_action = ReorderAction::Idle;
        result
    }

    async fn run_forced_fill(
        self: &Arc<Self>,
        entry: &Order,
        hedge_id: &OrderId,
        reason: ForcedFillReason,
        snapshot_ask: Option<Pips>,
    ) -> OmsResult<ForcedFillOutcome> {
        let market = &entry.market;
        let now = self.now_ms();
        self.stats.lock().set_action(
            ReorderAction::ForceFilling,
            &entry.id,
            hedge_id,
            format!("forced fill ({reason})"),
            now,
        );

        if !self.forced_fill_limiter.allow(market, 1.0, now) {
            self.counters
                .forced_fill_budget_warnings
                .fetch_add(1, Ordering::Relaxed);
            Metrics::budget_skip(market.as_str(), "forced_fill_limiter");
            warn!(
                market = %market,
                entry = %entry.id,
                "forced fill rate limit exceeded, proceeding anyway"
            );
        }

        let token = self.cycle_token();
        let gate = self.gate();
        if let Err(e) = gate.cancel_order(&token, hedge_id.clone()).await {
            warn!(hedge = %hedge_id, error = %e, "hedge cancel before forced fill failed");
        }
        let settle_ms = if reason.is_price_stop() {
            self.config.price_stop.cancel_settle_ms
        } else {
            self.config.monitor.cancel_settle_ms
        };
        tokio::time::sleep(Duration::from_millis(settle_ms)).await;

        let previous = self.substrate.get_order(hedge_id).await?;
        if previous.is_filled() {
            info!(
                market = %market,
                entry = %entry.id,
                hedge = %hedge_id,
                "hedge filled during cancel"
            );
            self.handle_hedge_filled(&previous);
            return Ok(ForcedFillOutcome::AlreadyFilled);
        }
        if !previous.status.is_terminal() {
            return Err(OmsError::Executor(ExecutorError::Transient(format!(
                "hedge {hedge_id} still {} after cancel",
                previous.status
            ))));
        }

        let superseded = match self.state.read().pending.get(&entry.id) {
            Some(p) if &p.hedge_id == hedge_id => p.superseded_filled,
            _ => return Ok(ForcedFillOutcome::Superseded),
        };
        let remaining = entry
            .effective_size()
            .saturating_sub(superseded + previous.filled_size);
        if !remaining.is_positive() {
            self.finish_pairing(&entry.id, market, self.now_ms());
            return Ok(ForcedFillOutcome::NothingRemaining);
        }

        let ask = match snapshot_ask {
            Some(ask) => ask,
            None => self
                .substrate
                .top_of_book(market)
                .await?
                .ask_for(previous.token),
        };
        if !ask.is_positive() {
            return Err(OmsError::NoMarketData(format!(
                "no {} ask on {market}",
                previous.token
            )));
        }

        let request = OrderRequest::replacing(
            &previous,
            ask,
            remaining,
            TimeInForce::ImmediateOrCancel,
        )
        .linked_to(entry.id.clone())
        .protective();
        let order = gate.place_order(&token, request).await?;

        if !self.supersede_hedge(&entry.id, hedge_id, previous.filled_size, &order) {
            warn!(
                market = %market,
                entry = %entry.id,
                order = %order.id,
                filled = %order.filled_size,
                "pairing changed during forced fill"
            );
            self.absorb_orphan_fill(entry, &order);
            return Ok(ForcedFillOutcome::Superseded);
        }

        self.counters.total_forced_fills.fetch_add(1, Ordering::Relaxed);
        self.stats.lock().total_forced_fills += 1;
        Metrics::forced_fill(market.as_str(), reason.as_str());

        if order.is_filled() {
            info!(
                market = %market,
                entry = %entry.id,
                order = %order.id,
                reason = %reason,
                price = %ask,
                size = %remaining,
                "forced fill complete"
            );
            self.handle_hedge_filled(&order);
        } else {
            error!(
                market = %market,
                entry = %entry.id,
                order = %order.id,
                reason = %reason,
                filled = %order.filled_size,
                remaining = %remaining,
                "forced fill did not complete, exposure remains unhedged"
            );
            Metrics::unhedged(market.as_str(), "forced_fill");
        }
        Ok(ForcedFillOutcome::Submitted(order))
    }

    /// Credit the fill of a hedge order that lost its pairing slot.
    ///
    /// The fill counts toward the entry while the pairing is open and can
    /// complete it. Once the pairing is gone the fill is surplus exposure
    /// on the hedge side and is reported as such.
    pub(crate) fn absorb_orphan_fill(self: &Arc<Self>, entry: &Order, order: &Order) {
        if !order.filled_size.is_positive() {
            return;
        }
        let covered = {
            let mut state = self.state.write();
            state.pending.get_mut(&entry.id).map(|pending| {
                pending.superseded_filled = pending.superseded_filled + order.filled_size;
                pending.hedged_size() >= entry.effective_size()
            })
        };
        match covered {
            Some(true) => {
                info!(
                    market = %entry.market,
                    entry = %entry.id,
                    order = %order.id,
                    "orphan hedge fill completes pairing"
                );
                self.finish_pairing(&entry.id, &entry.market, self.now_ms());
            }
            Some(false) => info!(
                market = %entry.market,
                entry = %entry.id,
                order = %order.id,
                filled = %order.filled_size,
                "orphan hedge fill credited to pairing"
            ),
            None => {
                error!(
                    market = %entry.market,
                    entry = %entry.id,
                    order = %order.id,
                    filled = %order.filled_size,
                    "hedge filled after pairing closed, position over-hedged"
                );
                Metrics::unhedged(entry.market.as_str(), "over_hedge");
            }
        }
    }
}
