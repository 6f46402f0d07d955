//! Read-only views for dashboards and operators.

use hedger_core::{MarketSlug, OrderId, OrderStatus, Size, TokenType};
use serde::Serialize;

/// After this long without a new action the reprice tracker shows idle.
pub const ACTION_DISPLAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderAction {
    #[default]
    Idle,
    Canceling,
    Reordering,
    ForceFilling,
}

/// The last successful reprice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepriceDetail {
    pub market: MarketSlug,
    pub entry_order_id: OrderId,
    pub old_hedge_id: OrderId,
    pub new_hedge_id: OrderId,
    pub old_price_cents: i64,
    pub new_price_cents: i64,
    pub change_cents: i64,
    /// How the new price was chosen.
    pub strategy: String,
    pub entry_cost_cents: i64,
    pub market_ask_cents: i64,
    pub ideal_cents: i64,
    pub total_cost_cents: i64,
    pub profit_cents: i64,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReorderStats {
    pub current_action: ReorderAction,
    pub entry_order_id: Option<OrderId>,
    pub hedge_order_id: Option<OrderId>,
    pub action_at_ms: u64,
    pub description: String,
    pub total_reorders: u64,
    pub total_forced_fills: u64,
    pub last_reprice: Option<RepriceDetail>,
}

impl ReorderStats {
    pub(crate) fn set_action(
        &mut self,
        action: ReorderAction,
        entry: &OrderId,
        hedge: &OrderId,
        description: impl Into<String>,
        now_ms: u64,
    ) {
        self.current_action = action;
        self.entry_order_id = Some(entry.clone());
        self.hedge_order_id = Some(hedge.clone());
        self.description = description.into();
        self.action_at_ms = now_ms;
    }

    /// Copy for display: a stale action reads as idle.
    pub fn view(&self, now_ms: u64) -> Self {
        let mut view = self.clone();
        if view.current_action != ReorderAction::Idle
            && now_ms.saturating_sub(view.action_at_ms) > ACTION_DISPLAY_MS
        {
            view.current_action = ReorderAction::Idle;
        }
        view
    }
}

/// One unhedged exposure as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskExposureInfo {
    pub market: MarketSlug,
    pub entry_order_id: OrderId,
    pub entry_token: TokenType,
    pub entry_size: Size,
    pub entry_price_cents: i64,
    pub hedge_order_id: Option<OrderId>,
    pub hedge_status: OrderStatus,
    pub exposure_secs: u64,
    /// Seconds left of the aggressive-fill horizon.
    pub countdown_secs: u64,
    pub max_loss_cents: i64,
    pub original_hedge_price_cents: Option<i64>,
    pub new_hedge_price_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskManagementStatus {
    pub exposures: Vec<RiskExposureInfo>,
    pub reorder: ReorderStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsMetrics {
    pub market: MarketSlug,
    pub queue_len: usize,
    pub pending_hedges: usize,
    pub exposures: usize,
    pub active_monitors: usize,
    pub active_watches: usize,
    pub hedge_ewma_secs: f64,
    pub hedge_ewma_samples: u64,
    pub reorder_budget_skips: u64,
    pub forced_fill_budget_warnings: u64,
    pub cooldown_remaining_secs: u64,
    pub cooldown_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Monitoring,
    Triggered,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceStopWatchInfo {
    pub entry_order_id: OrderId,
    pub hedge_order_id: Option<OrderId>,
    pub entry_token: TokenType,
    pub entry_price_cents: i64,
    pub remaining_size: Size,
    pub profit_now_cents: Option<i64>,
    pub soft_hits: u32,
    pub take_profit_hits: u32,
    pub last_eval_ms: u64,
    pub status: WatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceStopWatchesStatus {
    pub market: MarketSlug,
    pub enabled: bool,
    pub soft_loss_cents: i64,
    pub hard_loss_cents: i64,
    pub take_profit_cents: i64,
    pub confirm_ticks: u32,
    pub take_profit_confirm_ticks: u32,
    pub watches: Vec<PriceStopWatchInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_reverts_to_idle() {
        let mut stats = ReorderStats::default();
        stats.set_action(
            ReorderAction::Reordering,
            &OrderId::from("e1"),
            &OrderId::from("h1"),
            "58c -> 57c",
            10_000,
        );
        assert_eq!(stats.view(14_000).current_action, ReorderAction::Reordering);
        assert_eq!(stats.view(15_001).current_action, ReorderAction::Idle);
        // Stored state is untouched.
        assert_eq!(stats.current_action, ReorderAction::Reordering);
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&ReorderAction::ForceFilling).unwrap();
        assert_eq!(json, "\"force_filling\"");
    }
}
