//! Coordinator configuration.
//!
//! Every section is optional in the TOML file; missing fields take the
//! defaults below.

use hedger_core::ExecutionMode;
use hedger_executor::GateConfig;
use hedger_risk::EntryGuardConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmsConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub hedge: HedgeConfig,
    #[serde(default)]
    pub entry_guard: EntryGuardConfig,
    #[serde(default)]
    pub price_stop: PriceStopConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub queue: GateConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    /// Interval of the periodic ops metrics log (seconds). 0 disables it.
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
}

fn default_metrics_log_interval_secs() -> u64 {
    30
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            hedge: HedgeConfig::default(),
            entry_guard: EntryGuardConfig::default(),
            price_stop: PriceStopConfig::default(),
            limits: LimitsConfig::default(),
            queue: GateConfig::default(),
            monitor: MonitorConfig::default(),
            settlement: SettlementConfig::default(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Prefix of multi-leg request names.
    #[serde(default = "default_strategy_id")]
    pub strategy_id: String,
    /// Entry fill poll interval in sequential mode (ms).
    #[serde(default = "default_sequential_check_interval_ms")]
    pub sequential_check_interval_ms: u64,
    /// Maximum wait for an entry fill in sequential mode (ms).
    #[serde(default = "default_sequential_max_wait_ms")]
    pub sequential_max_wait_ms: u64,
    /// Minimum entry notional in dollars.
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: Decimal,
}

fn default_strategy_id() -> String {
    "hedger".to_string()
}

fn default_sequential_check_interval_ms() -> u64 {
    20
}

fn default_sequential_max_wait_ms() -> u64 {
    2000
}

fn default_min_order_notional() -> Decimal {
    Decimal::new(101, 2)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            strategy_id: default_strategy_id(),
            sequential_check_interval_ms: default_sequential_check_interval_ms(),
            sequential_max_wait_ms: default_sequential_max_wait_ms(),
            min_order_notional: default_min_order_notional(),
        }
    }
}

// ============================================================================
// Hedge pricing and timeouts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Cents kept below the break-even hedge price.
    #[serde(default = "default_offset_cents")]
    pub offset_cents: i64,
    /// Whether a hedge may lock in a small loss to get filled.
    #[serde(default)]
    pub allow_negative_profit: bool,
    #[serde(default = "default_max_negative_profit_cents")]
    pub max_negative_profit_cents: i64,
    /// Age of a resting hedge before it is repriced (seconds).
    #[serde(default = "default_reorder_timeout_secs")]
    pub reorder_timeout_secs: u64,
    /// Age of a resting hedge before it is force-filled (seconds). 0 disables.
    #[serde(default)]
    pub forced_fill_timeout_secs: u64,
    /// Countdown horizon shown in the risk status (seconds).
    #[serde(default = "default_aggressive_timeout_secs")]
    pub aggressive_timeout_secs: u64,
    /// Hedges smaller than this are sent immediate-or-cancel.
    #[serde(default = "default_min_resting_size")]
    pub min_resting_size: Decimal,
}

fn default_offset_cents() -> i64 {
    1
}

fn default_max_negative_profit_cents() -> i64 {
    5
}

fn default_reorder_timeout_secs() -> u64 {
    15
}

fn default_aggressive_timeout_secs() -> u64 {
    60
}

fn default_min_resting_size() -> Decimal {
    Decimal::from(5)
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            offset_cents: default_offset_cents(),
            allow_negative_profit: false,
            max_negative_profit_cents: default_max_negative_profit_cents(),
            reorder_timeout_secs: default_reorder_timeout_secs(),
            forced_fill_timeout_secs: 0,
            aggressive_timeout_secs: default_aggressive_timeout_secs(),
            min_resting_size: default_min_resting_size(),
        }
    }
}

// ============================================================================
// Price stop
// ============================================================================

/// Locked-profit thresholds, in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStopConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_soft_loss_cents")]
    pub soft_loss_cents: i64,
    #[serde(default = "default_hard_loss_cents")]
    pub hard_loss_cents: i64,
    /// 0 disables take-profit.
    #[serde(default)]
    pub take_profit_cents: i64,
    /// Minimum spacing between evaluations of one watch (ms). 0 = every tick.
    #[serde(default)]
    pub min_eval_interval_ms: u64,
    #[serde(default = "default_confirm_ticks")]
    pub confirm_ticks: u32,
    #[serde(default = "default_confirm_ticks")]
    pub take_profit_confirm_ticks: u32,
    /// Book snapshots older than this are not acted on (ms).
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Pause after canceling the hedge before re-reading it (ms).
    #[serde(default = "default_price_stop_cancel_settle_ms")]
    pub cancel_settle_ms: u64,
}

fn default_soft_loss_cents() -> i64 {
    -5
}

fn default_hard_loss_cents() -> i64 {
    -10
}

fn default_confirm_ticks() -> u32 {
    2
}

fn default_stale_after_ms() -> u64 {
    3000
}

fn default_price_stop_cancel_settle_ms() -> u64 {
    200
}

impl Default for PriceStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            soft_loss_cents: default_soft_loss_cents(),
            hard_loss_cents: default_hard_loss_cents(),
            take_profit_cents: 0,
            min_eval_interval_ms: 0,
            confirm_ticks: default_confirm_ticks(),
            take_profit_confirm_ticks: default_confirm_ticks(),
            stale_after_ms: default_stale_after_ms(),
            cancel_settle_ms: default_price_stop_cancel_settle_ms(),
        }
    }
}

/// Normalized price-stop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceStopParams {
    pub soft_loss_cents: i64,
    pub hard_loss_cents: i64,
    pub take_profit_cents: i64,
    pub min_eval_interval_ms: u64,
    pub confirm_ticks: u32,
    pub take_profit_confirm_ticks: u32,
}

impl PriceStopConfig {
    /// Soft must be less extreme than hard; swapped if configured the
    /// other way round.
    pub fn params(&self) -> PriceStopParams {
        let (soft, hard) = if self.soft_loss_cents < self.hard_loss_cents {
            (self.hard_loss_cents, self.soft_loss_cents)
        } else {
            (self.soft_loss_cents, self.hard_loss_cents)
        };
        let interval = if self.min_eval_interval_ms > 0 {
            self.min_eval_interval_ms.clamp(20, 2000)
        } else {
            0
        };
        PriceStopParams {
            soft_loss_cents: soft,
            hard_loss_cents: hard,
            take_profit_cents: self.take_profit_cents,
            min_eval_interval_ms: interval,
            confirm_ticks: self.confirm_ticks.clamp(1, 10),
            take_profit_confirm_ticks: self.take_profit_confirm_ticks.clamp(1, 10),
        }
    }
}

// ============================================================================
// Rate limits, monitor, settlement
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_reorder_capacity")]
    pub reorder_capacity: u32,
    #[serde(default = "default_reorder_refill_per_minute")]
    pub reorder_refill_per_minute: f64,
    #[serde(default = "default_forced_fill_capacity")]
    pub forced_fill_capacity: u32,
    #[serde(default = "default_forced_fill_refill_per_minute")]
    pub forced_fill_refill_per_minute: f64,
}

fn default_reorder_capacity() -> u32 {
    30
}

fn default_reorder_refill_per_minute() -> f64 {
    30.0
}

fn default_forced_fill_capacity() -> u32 {
    10
}

fn default_forced_fill_refill_per_minute() -> f64 {
    10.0
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            reorder_capacity: default_reorder_capacity(),
            reorder_refill_per_minute: default_reorder_refill_per_minute(),
            forced_fill_capacity: default_forced_fill_capacity(),
            forced_fill_refill_per_minute: default_forced_fill_refill_per_minute(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Reprice attempts before the monitor freezes.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_budget_retry_ms")]
    pub budget_retry_ms: u64,
    #[serde(default = "default_limiter_retry_ms")]
    pub limiter_retry_ms: u64,
    #[serde(default = "default_failure_retry_ms")]
    pub failure_retry_ms: u64,
    #[serde(default = "default_monitor_cancel_settle_ms")]
    pub cancel_settle_ms: u64,
    /// Delay before a sequential-mode entry fill without hedge is hedged.
    #[serde(default = "default_fallback_hedge_delay_ms")]
    pub fallback_hedge_delay_ms: u64,
    /// Delay before monitors are resumed on start.
    #[serde(default = "default_resume_delay_ms")]
    pub resume_delay_ms: u64,
    /// Forced fill attempts before an exposure is reported unhedged.
    #[serde(default = "default_max_forced_fill_retries")]
    pub max_forced_fill_retries: u32,
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_budget_retry_ms() -> u64 {
    5000
}

fn default_limiter_retry_ms() -> u64 {
    3000
}

fn default_failure_retry_ms() -> u64 {
    5000
}

fn default_monitor_cancel_settle_ms() -> u64 {
    500
}

fn default_fallback_hedge_delay_ms() -> u64 {
    100
}

fn default_resume_delay_ms() -> u64 {
    2000
}

fn default_max_forced_fill_retries() -> u32 {
    3
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            max_attempts: default_max_attempts(),
            budget_retry_ms: default_budget_retry_ms(),
            limiter_retry_ms: default_limiter_retry_ms(),
            failure_retry_ms: default_failure_retry_ms(),
            cancel_settle_ms: default_monitor_cancel_settle_ms(),
            fallback_hedge_delay_ms: default_fallback_hedge_delay_ms(),
            resume_delay_ms: default_resume_delay_ms(),
            max_forced_fill_retries: default_max_forced_fill_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Wait after a hedge fill before merging (seconds).
    #[serde(default = "default_settlement_delay_secs")]
    pub delay_secs: u64,
    /// Pause between position reconciliation and the merge call (ms).
    #[serde(default = "default_reconcile_pause_ms")]
    pub reconcile_pause_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_settlement_delay_secs() -> u64 {
    15
}

fn default_reconcile_pause_ms() -> u64 {
    500
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_secs: default_settlement_delay_secs(),
            reconcile_pause_ms: default_reconcile_pause_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = OmsConfig::default();
        assert_eq!(config.execution.mode, ExecutionMode::Sequential);
        assert_eq!(config.execution.min_order_notional, dec!(1.01));
        assert_eq!(config.hedge.reorder_timeout_secs, 15);
        assert_eq!(config.hedge.min_resting_size, dec!(5));
        assert_eq!(config.entry_guard.max_reorders, 3);
        assert!(!config.price_stop.enabled);
        assert_eq!(config.queue.capacity, 256);
        assert_eq!(config.monitor.max_attempts, 10);
        assert_eq!(config.settlement.delay_secs, 15);
        assert_eq!(config.metrics_log_interval_secs, 30);
    }

    #[test]
    fn test_partial_toml() {
        let config: OmsConfig = toml::from_str(
            r#"
            [execution]
            mode = "parallel"

            [hedge]
            allow_negative_profit = true
            max_negative_profit_cents = 3

            [price_stop]
            enabled = true
            hard_loss_cents = -12
            "#,
        )
        .unwrap();
        assert_eq!(config.execution.mode, ExecutionMode::Parallel);
        assert_eq!(config.execution.strategy_id, "hedger");
        assert!(config.hedge.allow_negative_profit);
        assert_eq!(config.hedge.max_negative_profit_cents, 3);
        assert_eq!(config.hedge.offset_cents, 1);
        assert!(config.price_stop.enabled);
        assert_eq!(config.price_stop.hard_loss_cents, -12);
        assert_eq!(config.price_stop.soft_loss_cents, -5);
    }

    #[test]
    fn test_price_stop_params_normalized() {
        let config = PriceStopConfig {
            soft_loss_cents: -12,
            hard_loss_cents: -4,
            min_eval_interval_ms: 5,
            confirm_ticks: 0,
            take_profit_confirm_ticks: 50,
            ..Default::default()
        };
        let params = config.params();
        assert_eq!(params.soft_loss_cents, -4);
        assert_eq!(params.hard_loss_cents, -12);
        assert_eq!(params.min_eval_interval_ms, 20);
        assert_eq!(params.confirm_ticks, 1);
        assert_eq!(params.take_profit_confirm_ticks, 10);

        let unthrottled = PriceStopConfig::default().params();
        assert_eq!(unthrottled.min_eval_interval_ms, 0);
    }
}
