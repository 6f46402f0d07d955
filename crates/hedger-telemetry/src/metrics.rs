//! Prometheus metrics for the hedge coordinator.
//!
//! Covers:
//! - Execution gate backlog and substrate errors
//! - Pending hedges, open exposures and entry→hedge latency
//! - Reprices, forced fills and price-stop triggers
//! - Budget skips and market cooldowns
//! - Settlement triggers
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    register_int_gauge_vec, CounterVec, GaugeVec, HistogramVec, IntGauge, IntGaugeVec,
};

/// Jobs waiting in the execution gate backlog.
pub static GATE_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "hedger_gate_queue_depth",
        "Jobs waiting in the serialized execution gate"
    )
    .unwrap()
});

/// Errors returned through the execution gate.
/// Labels: op (place/cancel/multi_leg), kind (transient/refused/closed/cancelled/other)
pub static GATE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_gate_errors_total",
        "Errors returned by order-mutating calls through the gate",
        &["op", "kind"]
    )
    .unwrap()
});

/// Entries with a tracked hedge that is not yet filled.
pub static PENDING_HEDGES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "hedger_pending_hedges",
        "Entries waiting for their hedge to fill",
        &["market"]
    )
    .unwrap()
});

/// Filled entries without a confirmed hedge.
pub static EXPOSURES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "hedger_exposures",
        "Filled entries awaiting a confirmed hedge fill",
        &["market"]
    )
    .unwrap()
});

/// Entry fill to hedge fill latency in seconds.
pub static HEDGE_LATENCY_SECS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hedger_hedge_latency_seconds",
        "Time from entry fill to hedge fill",
        &["market"],
        vec![0.5, 1.0, 2.0, 5.0, 8.0, 15.0, 25.0, 45.0, 90.0, 180.0]
    )
    .unwrap()
});

/// Smoothed entry→hedge latency used by adaptive pricing.
pub static HEDGE_EWMA_SECS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "hedger_hedge_ewma_seconds",
        "EWMA of entry to hedge fill latency",
        &["market"]
    )
    .unwrap()
});

/// Hedge reprice attempts by outcome.
pub static REPRICE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_reprice_total",
        "Hedge reprice attempts",
        &["market", "outcome"]
    )
    .unwrap()
});

/// Forced (immediate-or-cancel) hedge fills by reason.
pub static FORCED_FILL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_forced_fill_total",
        "Forced hedge fills submitted",
        &["market", "reason"]
    )
    .unwrap()
});

/// Price-stop triggers by kind (hard/soft/take_profit).
pub static PRICE_STOP_TRIGGER_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_price_stop_trigger_total",
        "Price stop triggers",
        &["market", "kind"]
    )
    .unwrap()
});

/// Price-stop evaluations skipped because the book snapshot was stale.
pub static STALE_SNAPSHOT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_stale_snapshot_total",
        "Price stop evaluations skipped on stale book snapshots",
        &["market"]
    )
    .unwrap()
});

/// Recovery actions held back by a budget or rate limit.
/// Labels: kind (reorder_budget/reorder_rate/forced_fill_rate)
pub static BUDGET_SKIP_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_budget_skip_total",
        "Recovery actions skipped or flagged by budgets and rate limits",
        &["market", "kind"]
    )
    .unwrap()
});

/// Market cooldowns raised by entry budget violations.
pub static COOLDOWN_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_cooldown_total",
        "Market cooldowns raised",
        &["market", "violation"]
    )
    .unwrap()
});

/// Exposures left without a working hedge after recovery failed.
pub static UNHEDGED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_unhedged_total",
        "Pairing failures leaving an exposure unhedged",
        &["market", "stage"]
    )
    .unwrap()
});

/// Settlement merges by outcome.
pub static SETTLEMENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hedger_settlement_total",
        "Settlement merge attempts",
        &["market", "outcome"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    // =========================================================================
    // Execution gate
    // =========================================================================

    pub fn gate_queue_depth(depth: usize) {
        GATE_QUEUE_DEPTH.set(depth as i64);
    }

    pub fn gate_error(op: &str, kind: &str) {
        GATE_ERRORS_TOTAL.with_label_values(&[op, kind]).inc();
    }

    // =========================================================================
    // Pairing state
    // =========================================================================

    /// Refresh the per-market pairing gauges.
    pub fn pairing_state(market: &str, pending_hedges: usize, exposures: usize) {
        PENDING_HEDGES
            .with_label_values(&[market])
            .set(pending_hedges as i64);
        EXPOSURES.with_label_values(&[market]).set(exposures as i64);
    }

    /// Record a hedge fill latency sample and the resulting EWMA.
    pub fn hedge_latency(market: &str, sample_secs: f64, ewma_secs: f64) {
        HEDGE_LATENCY_SECS
            .with_label_values(&[market])
            .observe(sample_secs);
        HEDGE_EWMA_SECS.with_label_values(&[market]).set(ewma_secs);
    }

    pub fn hedge_ewma(market: &str, ewma_secs: f64) {
        HEDGE_EWMA_SECS.with_label_values(&[market]).set(ewma_secs);
    }

    // =========================================================================
    // Recovery actions
    // =========================================================================

    pub fn reprice(market: &str, outcome: &str) {
        REPRICE_TOTAL.with_label_values(&[market, outcome]).inc();
    }

    pub fn forced_fill(market: &str, reason: &str) {
        FORCED_FILL_TOTAL.with_label_values(&[market, reason]).inc();
    }

    pub fn price_stop_triggered(market: &str, kind: &str) {
        PRICE_STOP_TRIGGER_TOTAL
            .with_label_values(&[market, kind])
            .inc();
    }

    pub fn stale_snapshot(market: &str) {
        STALE_SNAPSHOT_TOTAL.with_label_values(&[market]).inc();
    }

    pub fn budget_skip(market: &str, kind: &str) {
        BUDGET_SKIP_TOTAL.with_label_values(&[market, kind]).inc();
    }

    pub fn cooldown_raised(market: &str, violation: &str) {
        COOLDOWN_TOTAL.with_label_values(&[market, violation]).inc();
    }

    pub fn unhedged(market: &str, stage: &str) {
        UNHEDGED_TOTAL.with_label_values(&[market, stage]).inc();
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    pub fn settlement(market: &str, outcome: &str) {
        SETTLEMENT_TOTAL.with_label_values(&[market, outcome]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_gauges() {
        Metrics::pairing_state("test-market-gauges", 2, 3);
        assert_eq!(
            PENDING_HEDGES
                .with_label_values(&["test-market-gauges"])
                .get(),
            2
        );
        assert_eq!(
            EXPOSURES.with_label_values(&["test-market-gauges"]).get(),
            3
        );
    }

    #[test]
    fn test_counters_increment() {
        let before = FORCED_FILL_TOTAL
            .with_label_values(&["test-market-ff", "hard_stop"])
            .get();
        Metrics::forced_fill("test-market-ff", "hard_stop");
        let after = FORCED_FILL_TOTAL
            .with_label_values(&["test-market-ff", "hard_stop"])
            .get();
        assert_eq!(after - before, 1.0);
    }
}
