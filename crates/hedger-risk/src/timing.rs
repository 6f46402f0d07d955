//! Entry→hedge fill latency tracking.
//!
//! Keeps the entry fill time of every open pair and folds each completed
//! pair's latency into a per-market exponentially weighted moving average.

use std::collections::HashMap;

use hedger_core::{MarketSlug, OrderId};

/// Weight of the newest sample.
pub const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct PendingFill {
    filled_at_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct MarketEwma {
    value_secs: f64,
    samples: u64,
}

#[derive(Debug, Default)]
pub struct HedgeTimingTracker {
    pending: HashMap<OrderId, (MarketSlug, PendingFill)>,
    ewma: HashMap<MarketSlug, MarketEwma>,
}

impl HedgeTimingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember when an entry filled. Repeated calls keep the first time.
    pub fn record_entry_filled(
        &mut self,
        entry: &OrderId,
        market: &MarketSlug,
        filled_at_ms: u64,
    ) -> bool {
        if self.pending.contains_key(entry) {
            return false;
        }
        self.pending
            .insert(entry.clone(), (market.clone(), PendingFill { filled_at_ms }));
        true
    }

    /// Consume the entry's pending record and fold the latency in.
    ///
    /// Returns the sample in seconds. No record, or a non-positive latency,
    /// leaves the average untouched.
    pub fn record_hedge_filled(
        &mut self,
        entry: &OrderId,
        hedge_filled_at_ms: u64,
    ) -> Option<f64> {
        let (market, pending) = self.pending.remove(entry)?;
        let sample_secs = (hedge_filled_at_ms as f64 - pending.filled_at_ms as f64) / 1000.0;
        if sample_secs <= 0.0 {
            return None;
        }

        let ewma = self.ewma.entry(market).or_default();
        ewma.value_secs = if ewma.samples == 0 {
            sample_secs
        } else {
            EWMA_ALPHA * sample_secs + (1.0 - EWMA_ALPHA) * ewma.value_secs
        };
        ewma.samples += 1;
        Some(sample_secs)
    }

    /// Current EWMA for `market`, 0 before the first sample.
    pub fn ewma_secs(&self, market: &MarketSlug) -> f64 {
        self.ewma.get(market).map_or(0.0, |e| e.value_secs)
    }

    pub fn sample_count(&self, market: &MarketSlug) -> u64 {
        self.ewma.get(market).map_or(0, |e| e.samples)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop pending entry fills (cycle rollover). Averages survive.
    pub fn reset_pending(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_value() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        t.record_entry_filled(&OrderId::from("e1"), &m, 1_000);
        assert_eq!(t.record_hedge_filled(&OrderId::from("e1"), 11_000), Some(10.0));
        assert!((t.ewma_secs(&m) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_blend() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        t.record_entry_filled(&OrderId::from("e1"), &m, 0);
        t.record_hedge_filled(&OrderId::from("e1"), 10_000);
        t.record_entry_filled(&OrderId::from("e2"), &m, 0);
        t.record_hedge_filled(&OrderId::from("e2"), 20_000);
        // 0.2 * 20 + 0.8 * 10
        assert!((t.ewma_secs(&m) - 12.0).abs() < 1e-9);
        assert_eq!(t.sample_count(&m), 2);
    }

    #[test]
    fn test_second_hedge_fill_is_noop() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        t.record_entry_filled(&OrderId::from("e1"), &m, 0);
        assert!(t.record_hedge_filled(&OrderId::from("e1"), 5_000).is_some());
        assert!(t.record_hedge_filled(&OrderId::from("e1"), 50_000).is_none());
        assert_eq!(t.sample_count(&m), 1);
        assert!((t.ewma_secs(&m) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_entry_fill_deduplicated() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        assert!(t.record_entry_filled(&OrderId::from("e1"), &m, 1_000));
        assert!(!t.record_entry_filled(&OrderId::from("e1"), &m, 9_000));
        assert_eq!(t.record_hedge_filled(&OrderId::from("e1"), 3_000), Some(2.0));
    }

    #[test]
    fn test_non_positive_sample_ignored() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        t.record_entry_filled(&OrderId::from("e1"), &m, 5_000);
        assert!(t.record_hedge_filled(&OrderId::from("e1"), 5_000).is_none());
        assert_eq!(t.sample_count(&m), 0);
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_reset_keeps_average() {
        let mut t = HedgeTimingTracker::new();
        let m = MarketSlug::from("m1");
        t.record_entry_filled(&OrderId::from("e1"), &m, 0);
        t.record_hedge_filled(&OrderId::from("e1"), 4_000);
        t.record_entry_filled(&OrderId::from("e2"), &m, 0);
        t.reset_pending();
        assert_eq!(t.pending_len(), 0);
        assert!((t.ewma_secs(&m) - 4.0).abs() < 1e-9);
    }
}
