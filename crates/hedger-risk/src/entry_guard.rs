//! Per-entry action budgets and per-market cooldowns.
//!
//! Every filled entry gets a budget of reorders, cancels and forced fills
//! plus a maximum age. Reorders are optional and are refused once the
//! budget is spent. Cancels and forced fills are safety actions and are
//! never refused, but overspending them still puts the market into
//! cooldown so that no new entries are opened there for a while.

use std::collections::HashMap;
use std::fmt;

use hedger_core::{MarketSlug, OrderId};
use hedger_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Configuration
// ============================================================================

/// Budget limits. A zero value in any field falls back to that field's
/// default; the checks cannot be switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryGuardConfig {
    /// Reprices allowed per entry. Default: 3.
    #[serde(default = "default_max_reorders")]
    pub max_reorders: u32,
    /// Hedge cancels allowed per entry before the market cools down. Default: 6.
    #[serde(default = "default_max_cancels")]
    pub max_cancels: u32,
    /// Forced fills allowed per entry before the market cools down. Default: 1.
    #[serde(default = "default_max_forced_fills")]
    pub max_forced_fills: u32,
    /// Age after which an unhedged entry stops repricing. Default: 120s.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Cooldown applied on a violation. Default: 30s.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_max_reorders() -> u32 {
    3
}

fn default_max_cancels() -> u32 {
    6
}

fn default_max_forced_fills() -> u32 {
    1
}

fn default_max_age_secs() -> u64 {
    120
}

fn default_cooldown_secs() -> u64 {
    30
}

impl EntryGuardConfig {
    /// Copy with every zero field replaced by its default.
    #[must_use]
    pub fn resolved(&self) -> Self {
        fn or_default<T: Default + PartialEq>(value: T, default: T) -> T {
            if value == T::default() {
                default
            } else {
                value
            }
        }
        Self {
            max_reorders: or_default(self.max_reorders, default_max_reorders()),
            max_cancels: or_default(self.max_cancels, default_max_cancels()),
            max_forced_fills: or_default(self.max_forced_fills, default_max_forced_fills()),
            max_age_secs: or_default(self.max_age_secs, default_max_age_secs()),
            cooldown_secs: or_default(self.cooldown_secs, default_cooldown_secs()),
        }
    }
}

impl Default for EntryGuardConfig {
    fn default() -> Self {
        Self {
            max_reorders: default_max_reorders(),
            max_cancels: default_max_cancels(),
            max_forced_fills: default_max_forced_fills(),
            max_age_secs: default_max_age_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

// ============================================================================
// Ledger types
// ============================================================================

/// Counters for one entry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryBudget {
    pub market: MarketSlug,
    pub started_at_ms: u64,
    pub reorders: u32,
    pub cancels: u32,
    pub forced_fills: u32,
}

/// Market-wide suspension of new entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cooldown {
    pub until_ms: u64,
    pub reason: String,
}

/// Why a budget check failed. `Display` yields the cooldown reason.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetViolation {
    AgeExceeded { age_ms: u64 },
    ReorderExceeded { count: u32 },
    CancelExceeded { count: u32 },
    ForcedFillExceeded { count: u32 },
}

impl BudgetViolation {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgeExceeded { .. } => "age",
            Self::ReorderExceeded { .. } => "reorder",
            Self::CancelExceeded { .. } => "cancel",
            Self::ForcedFillExceeded { .. } => "forced_fill",
        }
    }
}

impl fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgeExceeded { age_ms } => {
                write!(f, "entry_age_exceeded {:.0}s", *age_ms as f64 / 1000.0)
            }
            Self::ReorderExceeded { count } => write!(f, "entry_reorder_exceeded {count}"),
            Self::CancelExceeded { count } => write!(f, "entry_cancel_exceeded {count}"),
            Self::ForcedFillExceeded { count } => write!(f, "entry_fak_exceeded {count}"),
        }
    }
}

// ============================================================================
// EntryGuard
// ============================================================================

/// Budget and cooldown ledger.
///
/// Plain data: the owner serializes access (the coordinator keeps it inside
/// its state lock together with the other per-entry maps).
#[derive(Debug)]
pub struct EntryGuard {
    config: EntryGuardConfig,
    budgets: HashMap<OrderId, EntryBudget>,
    cooldowns: HashMap<MarketSlug, Cooldown>,
}

impl EntryGuard {
    /// Zero limits in `config` take their defaults.
    #[must_use]
    pub fn new(config: EntryGuardConfig) -> Self {
        Self {
            config: config.resolved(),
            budgets: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EntryGuardConfig {
        &self.config
    }

    /// Create the entry's budget if missing. `started_at_ms == 0` means now.
    pub fn ensure_budget(
        &mut self,
        entry: &OrderId,
        market: &MarketSlug,
        started_at_ms: u64,
        now_ms: u64,
    ) -> &mut EntryBudget {
        self.budgets
            .entry(entry.clone())
            .or_insert_with(|| EntryBudget {
                market: market.clone(),
                started_at_ms: if started_at_ms > 0 {
                    started_at_ms
                } else {
                    now_ms
                },
                reorders: 0,
                cancels: 0,
                forced_fills: 0,
            })
    }

    /// Spend one reorder.
    ///
    /// Fails once the entry is older than `max_age_secs` or has used
    /// `max_reorders`; either failure also cools the market down.
    pub fn consume_reorder_attempt(
        &mut self,
        entry: &OrderId,
        market: &MarketSlug,
        started_at_ms: u64,
        now_ms: u64,
    ) -> Result<u32, BudgetViolation> {
        let max_age_ms = self.config.max_age_secs * 1000;
        let max_reorders = self.config.max_reorders;
        let budget = self.ensure_budget(entry, market, started_at_ms, now_ms);

        let age_ms = now_ms.saturating_sub(budget.started_at_ms);
        let violation = if age_ms > max_age_ms {
            Some(BudgetViolation::AgeExceeded { age_ms })
        } else if budget.reorders >= max_reorders {
            Some(BudgetViolation::ReorderExceeded {
                count: budget.reorders,
            })
        } else {
            budget.reorders += 1;
            None
        };

        match violation {
            Some(v) => {
                self.raise_cooldown(market, &v, now_ms);
                Err(v)
            }
            None => Ok(self.budgets.get(entry).map_or(0, |b| b.reorders)),
        }
    }

    /// Count a hedge cancel. Never refuses.
    pub fn record_cancel(
        &mut self,
        entry: &OrderId,
        market: &MarketSlug,
        now_ms: u64,
    ) -> Option<BudgetViolation> {
        let max = self.config.max_cancels;
        let budget = self.ensure_budget(entry, market, 0, now_ms);
        budget.cancels += 1;
        let count = budget.cancels;
        if count > max {
            let v = BudgetViolation::CancelExceeded { count };
            self.raise_cooldown(market, &v, now_ms);
            return Some(v);
        }
        None
    }

    /// Count a forced fill. Never refuses.
    pub fn record_forced_fill(
        &mut self,
        entry: &OrderId,
        market: &MarketSlug,
        now_ms: u64,
    ) -> Option<BudgetViolation> {
        let max = self.config.max_forced_fills;
        let budget = self.ensure_budget(entry, market, 0, now_ms);
        budget.forced_fills += 1;
        let count = budget.forced_fills;
        if count > max {
            let v = BudgetViolation::ForcedFillExceeded { count };
            self.raise_cooldown(market, &v, now_ms);
            return Some(v);
        }
        None
    }

    /// True when an entry filled at `started_at_ms` is past `max_age_secs`.
    pub fn is_age_exceeded(&self, started_at_ms: u64, now_ms: u64) -> bool {
        let max_age_ms = self.config.max_age_secs * 1000;
        now_ms.saturating_sub(started_at_ms) > max_age_ms
    }

    /// Put `market` into cooldown for `duration_ms` (0 = configured default).
    ///
    /// An existing later expiry is kept; the reason always becomes the
    /// latest one.
    pub fn set_cooldown(
        &mut self,
        market: &MarketSlug,
        duration_ms: u64,
        reason: impl Into<String>,
        now_ms: u64,
    ) {
        let duration_ms = if duration_ms > 0 {
            duration_ms
        } else {
            self.config.cooldown_secs * 1000
        };
        let until_ms = now_ms + duration_ms;
        let reason = reason.into();
        self.cooldowns
            .entry(market.clone())
            .and_modify(|c| {
                c.until_ms = c.until_ms.max(until_ms);
                c.reason = reason.clone();
            })
            .or_insert(Cooldown { until_ms, reason });
    }

    /// Remaining cooldown for `market`. Expired entries are removed.
    pub fn market_cooldown(
        &mut self,
        market: &MarketSlug,
        now_ms: u64,
    ) -> Option<(u64, String)> {
        let current = self
            .cooldowns
            .get(market)
            .map(|c| (c.until_ms, c.reason.clone()));
        match current {
            Some((until_ms, reason)) if now_ms < until_ms => Some((until_ms - now_ms, reason)),
            Some(_) => {
                self.cooldowns.remove(market);
                None
            }
            None => None,
        }
    }

    pub fn budget(&self, entry: &OrderId) -> Option<&EntryBudget> {
        self.budgets.get(entry)
    }

    pub fn budget_count(&self) -> usize {
        self.budgets.len()
    }

    /// Drop an entry's budget once its exposure closes.
    pub fn clear_budget(&mut self, entry: &OrderId) {
        self.budgets.remove(entry);
    }

    /// Drop every budget and cooldown (market cycle rollover).
    pub fn reset(&mut self) {
        self.budgets.clear();
        self.cooldowns.clear();
    }

    fn raise_cooldown(&mut self, market: &MarketSlug, violation: &BudgetViolation, now_ms: u64) {
        let duration_ms = self.config.cooldown_secs * 1000;
        self.set_cooldown(market, duration_ms, violation.to_string(), now_ms);
        Metrics::cooldown_raised(market.as_str(), violation.kind());
        warn!(
            market = %market,
            reason = %violation,
            cooldown_secs = self.config.cooldown_secs,
            "entry budget exceeded, market cooldown raised"
        );
    }
}
