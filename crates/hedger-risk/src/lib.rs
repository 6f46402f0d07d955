//! Per-entry budgets, rate limits, exposure ledger and hedge timing.
//!
//! Leaf components of the hedge coordinator. None of them talk to the
//! trading substrate; every time-dependent call takes `now_ms`.
//! - `TokenBucketLimiter`: per-market rate limit for reorders and forced fills
//! - `EntryGuard`: per-entry action budgets and per-market cooldowns
//! - `RiskRegistry`: filled entries whose hedge is not yet filled
//! - `HedgeTimingTracker`: EWMA of entry→hedge fill latency per market

pub mod entry_guard;
pub mod limiter;
pub mod registry;
pub mod timing;

pub use entry_guard::{BudgetViolation, Cooldown, EntryBudget, EntryGuard, EntryGuardConfig};
pub use limiter::TokenBucketLimiter;
pub use registry::{Exposure, RiskRegistry};
pub use timing::{HedgeTimingTracker, EWMA_ALPHA};
