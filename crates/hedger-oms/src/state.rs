//! Coordinator state shared by the executor, monitors and price stops.
//!
//! Everything lives in one [`OmsState`] behind a single `RwLock` owned by
//! the coordinator. Critical sections only look up and mutate maps; no
//! substrate call is made while the lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hedger_core::{Market, MarketSlug, Order, OrderId, Pips, Size};
use hedger_risk::{EntryGuard, EntryGuardConfig, HedgeTimingTracker, RiskRegistry};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::price_stop::PriceStopWatch;

/// The one hedge currently tracked for a filled entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingHedge {
    pub hedge_id: OrderId,
    pub market: MarketSlug,
    /// Price of the first hedge placed for the entry.
    pub original_price: Pips,
    /// Filled size of hedges that were replaced.
    pub superseded_filled: Size,
    /// Last reported filled size of the live hedge.
    pub live_filled: Size,
}

impl PendingHedge {
    pub fn new(hedge: &Order) -> Self {
        Self {
            hedge_id: hedge.id.clone(),
            market: hedge.market.clone(),
            original_price: hedge.price,
            superseded_filled: Size::ZERO,
            live_filled: hedge.filled_size,
        }
    }

    pub fn hedged_size(&self) -> Size {
        self.superseded_filled + self.live_filled
    }
}

/// Control handle of a running reorder monitor.
#[derive(Debug, Clone)]
pub(crate) struct MonitorHandle {
    pub id: u64,
    pub hedge_id: OrderId,
    pub market: MarketSlug,
    pub wake: Arc<Notify>,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct OmsState {
    /// Entry id → live hedge.
    pub pending: HashMap<OrderId, PendingHedge>,
    /// Filled entries with an open pairing.
    pub entries: HashMap<OrderId, Order>,
    /// Entries whose pairing finished this cycle.
    pub completed: HashSet<OrderId>,
    pub watches: HashMap<OrderId, PriceStopWatch>,
    pub guard: EntryGuard,
    pub registry: RiskRegistry,
    pub timing: HedgeTimingTracker,
    /// Entries whose placement is still driven by the order executor.
    pub claimed: HashSet<OrderId>,
    /// Entries that already went through the fallback hedge.
    pub fallback_done: HashSet<OrderId>,
    /// Entries under a forced fill.
    pub protective: HashSet<OrderId>,
    pub monitors: HashMap<OrderId, MonitorHandle>,
    pub markets: HashMap<MarketSlug, Market>,
}

impl OmsState {
    pub fn new(guard_config: EntryGuardConfig) -> Self {
        Self {
            pending: HashMap::new(),
            entries: HashMap::new(),
            completed: HashSet::new(),
            watches: HashMap::new(),
            guard: EntryGuard::new(guard_config),
            registry: RiskRegistry::new(),
            timing: HedgeTimingTracker::new(),
            claimed: HashSet::new(),
            fallback_done: HashSet::new(),
            protective: HashSet::new(),
            monitors: HashMap::new(),
            markets: HashMap::new(),
        }
    }

    /// Entry whose pending record points at `hedge_id`.
    ///
    /// `linked` (the hedge's linked-entry field) is checked first.
    pub fn entry_for_hedge(
        &self,
        hedge_id: &OrderId,
        linked: Option<&OrderId>,
    ) -> Option<OrderId> {
        if let Some(entry) = linked {
            if self.pending.get(entry).is_some_and(|p| &p.hedge_id == hedge_id) {
                return Some(entry.clone());
            }
        }
        self.pending
            .iter()
            .find(|(_, p)| &p.hedge_id == hedge_id)
            .map(|(entry, _)| entry.clone())
    }

    /// Entry size not yet covered by hedge fills.
    pub fn remaining_size(&self, entry_id: &OrderId) -> Option<Size> {
        let pending = self.pending.get(entry_id)?;
        let entry = self.entries.get(entry_id)?;
        Some(entry.effective_size().saturating_sub(pending.hedged_size()))
    }

    pub fn pending_for_market(&self, market: &MarketSlug) -> usize {
        self.pending.values().filter(|p| &p.market == market).count()
    }

    /// Drop every per-entry and per-market record of the finished cycle.
    ///
    /// Monitors are cancelled here; averages in the timing tracker and the
    /// known market descriptions survive.
    pub fn reset_cycle(&mut self) {
        for handle in self.monitors.values() {
            handle.cancel.cancel();
        }
        self.monitors.clear();
        self.pending.clear();
        self.entries.clear();
        self.completed.clear();
        self.watches.clear();
        self.guard.reset();
        self.registry.clear();
        self.timing.reset_pending();
        self.claimed.clear();
        self.fallback_done.clear();
        self.protective.clear();
    }
}
