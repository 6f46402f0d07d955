//! Replay application.
//!
//! Wires the paper exchange to the coordinator:
//! - order updates from the exchange are forwarded to `on_order_update`
//! - `book` events update the exchange and become price ticks
//! - `decision` events go through `execute_order`
//! - `cycle` events roll the exchange and the coordinator to a new market
//! - `wait` events advance simulated time in small steps

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hedger_core::{
    Clock, ManualClock, Market, MarketSlug, Order, PriceChangedEvent, TokenType, TopOfBook,
};
use hedger_executor::{LoggingSettlement, PaperExchange};
use hedger_oms::{Oms, OpsMetrics, RiskManagementStatus};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::replay::{parse_line, ReplayEvent};

/// Summary printed at the end of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub market: MarketSlug,
    pub events: usize,
    pub decisions: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub cycles: usize,
    pub orders_placed: usize,
    pub settlements: usize,
    pub unhedged_risk: bool,
    pub risk: RiskManagementStatus,
    pub metrics: OpsMetrics,
}

#[derive(Debug)]
struct ReplayState {
    market: Market,
    last_book: Option<TopOfBook>,
    events: usize,
    decisions: usize,
    executed: usize,
    rejected: usize,
    failed: usize,
    cycles: usize,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    clock: Arc<ManualClock>,
    exchange: Arc<PaperExchange>,
    oms: Oms,
    settlement: Arc<LoggingSettlement>,
    state: Mutex<ReplayState>,
    forwarder: JoinHandle<()>,
}

impl Application {
    /// Create an application whose simulated clock starts at wall time.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let start_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        Self::with_start_time(config, start_ms)
    }

    pub fn with_start_time(config: AppConfig, start_ms: u64) -> AppResult<Self> {
        let clock = Arc::new(ManualClock::new(start_ms));
        let (exchange, updates) = PaperExchange::new(clock.clone());
        let exchange = Arc::new(exchange);
        let market = config.market.to_market();
        exchange.set_market(market.clone());

        let oms = Oms::with_clock(config.oms.clone(), exchange.clone(), clock.clone());
        let settlement = Arc::new(LoggingSettlement::new());
        oms.set_settlement(settlement.clone());

        let forwarder = tokio::spawn(forward_updates(updates, oms.clone()));

        Ok(Self {
            config,
            clock,
            exchange,
            oms,
            settlement,
            state: Mutex::new(ReplayState {
                market,
                last_book: None,
                events: 0,
                decisions: 0,
                executed: 0,
                rejected: 0,
                failed: 0,
                cycles: 0,
            }),
            forwarder,
        })
    }

    pub fn oms(&self) -> &Oms {
        &self.oms
    }

    pub fn exchange(&self) -> &Arc<PaperExchange> {
        &self.exchange
    }

    pub fn settlement(&self) -> &Arc<LoggingSettlement> {
        &self.settlement
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn current_market(&self) -> Market {
        self.state.lock().market.clone()
    }

    pub fn start(&self) {
        self.oms.start();
        info!(market = %self.state.lock().market.slug, "Application started");
    }

    /// Run every event of the replay file at `path`.
    pub async fn run_replay_file(&self, path: &Path) -> AppResult<()> {
        let file = tokio::fs::File::open(path).await?;
        info!(path = %path.display(), "Replaying");
        self.run_replay(BufReader::new(file)).await
    }

    /// Run every event read from `reader`, then let background tasks drain.
    ///
    /// A malformed line aborts the replay; a refused or failed decision
    /// does not.
    pub async fn run_replay<R>(&self, reader: R) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut line_no = 0;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if let Some(event) = parse_line(&line, line_no)? {
                self.apply(event).await;
            }
        }
        self.advance(self.config.replay.drain_ms).await;
        info!(lines = line_no, "Replay finished");
        Ok(())
    }

    /// Apply a single event.
    pub async fn apply(&self, event: ReplayEvent) {
        debug!(kind = event.kind(), "Replay event");
        self.state.lock().events += 1;
        match event {
            ReplayEvent::Book(top) => self.on_book(top),
            ReplayEvent::Decision { .. } => {
                if let Some(decision) = event.to_decision() {
                    self.on_decision(decision).await;
                }
            }
            ReplayEvent::Cycle(market) => self.on_cycle(market),
            ReplayEvent::Wait { ms } => self.advance(ms).await,
        }
    }

    fn on_book(&self, top: TopOfBook) {
        self.exchange.set_book(top);
        let (market, previous) = {
            let mut state = self.state.lock();
            (state.market.slug.clone(), state.last_book.replace(top))
        };
        let now = self.clock.now_ms();
        for token in [TokenType::Up, TokenType::Down] {
            let old_price = previous.map(|b| b.ask_for(token)).unwrap_or_default();
            let new_price = top.ask_for(token);
            if old_price == new_price {
                continue;
            }
            self.oms.on_price_changed(&PriceChangedEvent {
                market: market.clone(),
                token,
                old_price,
                new_price,
                timestamp_ms: now,
            });
        }
    }

    async fn on_decision(&self, decision: hedger_core::Decision) {
        let market = {
            let mut state = self.state.lock();
            state.decisions += 1;
            state.market.clone()
        };
        match self.oms.execute_order(&market, &decision).await {
            Ok(outcome) => {
                info!(
                    market = %market.slug,
                    entry = %outcome.entry.id,
                    hedge = ?outcome.hedge.as_ref().map(|h| h.id.clone()),
                    "Decision executed"
                );
                self.state.lock().executed += 1;
            }
            Err(e) if e.is_refusal() => {
                warn!(market = %market.slug, error = %e, "Decision refused");
                self.state.lock().rejected += 1;
            }
            Err(e) => {
                error!(market = %market.slug, error = %e, "Decision failed");
                self.state.lock().failed += 1;
            }
        }
    }

    fn on_cycle(&self, new: Market) {
        let old = {
            let mut state = self.state.lock();
            state.cycles += 1;
            state.last_book = None;
            std::mem::replace(&mut state.market, new.clone())
        };
        info!(old = %old.slug, new = %new.slug, "Market cycle");
        self.exchange.set_market(new.clone());
        self.oms.on_cycle(Some(&old), &new);
    }

    /// Advance simulated time by `ms`, yielding to background tasks at
    /// every step.
    async fn advance(&self, ms: u64) {
        let step = self.config.replay.step_ms.max(1);
        let mut remaining = ms;
        while remaining > 0 {
            let delta = remaining.min(step);
            self.clock.advance(delta);
            tokio::time::sleep(Duration::from_millis(delta)).await;
            remaining -= delta;
        }
    }

    /// Snapshot of the session so far.
    pub async fn report(&self) -> SessionReport {
        let market = self.state.lock().market.slug.clone();
        let risk = self.oms.risk_management_status().await;
        let unhedged_risk = self.oms.has_unhedged_risk(&market).await;
        let metrics = self.oms.ops_metrics(&market);
        let state = self.state.lock();
        SessionReport {
            market,
            events: state.events,
            decisions: state.decisions,
            executed: state.executed,
            rejected: state.rejected,
            failed: state.failed,
            cycles: state.cycles,
            orders_placed: self.exchange.orders_placed().len(),
            settlements: self.settlement.calls(),
            unhedged_risk,
            risk,
            metrics,
        }
    }

    /// Stop the coordinator and the update forwarder.
    pub fn shutdown(&self) {
        self.oms.stop();
        self.forwarder.abort();
        info!("Application stopped");
    }
}

async fn forward_updates(mut updates: mpsc::Receiver<Order>, oms: Oms) {
    while let Some(order) = updates.recv().await {
        debug!(order = %order.id, status = %order.status, "Order update");
        oms.on_order_update(&order);
    }
}
