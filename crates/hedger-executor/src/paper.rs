//! In-memory trading substrate.
//!
//! `PaperExchange` matches buy orders against a single top-of-book that the
//! caller feeds in. Marketable orders fill at the ask, resting orders fill
//! at their limit once a later book crosses them. Every status change is
//! pushed to the update channel returned by [`PaperExchange::new`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use hedger_core::{
    BookSnapshot, Clock, Market, MarketSlug, MultiLegRequest, Order, OrderId, OrderRequest,
    OrderStatus, Pips, Position, Size, TokenType, TopOfBook,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::substrate::{BoxFuture, Settlement, TradingSubstrate};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

pub struct PaperExchange {
    clock: Arc<dyn Clock>,
    market: RwLock<Option<Market>>,
    book: RwLock<Option<BookSnapshot>>,
    orders: DashMap<OrderId, Order>,
    history: Mutex<Vec<OrderId>>,
    positions: Mutex<HashMap<(MarketSlug, TokenType), Position>>,
    updates_tx: mpsc::Sender<Order>,
    refuse: RwLock<Option<String>>,
    fail_next: AtomicU32,
}

impl PaperExchange {
    /// Create an exchange and the receiver of its order updates.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<Order>) {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let exchange = Self {
            clock,
            market: RwLock::new(None),
            book: RwLock::new(None),
            orders: DashMap::new(),
            history: Mutex::new(Vec::new()),
            positions: Mutex::new(HashMap::new()),
            updates_tx,
            refuse: RwLock::new(None),
            fail_next: AtomicU32::new(0),
        };
        (exchange, updates_rx)
    }

    /// Switch the active market. The previous book is dropped.
    pub fn set_market(&self, market: Market) {
        info!(market = %market.slug, "paper market set");
        *self.market.write() = Some(market);
        *self.book.write() = None;
    }

    /// Replace the book, stamped with the clock's current time.
    pub fn set_book(&self, top: TopOfBook) {
        let now = self.clock.now_ms();
        self.set_book_at(top, now);
    }

    /// Replace the book with an explicit timestamp and fill resting orders
    /// that the new asks cross.
    pub fn set_book_at(&self, top: TopOfBook, updated_at_ms: u64) {
        *self.book.write() = Some(BookSnapshot { top, updated_at_ms });

        let now = self.clock.now_ms();
        let mut crossed = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status.is_terminal() || order.tif.is_immediate() {
                continue;
            }
            let ask = top.ask_for(order.token);
            if ask.is_positive() && ask <= order.price {
                let qty = order.remaining_size();
                let price = order.price;
                apply_fill(order, qty, price, now);
                crossed.push((order.clone(), qty, price));
            }
        }

        for (order, qty, price) in crossed {
            debug!(order = %order.id, price = %price, size = %qty, "resting order crossed");
            self.add_position(&order, qty, price);
            self.emit(order);
        }
    }

    /// Refuse every placement with `reason` until called with `None`.
    pub fn refuse_orders(&self, reason: Option<String>) {
        *self.refuse.write() = reason;
    }

    /// Fail the next `n` placements with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Fill an open order at its limit price. `None` fills the remainder.
    pub fn fill_order(&self, order_id: &OrderId, qty: Option<Size>) -> ExecutorResult<Order> {
        let now = self.clock.now_ms();
        let (order, qty) = {
            let mut entry = self
                .orders
                .get_mut(order_id)
                .ok_or_else(|| ExecutorError::NotFound(order_id.clone()))?;
            let order = entry.value_mut();
            if order.status.is_terminal() {
                return Err(ExecutorError::InvalidOrder(format!(
                    "{order_id} is already {}",
                    order.status
                )));
            }
            let remaining = order.remaining_size();
            let qty = qty.map_or(remaining, |q| q.min(remaining));
            let price = order.price;
            apply_fill(order, qty, price, now);
            (order.clone(), qty)
        };
        self.add_position(&order, qty, order.price);
        self.emit(order.clone());
        Ok(order)
    }

    /// Every order in placement order.
    pub fn orders_placed(&self) -> Vec<Order> {
        self.history
            .lock()
            .iter()
            .filter_map(|id| self.orders.get(id).map(|o| o.clone()))
            .collect()
    }

    fn place(&self, request: OrderRequest) -> ExecutorResult<Order> {
        if self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExecutorError::Transient("simulated timeout".to_string()));
        }
        if let Some(reason) = self.refuse.read().clone() {
            return Err(ExecutorError::Refused(reason));
        }
        request.validate()?;
        if let Some(market) = self.market.read().as_ref() {
            if market.slug != request.market {
                return Err(ExecutorError::Refused("market mismatch".to_string()));
            }
        }

        let now = self.clock.now_ms();
        let mut order = Order {
            id: OrderId::new(format!("paper-{}", uuid::Uuid::new_v4())),
            market: request.market,
            asset_id: request.asset_id,
            token: request.token,
            side: request.side,
            price: request.price,
            size: request.size,
            filled_size: Size::ZERO,
            filled_price: None,
            status: OrderStatus::Open,
            tif: request.tif,
            is_entry: request.is_entry,
            linked_order: request.linked_order,
            created_at_ms: now,
            filled_at_ms: None,
        };

        let ask = self
            .book
            .read()
            .map_or(Pips::ZERO, |b| b.top.ask_for(order.token));
        let fill = if ask.is_positive() && order.price >= ask {
            let qty = order.size;
            apply_fill(&mut order, qty, ask, now);
            Some((qty, ask))
        } else {
            if order.tif.is_immediate() {
                order.status = OrderStatus::Canceled;
            }
            None
        };

        debug!(
            order = %order.id,
            token = %order.token,
            price = %order.price,
            size = %order.size,
            tif = %order.tif,
            status = %order.status,
            "paper order placed"
        );

        self.orders.insert(order.id.clone(), order.clone());
        self.history.lock().push(order.id.clone());
        if let Some((qty, price)) = fill {
            self.add_position(&order, qty, price);
        }
        self.emit(order.clone());
        Ok(order)
    }

    fn cancel(&self, order_id: &OrderId) -> ExecutorResult<()> {
        let order = {
            let mut entry = self
                .orders
                .get_mut(order_id)
                .ok_or_else(|| ExecutorError::NotFound(order_id.clone()))?;
            let order = entry.value_mut();
            if order.status.is_terminal() {
                return Ok(());
            }
            order.status = OrderStatus::Canceled;
            order.clone()
        };
        debug!(order = %order_id, filled = %order.filled_size, "paper order canceled");
        self.emit(order);
        Ok(())
    }

    fn add_position(&self, order: &Order, qty: Size, price: Pips) {
        if !qty.is_positive() {
            return;
        }
        let mut positions = self.positions.lock();
        let position = positions
            .entry((order.market.clone(), order.token))
            .or_insert_with(|| Position {
                market: order.market.clone(),
                token: order.token,
                asset_id: order.asset_id.clone(),
                size: Size::ZERO,
                avg_price: Pips::ZERO,
            });
        let new_size = position.size + qty;
        let cost = position.size.inner() * Decimal::from(position.avg_price.inner())
            + qty.inner() * Decimal::from(price.inner());
        position.avg_price = (cost / new_size.inner())
            .round()
            .to_i64()
            .map_or(price, Pips::new);
        position.size = new_size;
    }

    fn emit(&self, order: Order) {
        if let Err(e) = self.updates_tx.try_send(order) {
            warn!(error = %e, "paper order update dropped");
        }
    }
}

fn apply_fill(order: &mut Order, qty: Size, price: Pips, now_ms: u64) {
    if !qty.is_positive() {
        return;
    }
    order.filled_size = order.filled_size + qty;
    order.filled_price = Some(price);
    if order.filled_size >= order.size {
        order.status = OrderStatus::Filled;
        order.filled_at_ms = Some(now_ms);
    } else {
        order.status = OrderStatus::Partial;
    }
}

impl TradingSubstrate for PaperExchange {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExecutorResult<Order>> {
        Box::pin(async move { self.place(request) })
    }

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, ExecutorResult<()>> {
        Box::pin(async move { self.cancel(&order_id) })
    }

    fn execute_multi_leg(
        &self,
        request: MultiLegRequest,
    ) -> BoxFuture<'_, ExecutorResult<Vec<Order>>> {
        Box::pin(async move {
            let mut placed: Vec<Order> = Vec::with_capacity(request.legs.len());
            for mut leg in request.legs {
                if !leg.is_entry && leg.linked_order.is_none() {
                    leg.linked_order = placed.iter().find(|o| o.is_entry).map(|o| o.id.clone());
                }
                match self.place(leg) {
                    Ok(order) => placed.push(order),
                    Err(e) if placed.is_empty() => return Err(e),
                    Err(e) => {
                        warn!(name = %request.name, error = %e, "multi-leg request incomplete");
                        break;
                    }
                }
            }
            Ok(placed)
        })
    }

    fn get_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, ExecutorResult<Order>> {
        Box::pin(async move {
            self.orders
                .get(order_id)
                .map(|o| o.clone())
                .ok_or_else(|| ExecutorError::NotFound(order_id.clone()))
        })
    }

    fn top_of_book<'a>(
        &'a self,
        market: &'a MarketSlug,
    ) -> BoxFuture<'a, ExecutorResult<TopOfBook>> {
        Box::pin(async move {
            self.best_book_snapshot(market)
                .map(|b| b.top)
                .ok_or_else(|| ExecutorError::Transient(format!("no book for {market}")))
        })
    }

    fn best_book_snapshot(&self, market: &MarketSlug) -> Option<BookSnapshot> {
        let active = self.market.read();
        match active.as_ref() {
            Some(m) if &m.slug != market => None,
            _ => *self.book.read(),
        }
    }

    fn open_positions<'a>(
        &'a self,
        market: &'a MarketSlug,
    ) -> BoxFuture<'a, ExecutorResult<Vec<Position>>> {
        Box::pin(async move {
            let mut positions: Vec<Position> = self
                .positions
                .lock()
                .values()
                .filter(|p| &p.market == market && p.size.is_positive())
                .cloned()
                .collect();
            positions.sort_by_key(|p| p.token == TokenType::Down);
            Ok(positions)
        })
    }

    fn current_market(&self) -> Option<Market> {
        self.market.read().clone()
    }
}

/// Settlement stand-in that only logs merge requests.
#[derive(Debug, Default)]
pub struct LoggingSettlement {
    calls: AtomicUsize,
}

impl LoggingSettlement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl Settlement for LoggingSettlement {
    fn try_merge_current_cycle(&self, market: Market) -> BoxFuture<'static, ExecutorResult<()>> {
        let n = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        Box::pin(async move {
            info!(market = %market.slug, call = n, "merge of complementary positions requested");
            Ok(())
        })
    }
}
