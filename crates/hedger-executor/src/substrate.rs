//! Ports to the outside world.
//!
//! The trading substrate's mutating calls are only ever issued through the
//! [`QueuedExecutionGate`](crate::QueuedExecutionGate). Its read surface is
//! assumed safe for concurrent use and is called directly.

use std::pin::Pin;

use hedger_core::{
    BookSnapshot, Market, MarketSlug, MultiLegRequest, Order, OrderId, OrderRequest, Position,
    TopOfBook,
};

use crate::error::ExecutorResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Exchange access used by the coordinator.
pub trait TradingSubstrate: Send + Sync {
    // Mutating surface

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExecutorResult<Order>>;

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, ExecutorResult<()>>;

    fn execute_multi_leg(
        &self,
        request: MultiLegRequest,
    ) -> BoxFuture<'_, ExecutorResult<Vec<Order>>>;

    // Read surface

    fn get_order<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, ExecutorResult<Order>>;

    fn top_of_book<'a>(
        &'a self,
        market: &'a MarketSlug,
    ) -> BoxFuture<'a, ExecutorResult<TopOfBook>>;

    /// Latest cached best bid/ask with its refresh time. Non-blocking.
    fn best_book_snapshot(&self, market: &MarketSlug) -> Option<BookSnapshot>;

    fn open_positions<'a>(
        &'a self,
        market: &'a MarketSlug,
    ) -> BoxFuture<'a, ExecutorResult<Vec<Position>>>;

    fn current_market(&self) -> Option<Market>;

    /// Refresh positions from the venue before settlement. No-op by default.
    fn reconcile_positions<'a>(
        &'a self,
        _market: &'a MarketSlug,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Merges the current cycle's paired positions back into collateral.
pub trait Settlement: Send + Sync {
    fn try_merge_current_cycle(&self, market: Market) -> BoxFuture<'static, ExecutorResult<()>>;
}
