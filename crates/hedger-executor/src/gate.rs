//! Serialized execution gate.
//!
//! Every order-mutating call (place, cancel, multi-leg) is wrapped into a
//! job and handed to a single worker through a bounded channel. The worker
//! runs one job at a time and waits at least `min_interval_ms` after a job
//! completes before starting the next, so bursts of recovery activity never
//! hit the substrate concurrently.
//!
//! Callers pass a cancellation token. The token is honoured while waiting
//! for backlog room and while waiting for the result; a job that was already
//! admitted still runs to completion even if its caller gave up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hedger_core::{MultiLegRequest, Order, OrderId, OrderRequest};
use hedger_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::substrate::{BoxFuture, TradingSubstrate};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Gate sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Backlog capacity. Default: 256.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Minimum spacing between consecutive calls (ms). Default: 25.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_capacity() -> usize {
    256
}

fn default_min_interval_ms() -> u64 {
    25
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// Single-consumer serialization of order-mutating calls.
pub struct QueuedExecutionGate {
    tx: mpsc::Sender<Job>,
    substrate: Arc<dyn TradingSubstrate>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedExecutionGate {
    /// Spawn the worker. Must be called from within a Tokio runtime.
    pub fn start(substrate: Arc<dyn TradingSubstrate>, config: &GateConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            rx,
            shutdown.clone(),
            Duration::from_millis(config.min_interval_ms),
        ));
        info!(
            capacity = config.capacity,
            min_interval_ms = config.min_interval_ms,
            "execution gate started"
        );
        Self {
            tx,
            substrate,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Run `op` on the worker and return its result.
    ///
    /// Fails with `QueueClosed` once the gate is closed and with `Cancelled`
    /// if `token` fires before the job is admitted or before it completes.
    pub async fn submit<T, F>(&self, token: &CancellationToken, op: F) -> ExecutorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn TradingSubstrate>) -> BoxFuture<'static, ExecutorResult<T>>
            + Send
            + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(ExecutorError::QueueClosed);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let substrate = Arc::clone(&self.substrate);
        let job: Job = Box::pin(async move {
            let result = op(substrate).await;
            let _ = result_tx.send(result);
        });

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ExecutorError::QueueClosed),
            _ = token.cancelled() => return Err(ExecutorError::Cancelled),
            sent = self.tx.send(job) => {
                if sent.is_err() {
                    return Err(ExecutorError::QueueClosed);
                }
            }
        }
        Metrics::gate_queue_depth(self.queue_len());

        tokio::select! {
            biased;
            result = result_rx => result.unwrap_or(Err(ExecutorError::QueueClosed)),
            _ = token.cancelled() => Err(ExecutorError::Cancelled),
            _ = self.shutdown.cancelled() => Err(ExecutorError::QueueClosed),
        }
    }

    pub async fn place_order(
        &self,
        token: &CancellationToken,
        request: OrderRequest,
    ) -> ExecutorResult<Order> {
        let result = self
            .submit(token, move |s| {
                Box::pin(async move { s.place_order(request).await })
            })
            .await;
        record_error("place", &result);
        result
    }

    pub async fn cancel_order(
        &self,
        token: &CancellationToken,
        order_id: OrderId,
    ) -> ExecutorResult<()> {
        let result = self
            .submit(token, move |s| {
                Box::pin(async move { s.cancel_order(order_id).await })
            })
            .await;
        record_error("cancel", &result);
        result
    }

    pub async fn execute_multi_leg(
        &self,
        token: &CancellationToken,
        request: MultiLegRequest,
    ) -> ExecutorResult<Vec<Order>> {
        let result = self
            .submit(token, move |s| {
                Box::pin(async move { s.execute_multi_leg(request).await })
            })
            .await;
        record_error("multi_leg", &result);
        result
    }

    /// Jobs admitted but not yet picked up by the worker.
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop accepting work. Queued jobs are dropped and their callers get
    /// `QueueClosed`; a job already running completes.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!(pending = self.queue_len(), "execution gate closing");
            self.shutdown.cancel();
        }
        // Detach; the worker exits on its own after the running job.
        drop(self.worker.lock().take());
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for QueuedExecutionGate {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
    min_interval: Duration,
) {
    let mut last_completed: Option<Instant> = None;
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Some(last) = last_completed {
            tokio::time::sleep_until(last + min_interval).await;
        }
        job.await;
        last_completed = Some(Instant::now());
        Metrics::gate_queue_depth(rx.len());
    }

    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "execution gate stopped with queued jobs");
    } else {
        debug!("execution gate worker stopped");
    }
}

fn record_error<T>(op: &str, result: &ExecutorResult<T>) {
    if let Err(e) = result {
        Metrics::gate_error(op, e.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperExchange;
    use hedger_core::{ManualClock, Market, Pips, Size, TimeInForce, TokenType, TopOfBook};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<PaperExchange>, Market) {
        let clock = Arc::new(ManualClock::new(1_000));
        let (exchange, _updates) = PaperExchange::new(clock);
        let market = Market::new("m1", "up-1", "down-1");
        exchange.set_market(market.clone());
        exchange.set_book(TopOfBook {
            up_bid: Pips::from_cents(39),
            up_ask: Pips::from_cents(40),
            down_bid: Pips::from_cents(58),
            down_ask: Pips::from_cents(60),
        });
        (Arc::new(exchange), market)
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_through_gate() {
        let (exchange, market) = setup();
        let gate = QueuedExecutionGate::start(exchange.clone(), &GateConfig::default());
        let token = CancellationToken::new();

        let req = OrderRequest::entry(
            &market,
            TokenType::Up,
            Pips::from_cents(40),
            Size::new(dec!(10)),
            TimeInForce::ImmediateOrCancel,
        );
        let order = gate.place_order(&token, req).await.unwrap();
        assert!(order.is_filled());
        assert_eq!(gate.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_never_overlap_and_are_spaced() {
        let (exchange, _) = setup();
        let gate = Arc::new(QueuedExecutionGate::start(
            exchange,
            &GateConfig {
                capacity: 16,
                min_interval_ms: 25,
            },
        ));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                gate.submit(&token, move |_| {
                    Box::pin(async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        starts.lock().push(Instant::now());
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        let starts = starts.lock();
        assert_eq!(starts.len(), 5);
        for pair in starts.windows(2) {
            // 5ms of work plus at least 25ms of spacing.
            assert!(pair[1] - pair[0] >= Duration::from_millis(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_gate_rejects() {
        let (exchange, _) = setup();
        let gate = QueuedExecutionGate::start(exchange, &GateConfig::default());
        gate.close();
        assert!(gate.is_closed());

        let token = CancellationToken::new();
        let result = gate.cancel_order(&token, OrderId::from("x")).await;
        assert_eq!(result, Err(ExecutorError::QueueClosed));
        assert_eq!(ExecutorError::QueueClosed.to_string(), "queue-closed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_before_admission() {
        let (exchange, _) = setup();
        let gate = QueuedExecutionGate::start(exchange, &GateConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let result = gate
            .submit(&token, |_| Box::pin(async { Ok(1u32) }))
            .await;
        assert_eq!(result, Err(ExecutorError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_still_runs_job() {
        let (exchange, _) = setup();
        let gate = Arc::new(QueuedExecutionGate::start(exchange, &GateConfig::default()));
        let ran = Arc::new(AtomicUsize::new(0));

        let token = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let token = token.clone();
            let ran = Arc::clone(&ran);
            tokio::spawn(async move {
                gate.submit(&token, move |_| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(ExecutorError::Cancelled));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_substrate_errors_pass_through() {
        let (exchange, market) = setup();
        exchange.refuse_orders(Some("trading paused".to_string()));
        let gate = QueuedExecutionGate::start(exchange, &GateConfig::default());
        let token = CancellationToken::new();
        let req = OrderRequest::entry(
            &market,
            TokenType::Up,
            Pips::from_cents(40),
            Size::new(dec!(10)),
            TimeInForce::ImmediateOrCancel,
        );
        let err = gate.place_order(&token, req).await.unwrap_err();
        assert!(err.is_refusal());
    }
}
