//! Deferred merge of paired positions after a hedge completes.

use std::sync::Arc;
use std::time::Duration;

use hedger_core::MarketSlug;
use hedger_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::coordinator::OmsCore;

impl OmsCore {
    /// Schedule a merge for `market`. Requests made while one is already
    /// waiting coalesce into it.
    pub(crate) fn schedule_settlement(self: &Arc<Self>, market: &MarketSlug) {
        let settings = &self.config.settlement;
        if !settings.enabled {
            return;
        }
        let Some(settler) = self.settlement.read().clone() else {
            return;
        };
        if !self.settlement_scheduled.lock().insert(market.clone()) {
            debug!(market = %market, "settlement already scheduled");
            return;
        }

        let core = Arc::clone(self);
        let market = market.clone();
        let delay = Duration::from_secs(settings.delay_secs);
        let pause = Duration::from_millis(settings.reconcile_pause_ms);
        debug!(market = %market, delay_secs = settings.delay_secs, "settlement scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            core.settlement_scheduled.lock().remove(&market);

            if let Err(e) = core.substrate.reconcile_positions(&market).await {
                warn!(market = %market, error = %e, "position reconcile failed, merging anyway");
            }
            tokio::time::sleep(pause).await;

            match core.substrate.open_positions(&market).await {
                Ok(positions) => {
                    for p in &positions {
                        info!(
                            market = %market,
                            token = %p.token,
                            size = %p.size,
                            avg_price = %p.avg_price,
                            "position before merge"
                        );
                    }
                }
                Err(e) => warn!(market = %market, error = %e, "position fetch failed"),
            }

            let known = core.state.read().markets.get(&market).cloned();
            let target = known.or_else(|| {
                core.substrate
                    .current_market()
                    .filter(|m| m.slug == market)
            });
            let Some(target) = target else {
                warn!(market = %market, "settlement skipped: market unknown");
                Metrics::settlement(market.as_str(), "skipped");
                return;
            };

            match settler.try_merge_current_cycle(target).await {
                Ok(()) => {
                    info!(market = %market, "settlement merge requested");
                    Metrics::settlement(market.as_str(), "ok");
                }
                Err(e) => {
                    warn!(market = %market, error = %e, "settlement merge failed");
                    Metrics::settlement(market.as_str(), "error");
                }
            }
        });
    }
}
