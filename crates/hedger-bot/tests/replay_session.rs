//! End-to-end replay sessions against the paper exchange.

use hedger_bot::{AppConfig, AppError, Application, ReplayEvent};
use hedger_core::{Market, OrderStatus, Pips, TimeInForce, TokenType, TopOfBook};

const START_MS: u64 = 1_000_000;

const OPEN_AND_DECIDE: &str = concat!(
    "# market opens, strategy buys up and hedges down\n",
    r#"{"type":"book","up_bid":3900,"up_ask":4000,"down_bid":6100,"down_ask":6200}"#,
    "\n",
    r#"{"type":"decision","direction":"up","entry_price":4000,"entry_size":10,"#,
    r#""hedge_price":5900,"hedge_size":10}"#,
    "\n",
);

fn replay(extra: &str) -> String {
    format!("{OPEN_AND_DECIDE}{extra}")
}

fn app(config: AppConfig) -> Application {
    let app = Application::with_start_time(config, START_MS).unwrap();
    app.start();
    app
}

#[tokio::test(start_paused = true)]
async fn test_resting_hedge_fills_and_settles() {
    let app = app(AppConfig::default());
    let script = replay(
        r#"
{"type":"wait","ms":1000}
{"type":"book","up_bid":3900,"up_ask":4000,"down_bid":5700,"down_ask":5800}
{"type":"wait","ms":16000}
"#,
    );
    app.run_replay(script.as_bytes()).await.unwrap();

    let report = app.report().await;
    assert_eq!(report.events, 5);
    assert_eq!(report.decisions, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(report.orders_placed, 2);
    assert_eq!(report.settlements, 1);
    assert!(!report.unhedged_risk);
    assert!(report.risk.exposures.is_empty());
    assert_eq!(report.metrics.pending_hedges, 0);
    assert_eq!(report.metrics.hedge_ewma_samples, 1);

    let placed = app.exchange().orders_placed();
    assert_eq!(placed[1].token, TokenType::Down);
    assert_eq!(placed[1].price, Pips::from_cents(59));
    assert_eq!(placed[1].status, OrderStatus::Filled);

    app.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_hard_stop_during_replay() {
    let mut config = AppConfig::default();
    config.oms.price_stop.enabled = true;
    let app = app(config);
    let script = replay(
        r#"
{"type":"wait","ms":500}
{"type":"book","up_bid":3900,"up_ask":4000,"down_bid":7400,"down_ask":7500}
{"type":"wait","ms":16000}
"#,
    );
    app.run_replay(script.as_bytes()).await.unwrap();

    let placed = app.exchange().orders_placed();
    assert_eq!(placed.len(), 3);
    assert_eq!(placed[1].status, OrderStatus::Canceled);
    let forced = &placed[2];
    assert_eq!(forced.tif, TimeInForce::ImmediateOrCancel);
    assert_eq!(forced.price, Pips::from_cents(75));
    assert!(forced.is_filled());

    let report = app.report().await;
    assert!(report.risk.exposures.is_empty());
    assert!(!report.unhedged_risk);
    assert_eq!(report.settlements, 1);
    assert_eq!(report.metrics.active_watches, 0);

    app.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_cycle_resets_coordinator() {
    let app = app(AppConfig::default());
    let script = replay(
        r#"
{"type":"wait","ms":500}
{"type":"cycle","slug":"btc-updown-30m","up_asset_id":"up-2","down_asset_id":"down-2"}
"#,
    );
    app.run_replay(script.as_bytes()).await.unwrap();

    let report = app.report().await;
    assert_eq!(report.cycles, 1);
    assert_eq!(report.market.as_str(), "btc-updown-30m");
    assert!(report.risk.exposures.is_empty());
    assert_eq!(report.metrics.pending_hedges, 0);
    assert_eq!(app.current_market(), Market::new("btc-updown-30m", "up-2", "down-2"));

    app.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_refused_decision_is_counted() {
    let app = app(AppConfig::default());
    // 2 x 0.40 is below the minimum order notional.
    let script = concat!(
        r#"{"type":"book","up_bid":3900,"up_ask":4000,"down_bid":6100,"down_ask":6200}"#,
        "\n",
        r#"{"type":"decision","direction":"up","entry_price":4000,"entry_size":2,"#,
        r#""hedge_price":5900,"hedge_size":2}"#,
        "\n",
    );
    app.run_replay(script.as_bytes()).await.unwrap();

    let report = app.report().await;
    assert_eq!(report.decisions, 1);
    assert_eq!(report.executed, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.orders_placed, 0);

    app.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_line_aborts_replay() {
    let app = app(AppConfig::default());
    let script = "{\"type\":\"wait\",\"ms\":10}\n{\"type\":\"book\",\"up_ask\":}\n";
    let err = app.run_replay(script.as_bytes()).await.unwrap_err();
    assert!(matches!(err, AppError::Replay { line: 2, .. }));

    app.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_wait_advances_simulated_clock() {
    let app = app(AppConfig::default());
    app.apply(ReplayEvent::Wait { ms: 2_350 }).await;
    assert_eq!(app.now_ms(), START_MS + 2_350);

    app.apply(ReplayEvent::Book(TopOfBook {
        up_bid: Pips::from_cents(49),
        up_ask: Pips::from_cents(50),
        down_bid: Pips::from_cents(49),
        down_ask: Pips::from_cents(50),
    }))
    .await;
    assert_eq!(app.report().await.events, 2);

    app.shutdown();
}
