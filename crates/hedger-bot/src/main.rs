//! Hedge coordinator replay binary.

use anyhow::Result;
use clap::Parser;
use hedger_bot::{AppConfig, Application};
use hedger_telemetry::init_logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hedger-bot")]
#[command(about = "Replay strategy decisions through the hedge coordinator on a paper exchange")]
struct Args {
    /// Path to the TOML config file (falls back to HEDGER_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// JSON-lines replay file
    #[arg(short, long)]
    replay: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;
    info!("Starting hedger-bot");

    let config = AppConfig::load(args.config.as_deref())?;
    info!(
        market = %config.market.slug,
        mode = %config.oms.execution.mode,
        price_stop = config.oms.price_stop.enabled,
        "Configuration loaded"
    );

    let app = Application::new(config)?;
    app.start();

    let finished = tokio::select! {
        result = app.run_replay_file(&args.replay) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    let report = app.report().await;
    app.shutdown();
    println!("{}", serde_json::to_string_pretty(&report)?);

    outcome?;
    Ok(())
}
