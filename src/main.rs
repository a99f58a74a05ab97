use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use nowcast_engine::config::AppConfig;
use nowcast_engine::db::store::Store;
use nowcast_engine::ingest::orchestrator::CellIngestor;
use nowcast_engine::ingest::scheduler::IngestScheduler;
use nowcast_engine::monitoring::health::{self, EngineHealth};
use nowcast_engine::monitoring::logger;
use nowcast_engine::upstream::client::NowcastClient;
use nowcast_engine::upstream::governor::CallGovernor;

/// Nowcast ingestion engine: polls the upstream observation grid on a fixed
/// cadence and keeps the latest observation per cell available for lookup.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Run a single ingestion cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets) = AppConfig::load()?;

    logger::init_logging(&config.monitoring)?;

    let service_key = secrets.service_key.context("WEATHER_API_KEY is not set")?;

    let store = Store::new(&config.database.path).await?;
    let client = Arc::new(NowcastClient::new(&config.upstream, service_key)?);
    let governor = Arc::new(CallGovernor::new(client, &config.rate_limit));
    let ingestor = Arc::new(CellIngestor::new(governor, store.clone(), &config.ingest));

    let health_state = EngineHealth::new();
    let scheduler = IngestScheduler::new(
        ingestor,
        store.clone(),
        config.ingest.clone(),
        health_state.clone(),
    );

    // Resume cycle numbering from the last recorded cycle.
    let mut cycle_number = match store.latest_cycle().await? {
        Some(cycle) => cycle.cycle_number + 1,
        None => 0,
    };

    tracing::info!(
        cycle_interval_s = config.ingest.cycle_interval_seconds,
        concurrency = config.ingest.concurrency,
        lookback_hours = config.ingest.lookback_hours,
        cycle = cycle_number,
        "Nowcast engine starting"
    );

    if cli.once {
        scheduler.run_once(cycle_number).await;
        return Ok(());
    }

    if !config.ingest.enabled {
        tracing::info!("Scheduled ingestion disabled — nothing to do");
        return Ok(());
    }

    let health_handle = health::spawn_health_server(health_state);

    if config.ingest.run_at_boot {
        scheduler.run_once(cycle_number).await;
        cycle_number += 1;
    }

    let result = scheduler.run(cycle_number).await;

    health_handle.abort();
    result
}
