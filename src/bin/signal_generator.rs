//! Signal Generator process: scans one account's watchlist for entries,
//! evaluates held positions for exits, and runs the soft-exit, rotation,
//! and failure-salvage auxiliary loops (spec.md §4.4).
//!
//! Wires a `PaperGateway` in place of a real broker SDK client — the broker
//! wire protocol is a named Non-goal (spec.md §11).

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use tradecore::application::position_manager::PositionManager;
use tradecore::application::signal_generator::SignalGenerator;
use tradecore::application::signal_generator::soft_exit::SoftExitEngine;
use tradecore::application::signal_queue::SignalQueue;
use tradecore::application::strategies::StrategyRegistry;
use tradecore::config::Config;
use tradecore::infrastructure::observability::{Metrics, MetricsReporter};
use tradecore::infrastructure::paper_gateway::PaperGateway;
use tradecore::infrastructure::persistence::{Database, RedisPositionStore, RedisSortedSetStore, SqliteHistoryStore, SqlitePositionStopRepository};

fn watchlist() -> Vec<String> {
    std::env::var("WATCHLIST_SYMBOLS")
        .unwrap_or_else(|_| "AAPL.US,MSFT.US,NVDA.US".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(account = %config.account_id, "signal generator starting");

    let database = Database::new(&config.database_dsn).await?;
    let history = Arc::new(SqliteHistoryStore::new(database.clone()));
    let stop_repo = Arc::new(SqlitePositionStopRepository::new(database.clone()));

    let sorted_set_store = Arc::new(RedisSortedSetStore::connect(&config.redis_url).await?);
    let position_store = Arc::new(RedisPositionStore::connect(&config.redis_url).await?);

    let quotes = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(sorted_set_store, config.queue.clone(), &config.account_id));
    let positions = Arc::new(PositionManager::new(position_store, &config.account_id, config.fail_closed));

    let generator = Arc::new(SignalGenerator::new(
        quotes.clone(),
        Some(history.clone()),
        queue.clone(),
        positions.clone(),
        StrategyRegistry::default(),
        config.signal_generator.clone(),
        config.regime.clone(),
    ));

    let soft_exit = SoftExitEngine::new(
        quotes.clone(),
        Some(history),
        queue.clone(),
        positions.clone(),
        config.signal_generator.clone(),
        config.soft_exit.clone(),
    );
    tokio::spawn(soft_exit.run());

    if let Ok(metrics) = Metrics::new() {
        let reporter = MetricsReporter::new(positions.clone(), metrics, 60);
        tokio::spawn(reporter.run());
    }

    let symbols = watchlist();
    info!(symbols = ?symbols, "watchlist loaded");

    let poll_interval = std::time::Duration::from_secs(config.signal_generator.poll_interval_secs.max(1));
    let mut ticks_since_salvage = 0u64;
    let salvage_every = (config.signal_generator.failed_salvage_interval_secs / config.signal_generator.poll_interval_secs.max(1)).max(1);

    loop {
        let regime = generator.classify_regime().await;
        for symbol in &symbols {
            let held = positions.has(symbol).await.unwrap_or(false);
            let result = if held {
                let stop = stop_repo.find(&config.account_id, symbol).await.unwrap_or(None);
                let detail = positions.detail(symbol).await.unwrap_or(None);
                let added_at = detail.map(|d| d.added_at).unwrap_or_else(chrono::Utc::now);
                generator.scan_exit(symbol, stop.as_ref(), added_at, &regime).await
            } else {
                generator.scan_entry(symbol, &regime).await
            };

            match result {
                Ok(Some(signal)) => {
                    if let Err(e) = queue.publish(signal, None).await {
                        warn!(symbol, error = %e, "failed to publish signal");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(symbol, error = %e, "scan failed"),
            }
        }

        ticks_since_salvage += 1;
        if ticks_since_salvage >= salvage_every {
            ticks_since_salvage = 0;
            if let Err(e) = generator.salvage_failed().await {
                warn!(error = %e, "failed-signal salvage failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting");
                break;
            }
        }
    }

    Ok(())
}
