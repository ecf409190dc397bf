//! Single-process supervisor: runs Signal Generator, Order Executor, and
//! the soft-exit engine as supervised tasks sharing one `PaperGateway`
//! (spec.md §6: "the supervisor restarts it" on OE failure). Intended for
//! local/paper-trading deployments; production deployments run
//! `signal_generator` and `order_executor` as separate per-account
//! processes instead, sharing Redis/SQLite state.

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;
use tradecore::application::order_executor::{OrderExecutor, ProcessOutcome};
use tradecore::application::position_manager::PositionManager;
use tradecore::application::signal_generator::SignalGenerator;
use tradecore::application::signal_generator::soft_exit::SoftExitEngine;
use tradecore::application::signal_queue::SignalQueue;
use tradecore::application::strategies::StrategyRegistry;
use tradecore::config::Config;
use tradecore::domain::types::OrderStatus;
use tradecore::infrastructure::observability::{Metrics, MetricsReporter};
use tradecore::infrastructure::paper_gateway::PaperGateway;
use tradecore::infrastructure::persistence::{
    Database, RedisPositionStore, RedisSortedSetStore, SqliteHistoryStore, SqliteOrderRepository, SqlitePositionStopRepository,
};

fn watchlist() -> Vec<String> {
    std::env::var("WATCHLIST_SYMBOLS")
        .unwrap_or_else(|_| "AAPL.US,MSFT.US,NVDA.US".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run the OE consume loop until `shutdown` fires, restarting on an
/// unexpected error (spec.md §6: "the supervisor restarts it").
async fn run_order_executor_loop(
    executor: Arc<OrderExecutor<PaperGateway, PaperGateway, RedisSortedSetStore, RedisPositionStore>>,
    gateway: Arc<PaperGateway>,
    order_repo: Arc<SqliteOrderRepository>,
    stop_repo: Arc<SqlitePositionStopRepository>,
    account_id: String,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let idle_backoff = Duration::from_millis(500);
    loop {
        if *shutdown.borrow() {
            return;
        }
        match executor.process_one().await {
            Ok(ProcessOutcome::Idle) => {
                tokio::select! {
                    _ = tokio::time::sleep(idle_backoff) => {}
                    _ = shutdown.changed() => return,
                }
            }
            Ok(ProcessOutcome::Submitted { symbol, order_id }) => {
                info!(symbol, order_id, "order submitted");
                if let Ok(orders) = gateway.today_orders(&symbol).await
                    && let Some(order) = orders.iter().find(|o| o.order_id == order_id)
                {
                    let _ = order_repo.record(&account_id, order).await;
                    if order.status == OrderStatus::Filled {
                        match executor.on_fill(order, None).await {
                            Ok(Some(stop)) => {
                                let _ = stop_repo.save(&account_id, &stop).await;
                            }
                            Ok(None) if order.side == tradecore::domain::types::SignalSide::Sell => {
                                let _ = stop_repo.close(&account_id, &symbol).await;
                            }
                            _ => {}
                        }
                    }
                }
            }
            Ok(ProcessOutcome::Deferred { symbol, reason }) => info!(symbol, reason, "signal deferred"),
            Ok(ProcessOutcome::Rejected { symbol, reason }) => warn!(symbol, reason, "signal rejected"),
            Err(e) => {
                error!(error = %e, "order executor loop error, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("tradecore supervisor {} starting", env!("CARGO_PKG_VERSION"));
    let config = Config::from_env()?;
    info!(account = %config.account_id, "configuration loaded");

    let database = Database::new(&config.database_dsn).await?;
    let history = Arc::new(SqliteHistoryStore::new(database.clone()));
    let order_repo = Arc::new(SqliteOrderRepository::new(database.clone()));
    let stop_repo = Arc::new(SqlitePositionStopRepository::new(database));

    let sq_store = Arc::new(RedisSortedSetStore::connect(&config.redis_url).await?);
    let pm_store = Arc::new(RedisPositionStore::connect(&config.redis_url).await?);

    let gateway = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(sq_store, config.queue.clone(), &config.account_id));
    let positions = Arc::new(PositionManager::new(pm_store, &config.account_id, config.fail_closed));

    let generator = Arc::new(SignalGenerator::new(
        gateway.clone(),
        Some(history.clone()),
        queue.clone(),
        positions.clone(),
        StrategyRegistry::default(),
        config.signal_generator.clone(),
        config.regime.clone(),
    ));

    let executor = Arc::new(OrderExecutor::new(
        gateway.clone(),
        gateway.clone(),
        queue.clone(),
        positions.clone(),
        config.execution.clone(),
        config.regime.clone(),
        config.backup_order.clone(),
    ));

    let recovered = executor.recover_stranded_signals().await?;
    if recovered > 0 {
        info!(recovered, "reclaimed stranded signals from a prior run");
    }
    executor.cold_sync_positions().await?;

    if let Ok(metrics) = Metrics::new() {
        let reporter = MetricsReporter::new(positions.clone(), metrics, 60);
        tokio::spawn(reporter.run());
    }

    let soft_exit = SoftExitEngine::new(
        gateway.clone(),
        Some(history),
        queue.clone(),
        positions.clone(),
        config.signal_generator.clone(),
        config.soft_exit.clone(),
    );
    tokio::spawn(soft_exit.run());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_order_executor_loop(
        executor,
        gateway.clone(),
        order_repo,
        stop_repo.clone(),
        config.account_id.clone(),
        shutdown_rx,
    ));

    let symbols = watchlist();
    info!(symbols = ?symbols, "watchlist loaded");
    let poll_interval = Duration::from_secs(config.signal_generator.poll_interval_secs.max(1));

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

        if let Err(e) = generator.salvage_failed().await {
            warn!(error = %e, "failed-signal salvage failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping workers");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    Ok(())
}
