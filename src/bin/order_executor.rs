//! Order Executor process: the only component permitted to call the
//! trading gateway (spec.md §4.3). Consumes signals from SQ in strict
//! priority order and updates PM/position-stop state on fill.
//!
//! Wires a `PaperGateway` in place of a real broker SDK client — the broker
//! wire protocol is a named Non-goal (spec.md §11).

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use tradecore::application::order_executor::{OrderExecutor, ProcessOutcome};
use tradecore::application::position_manager::PositionManager;
use tradecore::application::signal_queue::SignalQueue;
use tradecore::config::Config;
use tradecore::domain::types::OrderStatus;
use tradecore::infrastructure::observability::{Metrics, MetricsReporter};
use tradecore::infrastructure::paper_gateway::PaperGateway;
use tradecore::infrastructure::persistence::{Database, RedisPositionStore, RedisSortedSetStore, SqliteOrderRepository, SqlitePositionStopRepository};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(account = %config.account_id, "order executor starting");

    let database = Database::new(&config.database_dsn).await?;
    let order_repo = Arc::new(SqliteOrderRepository::new(database.clone()));
    let stop_repo = Arc::new(SqlitePositionStopRepository::new(database));

    let sorted_set_store = Arc::new(RedisSortedSetStore::connect(&config.redis_url).await?);
    let position_store = Arc::new(RedisPositionStore::connect(&config.redis_url).await?);

    let gateway = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(sorted_set_store, config.queue.clone(), &config.account_id));
    let positions = Arc::new(PositionManager::new(position_store, &config.account_id, config.fail_closed));

    let executor = Arc::new(OrderExecutor::new(
        gateway.clone(),
        gateway.clone(),
        queue,
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
        let reporter = MetricsReporter::new(positions, metrics, 60);
        tokio::spawn(reporter.run());
    }

    let idle_backoff = std::time::Duration::from_millis(500);
    loop {
        match executor.process_one().await {
            Ok(ProcessOutcome::Idle) => {
                tokio::select! {
                    _ = tokio::time::sleep(idle_backoff) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received, exiting");
                        break;
                    }
                }
                continue;
            }
            Ok(ProcessOutcome::Submitted { symbol, order_id }) => {
                info!(symbol, order_id, "order submitted");
                match gateway.today_orders(&symbol).await {
                    Ok(orders) => {
                        if let Some(order) = orders.iter().find(|o| o.order_id == order_id) {
                            if let Err(e) = order_repo.record(&config.account_id, order).await {
                                warn!(symbol, error = %e, "failed to persist order record");
                            }
                            if order.status == OrderStatus::Filled {
                                match executor.on_fill(order, None).await {
                                    Ok(Some(stop)) => {
                                        if let Err(e) = stop_repo.save(&config.account_id, &stop).await {
                                            warn!(symbol, error = %e, "failed to persist position stop");
                                        }
                                    }
                                    Ok(None) => {
                                        if order.side == tradecore::domain::types::SignalSide::Sell {
                                            let _ = stop_repo.close(&config.account_id, &symbol).await;
                                        }
                                    }
                                    Err(e) => warn!(symbol, error = %e, "on_fill bookkeeping failed"),
                                }
                            }
                        }
                    }
                    Err(e) => warn!(symbol, error = %e, "failed to look up submitted order for bookkeeping"),
                }
            }
            Ok(ProcessOutcome::Deferred { symbol, reason }) => {
                info!(symbol, reason, "signal deferred");
            }
            Ok(ProcessOutcome::Rejected { symbol, reason }) => {
                warn!(symbol, reason, "signal rejected");
            }
            Err(e) => {
                warn!(error = %e, "process_one failed");
                tokio::time::sleep(idle_backoff).await;
            }
        }
    }

    Ok(())
}
