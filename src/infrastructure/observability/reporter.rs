//! Push-based metrics reporter (spec.md §6 observability): periodically
//! logs a structured JSON snapshot and updates the Prometheus gauges.
//! Grounded on the teacher's `MetricsReporter` — outbound-only, no HTTP
//! server, no incoming requests.

use crate::application::position_manager::PositionManager;
use crate::application::position_manager::store::PositionStore;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub positions_count: usize,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub cost_price: f64,
    pub notional: f64,
}

pub struct MetricsReporter<P: PositionStore> {
    positions: Arc<PositionManager<P>>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl<P: PositionStore> MetricsReporter<P> {
    pub fn new(positions: Arc<PositionManager<P>>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self { positions, metrics, start_time: Instant::now(), interval: Duration::from_secs(interval_seconds) }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(positions = snapshot.positions_count, uptime = snapshot.uptime_seconds, "metrics snapshot");
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let details = self.positions.all_details().await?;

        let positions: Vec<PositionSnapshot> = details
            .iter()
            .map(|(symbol, detail)| {
                let quantity = detail.quantity.to_f64().unwrap_or(0.0);
                let cost_price = detail.cost_price.to_f64().unwrap_or(0.0);
                self.metrics.set_position_value(symbol, quantity * cost_price);
                PositionSnapshot { symbol: symbol.clone(), quantity, cost_price, notional: quantity * cost_price }
            })
            .collect();

        self.metrics.positions_count.set(positions.len() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            positions_count: positions.len(),
            positions,
        })
    }
}
