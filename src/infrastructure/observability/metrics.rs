//! Prometheus metrics (spec.md §6 observability). All metrics use the
//! `tradecore_` prefix. Grounded on the teacher's `Metrics` struct: one
//! `Registry`, gauges for point-in-time state, counters for totals.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Depth of the signal queue's pending partition.
    pub queue_depth: GenericGauge<AtomicF64>,
    /// Signals published by strategy/signal type.
    pub signals_published_total: CounterVec,
    /// Signals consumed and acknowledged (submitted), nacked (deferred), or rejected.
    pub signals_resolved_total: CounterVec,
    /// Orders submitted, labeled by side and the gateway-reported outcome.
    pub orders_total: CounterVec,
    /// Backup conditional orders submitted.
    pub backup_orders_total: CounterVec,
    /// Open position count.
    pub positions_count: GenericGauge<AtomicF64>,
    /// Position notional value per symbol.
    pub position_value: GenericGaugeVec<AtomicF64>,
    /// Net assets per currency.
    pub net_assets: GaugeVec,
    /// Current regime (0=RANGE, 1=BULL, -1=BEAR) per market.
    pub regime_state: GaugeVec,
    /// Gateway call latency in seconds, by gateway and operation.
    pub gateway_latency_seconds: HistogramVec,
    /// Gateway errors, by gateway and error class.
    pub gateway_errors_total: CounterVec,
    /// Process uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let queue_depth = Gauge::with_opts(Opts::new("tradecore_queue_depth", "Pending signals in the queue"))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let signals_published_total = CounterVec::new(
            Opts::new("tradecore_signals_published_total", "Signals published by strategy and type"),
            &["strategy", "signal_type"],
        )?;
        registry.register(Box::new(signals_published_total.clone()))?;

        let signals_resolved_total = CounterVec::new(
            Opts::new("tradecore_signals_resolved_total", "Signals resolved by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(signals_resolved_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("tradecore_orders_total", "Orders submitted by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let backup_orders_total = CounterVec::new(
            Opts::new("tradecore_backup_orders_total", "Backup conditional orders submitted"),
            &["outcome"],
        )?;
        registry.register(Box::new(backup_orders_total.clone()))?;

        let positions_count = Gauge::with_opts(Opts::new("tradecore_positions_count", "Open position count"))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_value = GaugeVec::new(
            Opts::new("tradecore_position_value", "Position notional value per symbol"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_value.clone()))?;

        let net_assets = GaugeVec::new(
            Opts::new("tradecore_net_assets", "Net assets per currency"),
            &["currency"],
        )?;
        registry.register(Box::new(net_assets.clone()))?;

        let regime_state = GaugeVec::new(
            Opts::new("tradecore_regime_state", "Current regime: -1 BEAR, 0 RANGE, 1 BULL"),
            &["market"],
        )?;
        registry.register(Box::new(regime_state.clone()))?;

        let gateway_latency_seconds = HistogramVec::new(
            HistogramOpts::new("tradecore_gateway_latency_seconds", "Gateway call latency in seconds")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["gateway", "operation"],
        )?;
        registry.register(Box::new(gateway_latency_seconds.clone()))?;

        let gateway_errors_total = CounterVec::new(
            Opts::new("tradecore_gateway_errors_total", "Gateway errors by class"),
            &["gateway", "class"],
        )?;
        registry.register(Box::new(gateway_errors_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("tradecore_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            queue_depth,
            signals_published_total,
            signals_resolved_total,
            orders_total,
            backup_orders_total,
            positions_count,
            position_value,
            net_assets,
            regime_state,
            gateway_latency_seconds,
            gateway_errors_total,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }

    pub fn inc_signal_published(&self, strategy: &str, signal_type: &str) {
        self.signals_published_total.with_label_values(&[strategy, signal_type]).inc();
    }

    pub fn inc_signal_resolved(&self, outcome: &str) {
        self.signals_resolved_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_order(&self, side: &str, outcome: &str) {
        self.orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn inc_backup_order(&self, outcome: &str) {
        self.backup_orders_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_position_value(&self, symbol: &str, value: f64) {
        self.position_value.with_label_values(&[symbol]).set(value);
    }

    pub fn set_regime(&self, market: &str, value: f64) {
        self.regime_state.with_label_values(&[market]).set(value);
    }

    pub fn observe_gateway_latency(&self, gateway: &str, operation: &str, seconds: f64) {
        self.gateway_latency_seconds.with_label_values(&[gateway, operation]).observe(seconds);
    }

    pub fn inc_gateway_error(&self, gateway: &str, class: &str) {
        self.gateway_errors_total.with_label_values(&[gateway, class]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default metrics")
    }
}
