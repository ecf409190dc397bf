//! Chandelier-stop and Donchian-break soft-exit engine (spec.md §11
//! supplemented feature): an independent background producer that watches
//! held positions for a trailing-stop or trend-break condition the regular
//! exit evaluator doesn't compute, and queues a SELL signal when one fires.
//!
//! Grounded on `indicators::compute`'s incremental `ta` usage for the ATR
//! leg; the Donchian leg is a plain rolling min/max since the `ta` crate has
//! no Donchian indicator. Dedup/cooldown is delegated to
//! `SignalQueue::publish_deduped` per spec.md §11.

use crate::application::position_manager::PositionManager;
use crate::application::position_manager::store::PositionStore;
use crate::application::signal_generator::candles;
use crate::application::signal_queue::SignalQueue;
use crate::application::signal_queue::store::SortedSetStore;
use crate::config::{SignalGeneratorEnvConfig, SoftExitEnvConfig};
use crate::domain::ports::{Candle, HistoryStore, QuoteGateway};
use crate::domain::types::{Signal, SignalSide, SignalType};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use ta::Next;
use ta::indicators::AverageTrueRange;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftExitKind {
    ChandelierStop,
    DonchianBreak,
}

#[derive(Debug, Clone)]
pub struct SoftExitTrigger {
    pub kind: SoftExitKind,
    pub trigger_price: f64,
    pub reason: String,
}

/// Evaluate one symbol's candle window for a Chandelier-stop or
/// Donchian-break condition. `candles` must be ordered ascending by
/// trade-date; returns `None` if there isn't enough history for the
/// configured lookback or neither condition fires.
pub fn evaluate(candles: &[Candle], config: &SoftExitEnvConfig) -> Option<SoftExitTrigger> {
    let lookback = config.atr_period.max(config.donchian_n) + 1;
    if candles.len() < lookback {
        return None;
    }

    let mut atr = AverageTrueRange::new(config.atr_period).ok()?;
    let mut atr_v = 0.0;
    for candle in candles {
        atr_v = atr.next(candle.close.to_f64().unwrap_or(0.0));
    }

    let last = candles.last()?;
    let close = last.close.to_f64().unwrap_or(0.0);

    // Chandelier stop: highest high over the ATR lookback, trailed down by k*ATR.
    let chandelier_window = &candles[candles.len().saturating_sub(config.atr_period)..];
    let highest_high = chandelier_window.iter().map(|c| c.high.to_f64().unwrap_or(0.0)).fold(f64::MIN, f64::max);
    let chandelier_stop = highest_high - config.chandelier_k * atr_v;
    if close <= chandelier_stop {
        return Some(SoftExitTrigger {
            kind: SoftExitKind::ChandelierStop,
            trigger_price: close,
            reason: format!(
                "chandelier stop hit: close {close:.2} <= highest high {highest_high:.2} - {:.1}*ATR({:.2}) = {chandelier_stop:.2}",
                config.chandelier_k, atr_v
            ),
        });
    }

    // Donchian break: close undercuts the lowest low of the prior N periods
    // (excluding the current candle, so a fresh low is the trigger, not the
    // low itself).
    let donchian_window = &candles[candles.len().saturating_sub(config.donchian_n + 1)..candles.len() - 1];
    if donchian_window.is_empty() {
        return None;
    }
    let lowest_low = donchian_window.iter().map(|c| c.low.to_f64().unwrap_or(f64::MAX)).fold(f64::MAX, f64::min);
    if close < lowest_low {
        return Some(SoftExitTrigger {
            kind: SoftExitKind::DonchianBreak,
            trigger_price: close,
            reason: format!("donchian break: close {close:.2} < {}-period low {lowest_low:.2}", config.donchian_n),
        });
    }

    None
}

/// Background engine: polls held positions on `config.poll_interval_secs`
/// and publishes a deduped SELL signal for any symbol whose candle window
/// trips a Chandelier-stop or Donchian-break condition.
pub struct SoftExitEngine<Q, H, S, P>
where
    Q: QuoteGateway,
    H: HistoryStore,
    S: SortedSetStore,
    P: PositionStore,
{
    quotes: Arc<Q>,
    history: Option<Arc<H>>,
    queue: Arc<SignalQueue<S>>,
    positions: Arc<PositionManager<P>>,
    sg_config: SignalGeneratorEnvConfig,
    config: SoftExitEnvConfig,
}

impl<Q, H, S, P> SoftExitEngine<Q, H, S, P>
where
    Q: QuoteGateway,
    H: HistoryStore,
    S: SortedSetStore,
    P: PositionStore,
{
    pub fn new(
        quotes: Arc<Q>,
        history: Option<Arc<H>>,
        queue: Arc<SignalQueue<S>>,
        positions: Arc<PositionManager<P>>,
        sg_config: SignalGeneratorEnvConfig,
        config: SoftExitEnvConfig,
    ) -> Self {
        Self { quotes, history, queue, positions, sg_config, config }
    }

    pub async fn run(self) {
        if !self.config.enabled {
            info!("soft-exit engine disabled, not starting");
            return;
        }
        info!(poll_interval = self.config.poll_interval_secs, "soft-exit engine starting");
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        loop {
            if let Err(e) = self.scan_once().await {
                warn!(error = %e, "soft-exit scan failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One pass over every held position. Exposed separately from `run` so
    /// it can be driven directly in tests without a sleep loop.
    pub async fn scan_once(&self) -> anyhow::Result<usize> {
        let held = self.positions.all().await?;
        let mut triggered = 0;
        for symbol in held {
            match self.evaluate_symbol(&symbol).await {
                Ok(true) => triggered += 1,
                Ok(false) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "soft-exit evaluation failed"),
            }
        }
        Ok(triggered)
    }

    async fn evaluate_symbol(&self, symbol: &str) -> Result<bool, crate::domain::errors::GatewayError> {
        let candles = candles::fetch_hybrid(self.history.as_deref(), self.quotes.as_ref(), symbol, &self.sg_config).await?;
        let Some(trigger) = evaluate(&candles, &self.config) else {
            return Ok(false);
        };

        let signal_type = match trigger.kind {
            SoftExitKind::ChandelierStop => SignalType::StopLoss,
            SoftExitKind::DonchianBreak => SignalType::UrgentSell,
        };
        let price = Decimal::try_from(trigger.trigger_price).unwrap_or_default();
        let signal = Signal::new(symbol, SignalSide::Sell, signal_type, 100, price, "soft_exit", self.queue.account())
            .with_reason(trigger.reason.clone());

        let cooldown = Duration::from_secs(self.config.signal_cooldown_secs.max(0) as u64);
        match self.queue.publish_deduped(signal, cooldown).await {
            Ok(true) => {
                info!(symbol, kind = ?trigger.kind, reason = %trigger.reason, "soft-exit signal published");
                Ok(true)
            }
            Ok(false) => {
                debug!(symbol, "soft-exit signal suppressed by cooldown");
                Ok(false)
            }
            Err(e) => {
                warn!(symbol, error = %e, "failed to publish soft-exit signal");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn config() -> SoftExitEnvConfig {
        SoftExitEnvConfig {
            enabled: true,
            atr_period: 14,
            chandelier_k: 3.0,
            donchian_n: 20,
            poll_interval_secs: 60,
            signal_cooldown_secs: 900,
        }
    }

    fn candle(day: u32, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "TEST.US".into(),
            open: close,
            high,
            low,
            close,
            volume: dec!(1_000_000),
            trade_date: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn not_enough_history_yields_no_trigger() {
        let candles: Vec<_> = (1..10).map(|d| candle(d, dec!(101), dec!(99), dec!(100))).collect();
        assert!(evaluate(&candles, &config()).is_none());
    }

    #[test]
    fn a_steady_range_holds() {
        let candles: Vec<_> = (1..30).map(|d| candle(d, dec!(101), dec!(99), dec!(100))).collect();
        assert!(evaluate(&candles, &config()).is_none());
    }

    #[test]
    fn a_sharp_drop_below_the_chandelier_stop_triggers() {
        let mut candles: Vec<_> = (1..29).map(|d| candle(d, dec!(110), dec!(108), dec!(109))).collect();
        // sharp drop well below (highest high - 3*ATR)
        candles.push(candle(29, dec!(95), dec!(80), dec!(82)));
        let trigger = evaluate(&candles, &config()).unwrap();
        assert_eq!(trigger.kind, SoftExitKind::ChandelierStop);
    }

    #[test]
    fn a_fresh_low_below_the_donchian_window_triggers() {
        // flat range with ATR too tight to catch the chandelier stop, but the
        // final close undercuts every prior low.
        let mut candles: Vec<_> = (1..30).map(|d| candle(d, dec!(100.5), dec!(99.5), dec!(100))).collect();
        candles.push(candle(30, dec!(99.4), dec!(99.3), dec!(99.3)));
        let trigger = evaluate(&candles, &config()).unwrap();
        assert_eq!(trigger.kind, SoftExitKind::DonchianBreak);
    }
}
