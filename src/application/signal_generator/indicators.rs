//! Technical indicator computation over a merged candle series (spec.md §4.4).
//!
//! RSI(14), Bollinger(20,2), MACD(12,26,9), SMA(20/50), EMA(12/26), ATR(14),
//! and a 20-day volume ratio, fed incrementally through the `ta` crate the
//! way the teacher's strategy modules do.

use crate::domain::ports::Candle;
use rust_decimal::prelude::ToPrimitive;
use ta::Next;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};

#[derive(Debug, Clone, Copy)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi14: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub sma20: f64,
    pub sma50: f64,
    pub ema12: f64,
    pub ema26: f64,
    pub atr14: f64,
    pub volume_ratio: f64,
}

/// Minimum candles needed for SMA50, the longest-lookback indicator computed here.
pub const MIN_CANDLES: usize = 50;

pub fn compute(candles: &[Candle]) -> Option<IndicatorSnapshot> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let mut rsi = RelativeStrengthIndex::new(14).expect("valid RSI period");
    let mut bb = BollingerBands::new(20, 2.0).expect("valid Bollinger params");
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).expect("valid MACD params");
    let mut sma20 = SimpleMovingAverage::new(20).expect("valid SMA period");
    let mut sma50 = SimpleMovingAverage::new(50).expect("valid SMA period");
    let mut ema12 = ExponentialMovingAverage::new(12).expect("valid EMA period");
    let mut ema26 = ExponentialMovingAverage::new(26).expect("valid EMA period");
    let mut atr = AverageTrueRange::new(14).expect("valid ATR period");

    let (mut bb_out, mut macd_out) = (None, None);
    let (mut rsi_v, mut sma20_v, mut sma50_v, mut ema12_v, mut ema26_v, mut atr_v) =
        (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);

    for candle in candles {
        let close = candle.close.to_f64().unwrap_or(0.0);
        rsi_v = rsi.next(close);
        bb_out = Some(bb.next(close));
        macd_out = Some(macd.next(close));
        sma20_v = sma20.next(close);
        sma50_v = sma50.next(close);
        ema12_v = ema12.next(close);
        ema26_v = ema26.next(close);
        atr_v = atr.next(close);
    }
    // at least MIN_CANDLES iterations ran, so both are populated
    let bb_out = bb_out?;
    let macd_out = macd_out?;

    let last_volume = candles.last()?.volume.to_f64().unwrap_or(0.0);
    let window = &candles[candles.len().saturating_sub(20)..];
    let avg_volume = window.iter().map(|c| c.volume.to_f64().unwrap_or(0.0)).sum::<f64>() / window.len() as f64;
    let volume_ratio = if avg_volume > 0.0 { last_volume / avg_volume } else { 1.0 };

    Some(IndicatorSnapshot {
        close: candles.last()?.close.to_f64().unwrap_or(0.0),
        rsi14: rsi_v,
        bb_upper: bb_out.upper,
        bb_middle: bb_out.average,
        bb_lower: bb_out.lower,
        macd_line: macd_out.macd,
        macd_signal: macd_out.signal,
        macd_histogram: macd_out.histogram,
        sma20: sma20_v,
        sma50: sma50_v,
        ema12: ema12_v,
        ema26: ema26_v,
        atr14: atr_v,
        volume_ratio,
    })
}
