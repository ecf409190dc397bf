//! Built-in weighted entry-scoring rubric (spec.md §4.4 "Entry scoring").
//!
//! One concrete `Strategy` implementation: the transparent weighted rubric
//! the spec describes in full (RSI regime, Bollinger position/width, MACD
//! cross/momentum, volume ratio, trend confirmation, optional breakout
//! bonus). Further strategies are Non-goals ("the core does not define
//! strategies themselves") — this one exists because the rubric it computes
//! is spelled out, not left to a pluggable implementation.
//!
//! Grounded on the teacher's `AdvancedTripleFilterStrategy` (multiple
//! weighted technical filters combined into one verdict) but re-expressed
//! against this crate's `IndicatorSnapshot` and the 0-100 score space
//! `risk_regime::budget::base_pct` already assumes.

use super::traits::{AnalysisContext, ScoredSignal, Strategy};

const RSI_WEIGHT: i32 = 20;
const BOLLINGER_WEIGHT: i32 = 15;
const MACD_WEIGHT: i32 = 25;
const VOLUME_WEIGHT: i32 = 15;
const TREND_WEIGHT: i32 = 15;
const BREAKOUT_BONUS: i32 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct RubricStrategy;

impl RubricStrategy {
    pub fn new() -> Self {
        Self
    }

    fn rsi_component(rsi: f64, reasons: &mut Vec<String>) -> i32 {
        // Healthy continuation zone scores best; overbought tails off fast.
        let score = if rsi < 30.0 {
            reasons.push(format!("RSI {rsi:.1} oversold, reversal candidate"));
            (RSI_WEIGHT as f64 * 0.6) as i32
        } else if rsi < 50.0 {
            (RSI_WEIGHT as f64 * 0.8) as i32
        } else if rsi <= 65.0 {
            reasons.push(format!("RSI {rsi:.1} healthy momentum"));
            RSI_WEIGHT
        } else if rsi <= 75.0 {
            (RSI_WEIGHT as f64 * 0.4) as i32
        } else {
            reasons.push(format!("RSI {rsi:.1} overbought"));
            0
        };
        score
    }

    fn bollinger_component(close: f64, upper: f64, lower: f64, middle: f64, reasons: &mut Vec<String>) -> i32 {
        let width = (upper - lower).max(f64::EPSILON);
        let position = (close - lower) / width; // 0 at lower band, 1 at upper band
        let narrow_band = width / middle.max(f64::EPSILON) < 0.08;
        let score = if (0.35..=0.75).contains(&position) {
            reasons.push(format!("price at {:.0}% of Bollinger band", position * 100.0));
            BOLLINGER_WEIGHT
        } else if position < 0.35 {
            (BOLLINGER_WEIGHT as f64 * 0.5) as i32
        } else {
            (BOLLINGER_WEIGHT as f64 * 0.2) as i32
        };
        if narrow_band {
            reasons.push("Bollinger band squeeze, breakout watch".into());
        }
        score
    }

    fn macd_component(line: f64, signal: f64, histogram: f64, reasons: &mut Vec<String>) -> i32 {
        if line > signal && histogram > 0.0 {
            reasons.push("MACD bullish cross".into());
            MACD_WEIGHT
        } else if line > signal {
            (MACD_WEIGHT as f64 * 0.6) as i32
        } else {
            0
        }
    }

    fn volume_component(ratio: f64, reasons: &mut Vec<String>) -> i32 {
        if ratio >= 1.5 {
            reasons.push(format!("volume {ratio:.1}x 20-day average"));
            VOLUME_WEIGHT
        } else if ratio >= 1.0 {
            (VOLUME_WEIGHT as f64 * 0.6) as i32
        } else {
            (VOLUME_WEIGHT as f64 * 0.3) as i32
        }
    }

    fn trend_component(close: f64, sma20: f64, sma50: f64, reasons: &mut Vec<String>) -> i32 {
        if close > sma20 && sma20 > sma50 {
            reasons.push("uptrend confirmed, price above SMA20 above SMA50".into());
            TREND_WEIGHT
        } else if close > sma20 {
            (TREND_WEIGHT as f64 * 0.5) as i32
        } else {
            0
        }
    }

    fn breakout_bonus(close: f64, upper: f64, volume_ratio: f64, reasons: &mut Vec<String>) -> i32 {
        if close > upper && volume_ratio >= 1.5 {
            reasons.push("breakout above upper Bollinger band on volume".into());
            BREAKOUT_BONUS
        } else {
            0
        }
    }
}

impl Strategy for RubricStrategy {
    fn name(&self) -> &str {
        "rubric"
    }

    fn analyze(&self, ctx: &AnalysisContext) -> Option<ScoredSignal> {
        let ind = &ctx.indicators;
        let mut reasons = Vec::new();

        let mut score = 0;
        score += Self::rsi_component(ind.rsi14, &mut reasons);
        score += Self::bollinger_component(ind.close, ind.bb_upper, ind.bb_lower, ind.bb_middle, &mut reasons);
        score += Self::macd_component(ind.macd_line, ind.macd_signal, ind.macd_histogram, &mut reasons);
        score += Self::volume_component(ind.volume_ratio, &mut reasons);
        score += Self::trend_component(ind.close, ind.sma20, ind.sma50, &mut reasons);
        score += Self::breakout_bonus(ind.close, ind.bb_upper, ind.volume_ratio, &mut reasons);

        let score = score.clamp(0, 100);
        if score < self.threshold() {
            return None;
        }
        Some(ScoredSignal { score, reasons })
    }

    fn threshold(&self) -> i32 {
        45
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signal_generator::indicators::IndicatorSnapshot;
    use crate::domain::market::Market;
    use crate::domain::types::{Regime, RegimeKind};
    use rust_decimal_macros::dec;

    fn bullish_indicators() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 110.0,
            rsi14: 58.0,
            bb_upper: 115.0,
            bb_middle: 105.0,
            bb_lower: 95.0,
            macd_line: 1.2,
            macd_signal: 0.8,
            macd_histogram: 0.4,
            sma20: 107.0,
            sma50: 100.0,
            ema12: 108.0,
            ema26: 104.0,
            atr14: 2.0,
            volume_ratio: 1.8,
        }
    }

    fn ctx(indicators: IndicatorSnapshot) -> AnalysisContext {
        AnalysisContext {
            symbol: "AAPL.US".into(),
            price: dec!(110),
            indicators,
            regime: Regime { regime: RegimeKind::Bull, details: String::new(), active_market: Market::Us },
        }
    }

    #[test]
    fn strong_confluence_scores_high_with_reasons() {
        let strategy = RubricStrategy::new();
        let verdict = strategy.analyze(&ctx(bullish_indicators())).expect("should score above threshold");
        assert!(verdict.score >= 70, "expected a strong score, got {}", verdict.score);
        assert!(!verdict.reasons.is_empty());
    }

    #[test]
    fn overbought_weak_setup_fails_threshold() {
        let mut weak = bullish_indicators();
        weak.rsi14 = 82.0;
        weak.macd_line = -0.1;
        weak.macd_signal = 0.1;
        weak.volume_ratio = 0.8;
        weak.close = weak.sma20 - 1.0;
        let strategy = RubricStrategy::new();
        assert!(strategy.analyze(&ctx(weak)).is_none());
    }
}
