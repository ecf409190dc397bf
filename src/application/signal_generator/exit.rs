//! Exit evaluation, regime adjustment, and action mapping (spec.md §4.4
//! "Exit evaluation" / "Regime adjustment" / "Action mapping").

use crate::application::signal_generator::indicators::IndicatorSnapshot;
use crate::config::RegimeEnvConfig;
use crate::domain::types::{PositionStop, RegimeKind, SignalType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const DETERIORATION_RSI_WEIGHT: i32 = 25;
const DETERIORATION_MACD_WEIGHT: i32 = 25;
const DETERIORATION_TREND_WEIGHT: i32 = 25;
const DETERIORATION_BAND_WEIGHT: i32 = 15;
/// Time-in-trade decay: +2 points per day held past this horizon, capped.
const TIME_DECAY_FREE_DAYS: i64 = 5;
const TIME_DECAY_PER_DAY: i32 = 2;
const TIME_DECAY_CAP: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Hold,
    GradualExit,
    PartialExit,
    FullExit(SignalType),
}

#[derive(Debug, Clone)]
pub struct ExitVerdict {
    pub score: i32,
    pub reasons: Vec<String>,
    pub action: ExitAction,
}

fn technical_deterioration(close: Decimal, indicators: &IndicatorSnapshot, reasons: &mut Vec<String>) -> i32 {
    let mut score = 0;
    if indicators.rsi14 > 75.0 {
        reasons.push(format!("RSI {:.1} overbought", indicators.rsi14));
        score += DETERIORATION_RSI_WEIGHT;
    }
    if indicators.macd_line < indicators.macd_signal && indicators.macd_histogram < 0.0 {
        reasons.push("MACD bearish cross".into());
        score += DETERIORATION_MACD_WEIGHT;
    }
    let close_f64 = close.to_f64().unwrap_or(indicators.close);
    if close_f64 < indicators.sma20 && close_f64 < indicators.sma50 {
        reasons.push("price below SMA20 and SMA50".into());
        score += DETERIORATION_TREND_WEIGHT;
    }
    if close_f64 > indicators.bb_upper {
        reasons.push("Bollinger upper band break without reversal".into());
        score += DETERIORATION_BAND_WEIGHT;
    }
    score
}

fn time_decay(added_at: DateTime<Utc>, reasons: &mut Vec<String>) -> i32 {
    let days_held = (Utc::now() - added_at).num_days();
    let over = (days_held - TIME_DECAY_FREE_DAYS).max(0);
    let decay = (over as i32 * TIME_DECAY_PER_DAY).min(TIME_DECAY_CAP);
    if decay > 0 {
        reasons.push(format!("held {days_held}d, time-in-trade decay"));
    }
    decay
}

fn regime_adjustment(regime: RegimeKind) -> i32 {
    match regime {
        RegimeKind::Bull => -10,
        RegimeKind::Bear => 15,
        RegimeKind::Range => 0,
    }
}

/// Score a held position for exit and map the score to an action, per
/// spec.md §4.4. `stop` is `None` when no stop/target has been recorded yet
/// (position opened before a stop could be written, or stop tracking
/// disabled) — hard stop-loss/take-profit checks are then skipped.
pub fn evaluate(
    close: Decimal,
    indicators: &IndicatorSnapshot,
    stop: Option<&PositionStop>,
    position_added_at: DateTime<Utc>,
    regime: RegimeKind,
    regime_config: &RegimeEnvConfig,
) -> ExitVerdict {
    let mut reasons = Vec::new();

    if let Some(stop) = stop {
        if close <= stop.stop_loss {
            reasons.push(format!("stop-loss hit at {close} (stop {})", stop.stop_loss));
            return ExitVerdict { score: 100, reasons, action: ExitAction::FullExit(SignalType::StopLoss) };
        }
        if close >= stop.take_profit {
            reasons.push(format!("take-profit hit at {close} (target {})", stop.take_profit));
            return ExitVerdict { score: 100, reasons, action: ExitAction::FullExit(SignalType::TakeProfit) };
        }
    }

    let mut score = technical_deterioration(close, indicators, &mut reasons);
    score += time_decay(position_added_at, &mut reasons);

    if regime_config.exit_score_adjustment_enabled {
        score += regime_adjustment(regime);
    }
    // Upper-bounded only: a negative score after a BULL adjustment is
    // meaningful "extra healthy" signal consumed by add-position's
    // `exit_score > -30` gate (spec.md §4.4).
    let score = score.min(100);

    let action = if score >= 70 {
        ExitAction::FullExit(SignalType::StopLoss)
    } else if score >= regime_config.gradual_exit_threshold_50 {
        if regime_config.gradual_exit_enabled {
            ExitAction::PartialExit
        } else {
            ExitAction::FullExit(SignalType::StopLoss)
        }
    } else if score >= regime_config.gradual_exit_threshold_25 {
        ExitAction::GradualExit
    } else {
        ExitAction::Hold
    };

    ExitVerdict { score, reasons, action }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> RegimeEnvConfig {
        RegimeEnvConfig {
            index_symbols: vec![],
            inverse_symbols: vec![],
            ma_period: 200,
            exit_score_adjustment_enabled: true,
            gradual_exit_enabled: true,
            gradual_exit_threshold_25: 40,
            gradual_exit_threshold_50: 50,
            add_position_enabled: true,
            add_position_min_profit_pct: dec!(2),
            add_position_min_signal_score: 60,
            add_position_pct: dec!(5),
            add_position_cooldown_minutes: 60,
            realtime_rotation_enabled: true,
            realtime_rotation_min_signal_score: 75,
            realtime_rotation_min_score_diff: 20,
        }
    }

    fn healthy_indicators() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 110.0,
            rsi14: 55.0,
            bb_upper: 120.0,
            bb_middle: 110.0,
            bb_lower: 100.0,
            macd_line: 1.0,
            macd_signal: 0.5,
            macd_histogram: 0.5,
            sma20: 108.0,
            sma50: 104.0,
            ema12: 109.0,
            ema26: 106.0,
            atr14: 1.5,
            volume_ratio: 1.1,
        }
    }

    #[test]
    fn stop_loss_hit_is_a_full_exit_regardless_of_indicators() {
        let stop = PositionStop::from_fill("AAPL.US", dec!(100), None, dec!(2));
        let verdict = evaluate(dec!(94), &healthy_indicators(), Some(&stop), Utc::now(), RegimeKind::Bull, &config());
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.action, ExitAction::FullExit(SignalType::StopLoss));
    }

    #[test]
    fn take_profit_hit_is_a_full_exit() {
        let stop = PositionStop::from_fill("AAPL.US", dec!(100), None, dec!(2));
        let verdict = evaluate(dec!(111), &healthy_indicators(), Some(&stop), Utc::now(), RegimeKind::Bull, &config());
        assert_eq!(verdict.action, ExitAction::FullExit(SignalType::TakeProfit));
    }

    #[test]
    fn healthy_position_in_bull_regime_holds() {
        let verdict = evaluate(dec!(110), &healthy_indicators(), None, Utc::now(), RegimeKind::Bull, &config());
        assert_eq!(verdict.action, ExitAction::Hold);
    }

    #[test]
    fn bear_regime_pushes_a_borderline_position_toward_exit() {
        let mut deteriorating = healthy_indicators();
        deteriorating.rsi14 = 80.0;
        deteriorating.macd_line = -0.2;
        deteriorating.macd_signal = 0.1;
        deteriorating.macd_histogram = -0.3;
        let bull = evaluate(dec!(110), &deteriorating, None, Utc::now(), RegimeKind::Bull, &config());
        let bear = evaluate(dec!(110), &deteriorating, None, Utc::now(), RegimeKind::Bear, &config());
        assert!(bear.score > bull.score, "BEAR should score worse than BULL for the same deterioration");
    }

    #[test]
    fn gradual_exit_band_sells_first_wave() {
        let mut mild = healthy_indicators();
        mild.rsi14 = 80.0; // +25 deterioration, regime RANGE -> no adjustment
        let verdict = evaluate(dec!(110), &mild, None, Utc::now(), RegimeKind::Range, &config());
        assert_eq!(verdict.score, 25);
        assert_eq!(verdict.action, ExitAction::Hold);
    }
}
