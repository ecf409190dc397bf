//! Position sizing: base score→pct curve, regime scale/reserve, and the
//! Kelly overlay ceiling (spec.md §4.3 step 6).
//!
//! Percentages are plain `f64` per §9 Numerics ("percentages are doubles");
//! only the resulting notional is converted to `Decimal` money.

use crate::config::ExecutionEnvConfig;
use crate::domain::types::RegimeKind;
use rust_decimal::Decimal;

/// Piecewise-linear base budget percentage (as a fraction, e.g. `0.2005` for 20.05%).
pub fn base_pct(score: i32) -> f64 {
    let score = score as f64;
    let pct = if score >= 80.0 {
        20.0 + (score - 80.0) / 400.0
    } else if score >= 60.0 {
        15.0 + (score - 60.0) * 0.07 / 20.0
    } else if score >= 45.0 {
        5.0 + (score - 45.0) * 0.05 / 14.0
    } else {
        5.0
    };
    pct / 100.0
}

pub fn regime_scale(regime: RegimeKind) -> f64 {
    match regime {
        RegimeKind::Bull => 1.00,
        RegimeKind::Range => 0.70,
        RegimeKind::Bear => 0.40,
    }
}

/// Fraction of net assets withheld from sizing, by regime.
pub fn regime_reserve_pct(regime: RegimeKind) -> f64 {
    match regime {
        RegimeKind::Bull => 0.15,
        RegimeKind::Range => 0.30,
        RegimeKind::Bear => 0.50,
    }
}

/// Kelly overlay, gated by minimum sample size and win rate, scaled down by
/// a conservative factor, and hard-capped. Returns `None` when the gate
/// isn't met — the caller then sizes without a Kelly ceiling.
pub fn kelly_fraction(win_rate_pct: f64, payoff_ratio: f64, trades: u32, config: &ExecutionEnvConfig) -> Option<f64> {
    let min_winrate_pct: f64 = config.kelly_min_winrate.try_into().unwrap_or(60.0);
    if trades < config.kelly_min_trades || win_rate_pct < min_winrate_pct || payoff_ratio <= 0.0 {
        return None;
    }
    let win_rate = win_rate_pct / 100.0;
    let kelly = win_rate - (1.0 - win_rate) / payoff_ratio;
    if kelly <= 0.0 {
        return Some(0.0);
    }
    let conservative_factor: f64 = config.kelly_conservative_factor.try_into().unwrap_or(0.4);
    let hard_cap_pct: f64 = config.kelly_hard_cap_pct.try_into().unwrap_or(20.0);
    let scaled = kelly * conservative_factor;
    Some(scaled.min(hard_cap_pct / 100.0))
}

/// `min(base·scale, net_assets·(1-reserve), kelly)` per §4.3 step 6, as a notional.
pub fn buy_budget_notional(score: i32, regime: RegimeKind, net_assets: Decimal, kelly_pct: Option<f64>) -> Decimal {
    let base = base_pct(score) * regime_scale(regime);
    let reserve = regime_reserve_pct(regime);

    let base_notional = net_assets * Decimal::try_from(base).unwrap_or(Decimal::ZERO);
    let reserve_cap = net_assets * Decimal::try_from(1.0 - reserve).unwrap_or(Decimal::ONE);

    let mut floor = base_notional.min(reserve_cap);
    if let Some(k) = kelly_pct {
        let kelly_notional = net_assets * Decimal::try_from(k).unwrap_or(Decimal::ZERO);
        floor = floor.min(kelly_notional);
    }
    floor.max(Decimal::ZERO)
}

/// SELL size as a fraction of available quantity: full unless the signal
/// specifies a partial exit (§4.3 step 6).
pub fn sell_fraction(signal_type: crate::domain::types::SignalType) -> Decimal {
    use crate::domain::types::SignalType::*;
    use rust_decimal_macros::dec;
    match signal_type {
        GradualExit => dec!(0.25),
        PartialExit => dec!(0.50),
        _ => dec!(1.0),
    }
}
