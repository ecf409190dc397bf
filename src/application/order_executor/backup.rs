//! Intelligent Backup Conditional Order risk scoring (spec.md §4.3.1).
//!
//! Grounded on the original's `execution/backup_orders.py` risk-weighted
//! gate: a GTC stop-market is placed after a BUY only when the computed
//! risk score clears a threshold, or the position is simply large. The
//! per-factor breakdown in `RiskAssessment` (spec.md §11 supplemented
//! feature) makes that gate auditable instead of a bare number.

use crate::config::BackupOrderEnvConfig;
use crate::domain::market::Market;
use rust_decimal::Decimal;

/// One weighted contributor to a backup order's risk score, named so the
/// decision can be logged and understood after the fact.
#[derive(Debug, Clone)]
pub struct RiskFactor {
    pub name: &'static str,
    pub weight: i32,
}

/// Risk-weighted gate outcome for one BUY fill, with the named breakdown
/// that produced `risk_score` (spec.md §11).
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub risk_score: i32,
    pub factors: Vec<RiskFactor>,
    pub reason: String,
    pub should_backup: bool,
}

fn atr_component(config: &BackupOrderEnvConfig, atr_to_price_ratio: Decimal) -> i32 {
    if atr_to_price_ratio >= config.atr_ratio_high {
        config.atr_weight
    } else if atr_to_price_ratio >= config.atr_ratio_medium {
        (config.atr_weight as f64 * 0.625) as i32 // 25/40 of the default weight
    } else if atr_to_price_ratio >= config.atr_ratio_low {
        (config.atr_weight as f64 * 0.375) as i32 // 15/40 of the default weight
    } else {
        0
    }
}

fn price_extreme(market: Market, price: Decimal) -> bool {
    match market {
        Market::Hk => price > Decimal::from(100) || price < Decimal::ONE,
        Market::Us | Market::None => price > Decimal::from(500) || price < Decimal::from(5),
    }
}

/// `risk_score` components, each already scaled into its own weight so the
/// caller just sums them (spec.md §4.3.1).
pub fn risk_score(
    config: &BackupOrderEnvConfig,
    atr_to_price_ratio: Decimal,
    market: Market,
    price: Decimal,
    signal_score: i32,
    stop_loss_width_pct: Decimal,
) -> i32 {
    let atr_component = atr_component(config, atr_to_price_ratio);
    let price_component = if price_extreme(market, price) { config.price_weight } else { 0 };
    let signal_component = if signal_score < config.weak_signal_threshold { config.signal_weight } else { 0 };
    let stop_component = if stop_loss_width_pct > config.wide_stop_loss_pct { config.stop_loss_weight } else { 0 };

    (atr_component + price_component + signal_component + stop_component).clamp(0, 100)
}

/// Whether a backup conditional order should be submitted: the risk score
/// clears `risk_threshold`, or the position notional alone is large enough
/// to warrant one regardless of score.
pub fn should_submit(config: &BackupOrderEnvConfig, score: i32, position_notional: Decimal) -> bool {
    score >= config.risk_threshold || position_notional > config.high_value_threshold
}

/// Score a BUY fill and return the full named breakdown alongside the
/// backup-or-not verdict, so every backup decision can be logged with its
/// reasoning (spec.md §11).
pub fn assess(
    config: &BackupOrderEnvConfig,
    atr_to_price_ratio: Decimal,
    market: Market,
    price: Decimal,
    signal_score: i32,
    stop_loss_width_pct: Decimal,
    position_notional: Decimal,
) -> RiskAssessment {
    let mut factors = Vec::with_capacity(4);
    let atr = atr_component(config, atr_to_price_ratio);
    factors.push(RiskFactor { name: "atr_ratio", weight: atr });

    let price_extreme = price_extreme(market, price);
    factors.push(RiskFactor { name: "price_level", weight: if price_extreme { config.price_weight } else { 0 } });

    let weak_signal = signal_score < config.weak_signal_threshold;
    factors.push(RiskFactor { name: "signal_strength", weight: if weak_signal { config.signal_weight } else { 0 } });

    let wide_stop = stop_loss_width_pct > config.wide_stop_loss_pct;
    factors.push(RiskFactor { name: "stop_loss_width", weight: if wide_stop { config.stop_loss_weight } else { 0 } });

    let risk_score: i32 = factors.iter().map(|f| f.weight).sum::<i32>().clamp(0, 100);
    let large_position = position_notional > config.high_value_threshold;
    let should_backup = risk_score >= config.risk_threshold || large_position;

    let mut active: Vec<&str> = factors.iter().filter(|f| f.weight > 0).map(|f| f.name).collect();
    if large_position {
        active.push("position_size");
    }
    let reason = if active.is_empty() {
        "no risk factors triggered".to_string()
    } else {
        format!("triggered by {}", active.join(", "))
    };

    RiskAssessment { risk_score, factors, reason, should_backup }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> BackupOrderEnvConfig {
        BackupOrderEnvConfig {
            atr_weight: 40,
            atr_ratio_high: dec!(0.03),
            atr_ratio_medium: dec!(0.02),
            atr_ratio_low: dec!(0.015),
            price_weight: 20,
            signal_weight: 20,
            weak_signal_threshold: 60,
            stop_loss_weight: 20,
            wide_stop_loss_pct: dec!(0.05),
            risk_threshold: 60,
            high_value_threshold: dec!(50000),
        }
    }

    #[test]
    fn high_atr_ratio_maxes_out_its_component() {
        let score = risk_score(&config(), dec!(0.035), Market::Us, dec!(50), 80, dec!(0.02));
        assert_eq!(score, 40);
    }

    #[test]
    fn all_factors_combine_above_threshold() {
        let score = risk_score(&config(), dec!(0.035), Market::Hk, dec!(150), 40, dec!(0.08));
        assert_eq!(score, 100);
        assert!(should_submit(&config(), score, dec!(1000)));
    }

    #[test]
    fn large_position_triggers_backup_regardless_of_score() {
        assert!(should_submit(&config(), 0, dec!(60_000)));
    }

    #[test]
    fn low_risk_small_position_skips_backup() {
        let score = risk_score(&config(), dec!(0.005), Market::Us, dec!(50), 80, dec!(0.02));
        assert_eq!(score, 0);
        assert!(!should_submit(&config(), score, dec!(1000)));
    }

    #[test]
    fn assess_matches_risk_score_and_names_every_triggered_factor() {
        let assessment = assess(&config(), dec!(0.035), Market::Hk, dec!(150), 40, dec!(0.08), dec!(1000));
        assert_eq!(assessment.risk_score, 100);
        assert!(assessment.should_backup);
        assert!(assessment.reason.contains("atr_ratio"));
        assert!(assessment.reason.contains("price_level"));
        assert!(assessment.reason.contains("signal_strength"));
        assert!(assessment.reason.contains("stop_loss_width"));
    }

    #[test]
    fn assess_flags_position_size_even_with_zero_score() {
        let assessment = assess(&config(), dec!(0.005), Market::Us, dec!(50), 80, dec!(0.02), dec!(60_000));
        assert_eq!(assessment.risk_score, 0);
        assert!(assessment.should_backup);
        assert_eq!(assessment.reason, "triggered by position_size");
    }

    #[test]
    fn assess_reports_no_factors_when_clean() {
        let assessment = assess(&config(), dec!(0.005), Market::Us, dec!(50), 80, dec!(0.02), dec!(1000));
        assert_eq!(assessment.risk_score, 0);
        assert!(!assessment.should_backup);
        assert_eq!(assessment.reason, "no risk factors triggered");
    }
}
