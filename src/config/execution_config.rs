use super::queue_config::env_parse;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Order executor sizing, lot/tick, and margin-aware cash-check policy
/// (spec.md §4.3 steps 6-8).
#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    pub price_deviation_pct: Decimal,
    pub min_usable_funds: Decimal,
    pub fee_pct: Decimal,

    pub kelly_min_trades: u32,
    pub kelly_min_winrate: Decimal,
    pub kelly_conservative_factor: Decimal,
    pub kelly_hard_cap_pct: Decimal,

    pub same_side_same_day_cap: u32,
    pub external_call_timeout_secs: u64,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Self {
        Self {
            price_deviation_pct: env_parse::<f64>("PRICE_DEVIATION_PCT", 1.0)
                .try_into()
                .unwrap_or(dec!(1.0)),
            min_usable_funds: env_parse::<f64>("MIN_USABLE_FUNDS", 1000.0)
                .try_into()
                .unwrap_or(dec!(1000)),
            fee_pct: env_parse::<f64>("FEE_PCT", 0.1)
                .try_into()
                .unwrap_or(dec!(0.1)),
            kelly_min_trades: env_parse("KELLY_MIN_TRADES", 15),
            kelly_min_winrate: env_parse::<f64>("KELLY_MIN_WINRATE", 60.0)
                .try_into()
                .unwrap_or(dec!(60)),
            kelly_conservative_factor: env_parse::<f64>("KELLY_CONSERVATIVE_FACTOR", 0.4)
                .try_into()
                .unwrap_or(dec!(0.4)),
            kelly_hard_cap_pct: env_parse::<f64>("KELLY_HARD_CAP_PCT", 20.0)
                .try_into()
                .unwrap_or(dec!(20)),
            same_side_same_day_cap: env_parse("SAME_SIDE_SAME_DAY_CAP", 1),
            external_call_timeout_secs: env_parse("EXTERNAL_CALL_TIMEOUT_SECS", 10),
        }
    }
}

/// Intelligent backup conditional order risk-score weights and thresholds
/// (spec.md §4.3.1, §6).
#[derive(Debug, Clone)]
pub struct BackupOrderEnvConfig {
    pub atr_weight: i32,
    pub atr_ratio_high: Decimal,
    pub atr_ratio_medium: Decimal,
    pub atr_ratio_low: Decimal,

    pub price_weight: i32,
    pub signal_weight: i32,
    pub weak_signal_threshold: i32,
    pub stop_loss_weight: i32,
    pub wide_stop_loss_pct: Decimal,

    pub risk_threshold: i32,
    pub high_value_threshold: Decimal,
}

impl BackupOrderEnvConfig {
    pub fn from_env() -> Self {
        Self {
            atr_weight: env_parse("BACKUP_ATR_WEIGHT", 40),
            atr_ratio_high: env_parse::<f64>("BACKUP_ATR_RATIO_HIGH", 0.03).try_into().unwrap_or(dec!(0.03)),
            atr_ratio_medium: env_parse::<f64>("BACKUP_ATR_RATIO_MEDIUM", 0.02).try_into().unwrap_or(dec!(0.02)),
            atr_ratio_low: env_parse::<f64>("BACKUP_ATR_RATIO_LOW", 0.015).try_into().unwrap_or(dec!(0.015)),
            price_weight: env_parse("BACKUP_PRICE_WEIGHT", 20),
            signal_weight: env_parse("BACKUP_SIGNAL_WEIGHT", 20),
            weak_signal_threshold: env_parse("BACKUP_WEAK_SIGNAL_THRESHOLD", 60),
            stop_loss_weight: env_parse("BACKUP_STOP_LOSS_WEIGHT", 20),
            wide_stop_loss_pct: env_parse::<f64>("BACKUP_WIDE_STOP_LOSS_PCT", 0.05).try_into().unwrap_or(dec!(0.05)),
            risk_threshold: env_parse("BACKUP_RISK_THRESHOLD", 60),
            high_value_threshold: env_parse::<f64>("BACKUP_HIGH_VALUE_THRESHOLD", 50000.0)
                .try_into()
                .unwrap_or(dec!(50000)),
        }
    }
}

/// SG scan cadence and hybrid-candle sourcing (spec.md §4.4, §6).
#[derive(Debug, Clone)]
pub struct SignalGeneratorEnvConfig {
    pub poll_interval_secs: u64,
    pub use_db_klines: bool,
    pub db_klines_history_days: u32,
    pub api_klines_latest_days: u32,
    pub rotation_check_interval_secs: u64,
    pub failed_salvage_interval_secs: u64,
    pub failed_salvage_max_age_secs: i64,
}

impl SignalGeneratorEnvConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: env_parse("POLL_INTERVAL", 60),
            use_db_klines: env_parse("USE_DB_KLINES", true),
            db_klines_history_days: env_parse("DB_KLINES_HISTORY_DAYS", 90),
            api_klines_latest_days: env_parse("API_KLINES_LATEST_DAYS", 3),
            rotation_check_interval_secs: env_parse("ROTATION_CHECK_INTERVAL_SECS", 30),
            failed_salvage_interval_secs: env_parse("FAILED_SALVAGE_INTERVAL_SECS", 300),
            failed_salvage_max_age_secs: env_parse("FAILED_SALVAGE_MAX_AGE_SECS", 86_400),
        }
    }
}
