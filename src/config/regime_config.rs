use super::queue_config::env_parse;
use std::env;

/// Regime classifier inputs and exit-mapping policy (spec.md §4.4, §4.5, §6).
#[derive(Debug, Clone)]
pub struct RegimeEnvConfig {
    pub index_symbols: Vec<String>,
    pub inverse_symbols: Vec<String>,
    pub ma_period: usize,

    pub exit_score_adjustment_enabled: bool,
    pub gradual_exit_enabled: bool,
    pub gradual_exit_threshold_25: i32,
    pub gradual_exit_threshold_50: i32,

    pub add_position_enabled: bool,
    pub add_position_min_profit_pct: rust_decimal::Decimal,
    pub add_position_min_signal_score: i32,
    pub add_position_pct: rust_decimal::Decimal,
    pub add_position_cooldown_minutes: i64,

    pub realtime_rotation_enabled: bool,
    pub realtime_rotation_min_signal_score: i32,
    pub realtime_rotation_min_score_diff: i32,
}

fn split_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl RegimeEnvConfig {
    pub fn from_env() -> Self {
        use rust_decimal::Decimal;

        let index_symbols =
            split_symbols(&env::var("REGIME_INDEX_SYMBOLS").unwrap_or_else(|_| "QQQ.US,HSI.HK".into()));
        let inverse_symbols =
            split_symbols(&env::var("REGIME_INVERSE_SYMBOLS").unwrap_or_else(|_| "^VIX".into()));

        Self {
            index_symbols,
            inverse_symbols,
            ma_period: env_parse("REGIME_MA_PERIOD", 200),

            exit_score_adjustment_enabled: env_parse("REGIME_EXIT_SCORE_ADJUSTMENT", true),
            gradual_exit_enabled: env_parse("GRADUAL_EXIT_ENABLED", true),
            gradual_exit_threshold_25: env_parse("GRADUAL_EXIT_THRESHOLD_25", 40),
            gradual_exit_threshold_50: env_parse("GRADUAL_EXIT_THRESHOLD_50", 50),

            add_position_enabled: env_parse("ADD_POSITION_ENABLED", true),
            add_position_min_profit_pct: env_parse::<f64>("ADD_POSITION_MIN_PROFIT_PCT", 2.0)
                .try_into()
                .unwrap_or(Decimal::new(2, 0)),
            add_position_min_signal_score: env_parse("ADD_POSITION_MIN_SIGNAL_SCORE", 60),
            add_position_pct: env_parse::<f64>("ADD_POSITION_PCT", 5.0)
                .try_into()
                .unwrap_or(Decimal::new(5, 0)),
            add_position_cooldown_minutes: env_parse("ADD_POSITION_COOLDOWN_MINUTES", 60),

            realtime_rotation_enabled: env_parse("REALTIME_ROTATION_ENABLED", true),
            realtime_rotation_min_signal_score: env_parse("REALTIME_ROTATION_MIN_SIGNAL_SCORE", 75),
            realtime_rotation_min_score_diff: env_parse("REALTIME_ROTATION_MIN_SCORE_DIFF", 20),
        }
    }
}

/// Chandelier/Donchian soft-exit engine parameters (spec.md §6 `SOFT_EXIT_*`).
#[derive(Debug, Clone)]
pub struct SoftExitEnvConfig {
    pub enabled: bool,
    pub atr_period: usize,
    pub chandelier_k: f64,
    pub donchian_n: usize,
    pub poll_interval_secs: u64,
    pub signal_cooldown_secs: i64,
}

impl SoftExitEnvConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_parse("SOFT_EXIT_ENABLED", true),
            atr_period: env_parse("SOFT_EXIT_ATR_PERIOD", 22),
            chandelier_k: env_parse("SOFT_EXIT_CHANDELIER_K", 3.0),
            donchian_n: env_parse("SOFT_EXIT_DONCHIAN_N", 20),
            poll_interval_secs: env_parse("SOFT_EXIT_POLL_INTERVAL", 60),
            signal_cooldown_secs: env_parse("SOFT_EXIT_SIGNAL_COOLDOWN", 900),
        }
    }
}
