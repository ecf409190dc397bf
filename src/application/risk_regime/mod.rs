//! Regime classification and budget/sizing policy (spec.md §4.5).
//!
//! Grounded on the original system's `risk/regime.py` `RegimeClassifier`:
//! vote index symbols bullish/bearish against their moving average, with
//! inverse indicators (VIX) contributing an inverted vote, filtered to
//! symbols whose market is currently in session.

pub mod budget;
pub mod cooldown;

use crate::config::RegimeEnvConfig;
use crate::domain::market::Market;
use crate::domain::ports::{AdjustType, QuoteGateway};
use crate::domain::types::{Regime, RegimeKind};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RegimeClassifier<Q: QuoteGateway> {
    quotes: Arc<Q>,
    config: RegimeEnvConfig,
}

/// `^`-prefixed indicators like `^VIX` carry no market suffix; they vote
/// alongside the US session since that is where they trade.
fn effective_market(symbol: &str) -> Market {
    match Market::from_symbol(symbol) {
        Market::None => Market::Us,
        other => other,
    }
}

impl<Q: QuoteGateway> RegimeClassifier<Q> {
    pub fn new(quotes: Arc<Q>, config: RegimeEnvConfig) -> Self {
        Self { quotes, config }
    }

    /// Vote every configured index/inverse symbol whose market is currently
    /// in session; defaults to RANGE with a note if none are obtainable.
    pub async fn classify(&self) -> Regime {
        let mut bullish_votes = 0u32;
        let mut total_votes = 0u32;
        let mut active_market = Market::None;

        let all_symbols = self
            .config
            .index_symbols
            .iter()
            .map(|s| (s, false))
            .chain(self.config.inverse_symbols.iter().map(|s| (s, true)));

        for (symbol, is_inverse) in all_symbols {
            let market = effective_market(symbol);
            if !crate::domain::market::is_open(market, Utc::now()) {
                continue;
            }

            let history_len = self.config.ma_period + 20;
            let candles = match self.quotes.get_candlesticks(symbol, history_len, AdjustType::Forward).await {
                Ok(c) if c.len() >= self.config.ma_period => c,
                Ok(_) => {
                    warn!(symbol, "insufficient candle history for regime classification");
                    continue;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "failed to fetch candles for regime classification");
                    continue;
                }
            };

            let window = &candles[candles.len() - self.config.ma_period..];
            let ma: rust_decimal::Decimal =
                window.iter().map(|c| c.close).sum::<rust_decimal::Decimal>() / rust_decimal::Decimal::from(self.config.ma_period as u64);
            let last_close = candles.last().expect("checked len above").close;

            let bullish = if is_inverse { last_close < ma } else { last_close >= ma };
            total_votes += 1;
            if bullish {
                bullish_votes += 1;
            }
            active_market = market;
        }

        if total_votes == 0 {
            return Regime {
                regime: RegimeKind::Range,
                details: "no index data obtainable (off-session or fetch failure), defaulting to RANGE".into(),
                active_market: Market::None,
            };
        }

        let pct_bullish = bullish_votes as f64 / total_votes as f64;
        let regime = if pct_bullish >= 0.60 {
            RegimeKind::Bull
        } else if pct_bullish <= 0.40 {
            RegimeKind::Bear
        } else {
            RegimeKind::Range
        };
        let details = format!("{bullish_votes}/{total_votes} bullish votes ({:.0}%)", pct_bullish * 100.0);
        info!(regime = %regime, %details, "regime classified");
        Regime { regime, details, active_market }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::GatewayError;
    use crate::domain::ports::{Candle, StaticInfo};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct FixedQuotes {
        by_symbol: HashMap<String, Vec<Decimal>>,
    }

    #[async_trait]
    impl QuoteGateway for FixedQuotes {
        async fn get_realtime_quote(&self, _symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
            Ok(HashMap::new())
        }
        async fn get_history_candles(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _adjust: AdjustType,
        ) -> Result<Vec<Candle>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_candlesticks(&self, symbol: &str, count: usize, _adjust: AdjustType) -> Result<Vec<Candle>, GatewayError> {
            let closes = self.by_symbol.get(symbol).cloned().unwrap_or_default();
            Ok(closes
                .into_iter()
                .take(count)
                .map(|close| Candle {
                    symbol: symbol.to_string(),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: dec!(1_000_000),
                    trade_date: Utc::now(),
                })
                .collect())
        }
        async fn get_static_info(&self, _symbols: &[String]) -> Result<HashMap<String, StaticInfo>, GatewayError> {
            Ok(HashMap::new())
        }
    }

    fn flat_series(value: Decimal, n: usize) -> Vec<Decimal> {
        std::iter::repeat_n(value, n).collect()
    }

    #[tokio::test]
    async fn defaults_to_range_when_no_data_obtainable() {
        let quotes = Arc::new(FixedQuotes { by_symbol: HashMap::new() });
        let config = RegimeEnvConfig {
            index_symbols: vec!["QQQ.US".into()],
            inverse_symbols: vec![],
            ma_period: 5,
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
        };
        let classifier = RegimeClassifier::new(quotes, config);
        let regime = classifier.classify().await;
        assert_eq!(regime.regime, RegimeKind::Range);
        assert!(regime.details.contains("no index data"));
    }
}
