//! Hybrid candle sourcing: long tail from the local store joined with the
//! latest K days from the gateway, de-duplicated by trade-date preferring
//! the freshest source on overlap (spec.md §4.4).
//!
//! Grounded on the original's `data/hybrid_klines.py` merge rule (via
//! SPEC_FULL.md §11): the gateway window always wins on overlap, since it
//! reflects the most recent print.

use crate::config::SignalGeneratorEnvConfig;
use crate::domain::errors::GatewayError;
use crate::domain::ports::{AdjustType, Candle, HistoryStore, QuoteGateway};
use std::collections::BTreeMap;

/// Merge `local` (long history, typically 90d) with `fresh` (latest K days
/// from the gateway), keyed by trade-date. On a date present in both,
/// `fresh` wins. The result is sorted ascending by trade-date.
pub fn merge(local: Vec<Candle>, fresh: Vec<Candle>) -> Vec<Candle> {
    let mut by_date: BTreeMap<chrono::NaiveDate, Candle> = BTreeMap::new();
    for candle in local {
        by_date.insert(candle.trade_date.date_naive(), candle);
    }
    for candle in fresh {
        by_date.insert(candle.trade_date.date_naive(), candle);
    }
    by_date.into_values().collect()
}

/// Fetch and merge per `SignalGeneratorEnvConfig`'s `use_db_klines` toggle
/// and day windows. When the local store is disabled or fails, falls back
/// to the gateway window alone rather than failing the whole scan.
pub async fn fetch_hybrid<H, Q>(
    history: Option<&H>,
    quotes: &Q,
    symbol: &str,
    config: &SignalGeneratorEnvConfig,
) -> Result<Vec<Candle>, GatewayError>
where
    H: HistoryStore + ?Sized,
    Q: QuoteGateway + ?Sized,
{
    let fresh = quotes
        .get_candlesticks(symbol, (config.api_klines_latest_days as usize).max(1), AdjustType::Forward)
        .await?;

    let local = match (config.use_db_klines, history) {
        (true, Some(store)) => store.recent_candles(symbol, config.db_klines_history_days).await.unwrap_or_else(|e| {
            tracing::warn!(symbol, error = %e, "local kline history unavailable, using gateway window only");
            Vec::new()
        }),
        _ => Vec::new(),
    };

    Ok(merge(local, fresh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(day: u32, close: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: "AAPL.US".into(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000),
            trade_date: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn fresh_wins_on_overlapping_date() {
        let local = vec![candle(1, dec!(100)), candle(2, dec!(101))];
        let fresh = vec![candle(2, dec!(999)), candle(3, dec!(102))];
        let merged = merge(local, fresh);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].close, dec!(999));
    }

    #[test]
    fn result_is_sorted_ascending_by_trade_date() {
        let merged = merge(vec![candle(3, dec!(1)), candle(1, dec!(1))], vec![candle(2, dec!(1))]);
        let dates: Vec<_> = merged.iter().map(|c| c.trade_date.date_naive()).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }
}
