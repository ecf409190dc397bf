//! Local long-tail candle history (spec.md §4.4 hybrid merge: "long tail
//! from the local store ... joined with the latest K days from the gateway").
//! Grounded on the teacher's candle table and `SqliteStrategyRepository`'s
//! upsert idiom.

use crate::domain::ports::{Candle, HistoryStore};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

pub struct SqliteHistoryStore {
    database: Database,
}

impl SqliteHistoryStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Upsert a batch of candles, e.g. after a gateway fetch, so future
    /// indicator windows can be served from the local tail alone.
    pub async fn upsert_candles(&self, candles: &[Candle]) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (symbol, trade_date, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, trade_date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.trade_date.timestamp())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("failed to upsert candle")?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn recent_candles(&self, symbol: &str, since_days: u32) -> Result<Vec<Candle>> {
        let cutoff = (Utc::now() - chrono::Duration::days(since_days as i64)).timestamp();
        let rows = sqlx::query(
            r#"
            SELECT symbol, trade_date, open, high, low, close, volume
            FROM candles
            WHERE symbol = ? AND trade_date >= ?
            ORDER BY trade_date ASC
            "#,
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.database.pool)
        .await
        .context("failed to load candle history")?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let trade_date: i64 = row.try_get("trade_date")?;
            let open: String = row.try_get("open")?;
            let high: String = row.try_get("high")?;
            let low: String = row.try_get("low")?;
            let close: String = row.try_get("close")?;
            let volume: String = row.try_get("volume")?;
            candles.push(Candle {
                symbol: row.try_get("symbol")?,
                trade_date: DateTime::<Utc>::from_timestamp(trade_date, 0).unwrap_or_else(Utc::now),
                open: Decimal::from_str(&open).unwrap_or_default(),
                high: Decimal::from_str(&high).unwrap_or_default(),
                low: Decimal::from_str(&low).unwrap_or_default(),
                close: Decimal::from_str(&close).unwrap_or_default(),
                volume: Decimal::from_str(&volume).unwrap_or_default(),
            });
        }
        Ok(candles)
    }
}
