//! Position stop/target persistence (spec.md §4.3.1 post-fill: stop-loss and
//! take-profit survive process restarts, since SG's exit evaluation depends
//! on them on every scan). One row per (account, symbol); closing a stop
//! marks it rather than deleting it, for audit purposes.

use crate::domain::types::{PositionStop, StopStatus};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

pub struct SqlitePositionStopRepository {
    database: Database,
}

impl SqlitePositionStopRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn save(&self, account_id: &str, stop: &PositionStop) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position_stops (account_id, symbol, entry_price, stop_loss, take_profit, atr, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, symbol) DO UPDATE SET
                entry_price = excluded.entry_price,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                atr = excluded.atr,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(&stop.symbol)
        .bind(stop.entry_price.to_string())
        .bind(stop.stop_loss.to_string())
        .bind(stop.take_profit.to_string())
        .bind(stop.atr.map(|a| a.to_string()))
        .bind(status_str(stop.status))
        .bind(stop.created_at.timestamp())
        .bind(stop.updated_at.timestamp())
        .execute(&self.database.pool)
        .await
        .context("failed to save position stop")?;
        Ok(())
    }

    pub async fn find(&self, account_id: &str, symbol: &str) -> Result<Option<PositionStop>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, entry_price, stop_loss, take_profit, atr, status, created_at, updated_at
            FROM position_stops
            WHERE account_id = ? AND symbol = ?
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .fetch_optional(&self.database.pool)
        .await
        .context("failed to load position stop")?;

        let Some(row) = row else { return Ok(None) };
        let entry_price: String = row.try_get("entry_price")?;
        let stop_loss: String = row.try_get("stop_loss")?;
        let take_profit: String = row.try_get("take_profit")?;
        let atr: Option<String> = row.try_get("atr")?;
        let status: String = row.try_get("status")?;
        let created_at: i64 = row.try_get("created_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(Some(PositionStop {
            symbol: row.try_get("symbol")?,
            entry_price: Decimal::from_str(&entry_price).unwrap_or_default(),
            stop_loss: Decimal::from_str(&stop_loss).unwrap_or_default(),
            take_profit: Decimal::from_str(&take_profit).unwrap_or_default(),
            atr: atr.and_then(|a| Decimal::from_str(&a).ok()),
            status: parse_status(&status),
            created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_else(chrono::Utc::now),
            updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_else(chrono::Utc::now),
        }))
    }

    pub async fn close(&self, account_id: &str, symbol: &str) -> Result<()> {
        sqlx::query("UPDATE position_stops SET status = 'CLOSED', updated_at = ? WHERE account_id = ? AND symbol = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(account_id)
            .bind(symbol)
            .execute(&self.database.pool)
            .await
            .context("failed to close position stop")?;
        Ok(())
    }
}

fn status_str(status: StopStatus) -> &'static str {
    match status {
        StopStatus::Active => "ACTIVE",
        StopStatus::Closed => "CLOSED",
    }
}

fn parse_status(s: &str) -> StopStatus {
    if s == "CLOSED" { StopStatus::Closed } else { StopStatus::Active }
}
