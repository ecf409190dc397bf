//! Submitted-order audit log (spec.md §6 persisted state layout). Every
//! order OE submits is recorded here for reconciliation and reporting,
//! independent of the broker's own order history.

use crate::domain::types::{OrderRecord, OrderStatus, SignalSide};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn record(&self, account_id: &str, order: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, account_id, symbol, side, quantity, price, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&order.order_id)
        .bind(account_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.quantity.to_string())
        .bind(order.price.to_string())
        .bind(status_str(order.status))
        .bind(order.created_at.timestamp())
        .bind(order.updated_at.timestamp())
        .execute(&self.database.pool)
        .await
        .context("failed to record order")?;
        Ok(())
    }

    pub async fn recent_for_symbol(&self, account_id: &str, symbol: &str, limit: i64) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, symbol, side, quantity, price, status, created_at, updated_at
            FROM orders
            WHERE account_id = ? AND symbol = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.database.pool)
        .await
        .context("failed to load recent orders")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let side: String = row.try_get("side")?;
            let status: String = row.try_get("status")?;
            let quantity: String = row.try_get("quantity")?;
            let price: String = row.try_get("price")?;
            let created_at: i64 = row.try_get("created_at")?;
            let updated_at: i64 = row.try_get("updated_at")?;
            records.push(OrderRecord {
                order_id: row.try_get("order_id")?,
                symbol: row.try_get("symbol")?,
                side: parse_side(&side),
                quantity: Decimal::from_str(&quantity).unwrap_or_default(),
                price: Decimal::from_str(&price).unwrap_or_default(),
                status: parse_status(&status),
                created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_else(chrono::Utc::now),
                updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_else(chrono::Utc::now),
            });
        }
        Ok(records)
    }
}

fn status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::New => "NEW",
        OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Cancelled => "CANCELLED",
        OrderStatus::Rejected => "REJECTED",
    }
}

fn parse_status(s: &str) -> OrderStatus {
    match s {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::New,
    }
}

fn parse_side(s: &str) -> SignalSide {
    if s == "SELL" { SignalSide::Sell } else { SignalSide::Buy }
}
