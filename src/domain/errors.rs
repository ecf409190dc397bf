use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the signal queue (publish/consume/ack/nack/recover).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("signal missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("store connection failed after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    #[error("signal not found in processing partition for ack/nack: {symbol}")]
    NotInProcessing { symbol: String },

    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors surfaced by the position manager.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("position store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("position not found: {symbol}")]
    NotFound { symbol: String },
}

/// Errors surfaced by order sizing, lot/tick normalization, and submission.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("already held: {symbol}")]
    AlreadyHeld { symbol: String },

    #[error("lot size violation for {symbol}: quantity {quantity} not a multiple of {lot_size}")]
    LotSizeViolation {
        symbol: String,
        quantity: Decimal,
        lot_size: Decimal,
    },

    #[error("zero quantity after lot rounding for {symbol}")]
    ZeroQuantity { symbol: String },

    #[error("price {price} for {symbol} deviates from reference {reference} beyond {max_pct}%")]
    PriceDeviation {
        symbol: String,
        price: Decimal,
        reference: Decimal,
        max_pct: Decimal,
    },

    #[error("insufficient funds: need {need}, usable {usable}")]
    InsufficientFunds { need: Decimal, usable: Decimal },

    #[error("market closed for {symbol}, reopens in {minutes_until_open} minutes")]
    MarketClosed {
        symbol: String,
        minutes_until_open: i64,
    },

    #[error("gateway rejected order: {reason}")]
    GatewayRejected { reason: String },

    #[error("transient gateway error: {reason}")]
    Transient { reason: String },
}

/// Errors surfaced by the regime classifier / risk budget policy.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("no index data obtainable for regime classification")]
    NoIndexData,

    #[error("invalid risk configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Errors surfaced by gateway adapters (trading/quote/notifier).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    #[error("invalid price: {reason}")]
    InvalidPrice { reason: String },

    #[error("not found: {symbol}")]
    NotFound { symbol: String },

    #[error("transient: {reason}")]
    Transient { reason: String },

    #[error("permanent: {reason}")]
    Permanent { reason: String },
}

impl GatewayError {
    /// Transient and rate-limit errors are retryable by the consume loop; the rest are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. } | GatewayError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_retryability() {
        assert!(GatewayError::Transient { reason: "timeout".into() }.is_retryable());
        assert!(
            GatewayError::RateLimited { retry_after_secs: 5 }.is_retryable()
        );
        assert!(!GatewayError::InsufficientFunds.is_retryable());
        assert!(!GatewayError::Permanent { reason: "bad symbol".into() }.is_retryable());
    }

    #[test]
    fn execution_error_formatting() {
        let err = ExecutionError::LotSizeViolation {
            symbol: "0700.HK".into(),
            quantity: Decimal::new(150, 0),
            lot_size: Decimal::new(100, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("0700.HK"));
        assert!(msg.contains("150"));
    }
}
