//! Typed error taxonomy for trade validation and settlement.
//!
//! Validation failures carry the detail the command layer needs to show
//! (shortfall amounts, limits, next-open conditions). Store failures are
//! transient and retryable; they never leave a trade partially applied.

use thiserror::Error;

/// Errors returned by trade settlement and the portfolio ledger.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("share quantity must be a positive integer")]
    InvalidQuantity,

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("market is closed (open {open:02}:00-{close:02}:59 UTC)")]
    MarketClosed { open: u32, close: u32 },

    #[error("daily trade limit of {limit} reached; resets at 00:00 UTC")]
    DailyLimitExceeded { limit: i64 },

    #[error("trade total {total} KR is outside the allowed range {min}-{max} KR")]
    TradeSizeOutOfRange { total: i64, min: i64, max: i64 },

    #[error("insufficient balance: need {required} KR, have {available} KR (short {shortfall} KR)")]
    InsufficientBalance {
        required: i64,
        available: i64,
        shortfall: i64,
    },

    #[error("insufficient holdings: hold {held} shares, tried to sell {requested}")]
    InsufficientHoldings { held: i64, requested: i64 },

    /// Transient store failure. The settlement batch is all-or-nothing, so
    /// a failed commit means the trade did not happen and is safe to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    /// Non-fatal: the news content source errored or timed out. Callers
    /// fall back to a templated neutral item instead of failing the cycle.
    #[error("news generation unavailable: {0}")]
    NewsGenerationUnavailable(String),
}

impl MarketError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::StoreUnavailable(_))
    }

    /// Message safe to surface to end users. Validation errors are shown
    /// as-is; internal failures become a generic "try again" so no store
    /// or HTTP error text crosses the trust boundary.
    pub fn user_message(&self) -> String {
        match self {
            MarketError::StoreUnavailable(_) | MarketError::NewsGenerationUnavailable(_) => {
                "something went wrong on our side, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for MarketError {
    fn from(err: anyhow::Error) -> Self {
        MarketError::StoreUnavailable(err)
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(err: sqlx::Error) -> Self {
        MarketError::StoreUnavailable(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_not_shown_verbatim() {
        let err = MarketError::StoreUnavailable(anyhow::anyhow!("connection refused (10.0.0.3)"));
        assert!(!err.user_message().contains("10.0.0.3"));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_carry_detail() {
        let err = MarketError::InsufficientBalance {
            required: 1020,
            available: 900,
            shortfall: 120,
        };
        assert!(err.user_message().contains("120"));
        assert!(!err.is_retryable());
    }
}
