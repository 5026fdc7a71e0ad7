//! Immutable trade records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> TradeSide {
        match s {
            "sell" => TradeSide::Sell,
            _ => TradeSide::Buy,
        }
    }
}

/// Append-only log entry for one executed trade. Never mutated or
/// deleted; the `date` bucket (UTC calendar day) drives the daily
/// trade-count limit across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub side: TradeSide,
    pub shares: i64,

    /// Execution price per share at the moment of settlement
    pub price: Decimal,

    /// Fee charged, in whole KR
    pub fee: i64,

    /// UTC calendar-day bucket, e.g. "2026-08-29"
    pub date: String,

    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Build a record for a trade executing at `executed_at`.
    pub fn new(
        user_id: &str,
        ticker: &str,
        side: TradeSide,
        shares: i64,
        price: Decimal,
        fee: i64,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            ticker: ticker.to_string(),
            side,
            shares,
            price,
            fee,
            date: executed_at.format("%Y-%m-%d").to_string(),
            executed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn date_bucket_is_the_utc_day() {
        let at = Utc.with_ymd_and_hms(2026, 8, 29, 23, 59, 59).unwrap();
        let rec = TradeRecord::new("u1", "WICR", TradeSide::Buy, 3, dec!(1200), 36, at);
        assert_eq!(rec.date, "2026-08-29");
        assert_eq!(rec.side.as_str(), "buy");
    }
}
