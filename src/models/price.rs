//! Mutable price state for one instrument, plus bounded history entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a price point was recorded: a routine scheduler tick, or an
/// out-of-band news shock. Kept distinct so historical analysis can
/// separate organic drift from event-driven moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Tick,
    NewsImpact,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::Tick => "tick",
            UpdateReason::NewsImpact => "news_impact",
        }
    }

    pub fn parse(s: &str) -> UpdateReason {
        match s {
            "news_impact" => UpdateReason::NewsImpact,
            _ => UpdateReason::Tick,
        }
    }
}

/// Current-price record for one instrument. Mutated only by the price
/// model and the news engine; read by settlement and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceState {
    pub ticker: String,

    /// Current price in KR, always >= the instrument's floor price
    pub current_price: Decimal,

    /// Percent change applied by the last update
    pub change_percent: Decimal,

    /// Shares traded in the current UTC day; reset at rollover
    pub daily_volume: i64,

    pub last_updated: DateTime<Utc>,
}

/// One entry in the bounded per-instrument price history (FIFO, oldest
/// evicted once the cap is exceeded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub ticker: String,
    pub price: Decimal,
    pub change_percent: Decimal,
    pub reason: UpdateReason,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips() {
        assert_eq!(UpdateReason::parse("news_impact"), UpdateReason::NewsImpact);
        assert_eq!(UpdateReason::parse("tick"), UpdateReason::Tick);
        assert_eq!(UpdateReason::NewsImpact.as_str(), "news_impact");
    }
}
