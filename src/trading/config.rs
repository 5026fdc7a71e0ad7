//! Market configuration.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for trading rules and market cadence. One canonical fee
/// rate per deployment; all limits and intervals are tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Fee rate applied to both sides (buy fees round up, sell fees round down)
    pub fee_rate: Decimal,

    /// Minimum total per trade in KR
    pub min_trade_amount: i64,

    /// Maximum total per trade in KR
    pub max_trade_amount: i64,

    /// Maximum executed trades per user per UTC day
    pub daily_trade_limit: i64,

    /// First UTC hour the market is open (inclusive)
    pub market_open_hour: u32,

    /// Last UTC hour the market is open (inclusive)
    pub market_close_hour: u32,

    /// Price history entries kept per instrument (FIFO)
    pub price_history_cap: i64,

    /// Seconds between price ticks
    pub tick_interval_secs: u64,

    /// Seconds between news-cycle evaluations
    pub news_interval_secs: u64,

    /// Probability that a news cycle actually emits an event
    pub news_probability: f64,

    /// Price change per impact point when applying a news shock
    pub news_shock_rate: Decimal,

    /// Balance granted to a user account on first touch
    pub starting_balance: i64,

    /// Timeout for the settlement transaction, in seconds
    pub store_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.01),            // 1% per side
            min_trade_amount: 100,
            max_trade_amount: 1_000_000,
            daily_trade_limit: 50,
            market_open_hour: 0,             // effectively always open,
            market_close_hour: 23,           // but configurable
            price_history_cap: 100,
            tick_interval_secs: 30 * 60,     // 30 minutes
            news_interval_secs: 6 * 60 * 60, // 6 hours
            news_probability: 0.3,
            news_shock_rate: dec!(0.05),     // 5% per impact point
            starting_balance: 1000,
            store_timeout_secs: 10,
        }
    }
}

impl MarketConfig {
    /// Trading-hours rule: open when the current UTC hour falls inside
    /// the configured inclusive window. A window with open > close wraps
    /// around midnight (e.g. 22..=2 covers 22, 23, 0, 1, 2).
    pub fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        if self.market_open_hour <= self.market_close_hour {
            self.market_open_hour <= hour && hour <= self.market_close_hour
        } else {
            hour >= self.market_open_hour || hour <= self.market_close_hour
        }
    }

    /// Tick length in day units for the price model.
    pub fn tick_dt(&self) -> f64 {
        self.tick_interval_secs as f64 / 86_400.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_window_is_always_open() {
        let config = MarketConfig::default();
        for hour in 0..24 {
            let at = Utc.with_ymd_and_hms(2026, 8, 29, hour, 0, 0).unwrap();
            assert!(config.is_market_open(at));
        }
    }

    #[test]
    fn narrow_window_closes_outside_hours() {
        let config = MarketConfig {
            market_open_hour: 9,
            market_close_hour: 17,
            ..MarketConfig::default()
        };
        let before = Utc.with_ymd_and_hms(2026, 8, 29, 8, 59, 0).unwrap();
        let open = Utc.with_ymd_and_hms(2026, 8, 29, 17, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 29, 18, 0, 0).unwrap();

        assert!(!config.is_market_open(before));
        assert!(config.is_market_open(open));
        assert!(!config.is_market_open(after));
    }

    #[test]
    fn overnight_window_wraps_around_midnight() {
        let config = MarketConfig {
            market_open_hour: 22,
            market_close_hour: 2,
            ..MarketConfig::default()
        };

        for hour in [22, 23, 0, 1, 2] {
            let at = Utc.with_ymd_and_hms(2026, 8, 29, hour, 30, 0).unwrap();
            assert!(config.is_market_open(at), "hour {hour} should be open");
        }
        for hour in [3, 12, 21] {
            let at = Utc.with_ymd_and_hms(2026, 8, 29, hour, 30, 0).unwrap();
            assert!(!config.is_market_open(at), "hour {hour} should be closed");
        }
    }

    #[test]
    fn tick_dt_is_in_day_units() {
        let config = MarketConfig::default();
        assert!((config.tick_dt() - 0.5 / 24.0).abs() < 1e-12);
    }
}
