//! Simulated market news events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news event affecting one ticker, or the whole market when `ticker`
/// is absent. Read once by the impact window; retained afterwards only as
/// historical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    /// Target ticker; `None` means market-wide
    pub ticker: Option<String>,

    pub headline: String,

    pub content: String,

    /// Impact score in -3.0..=+3.0; 0 for neutral/fallback items
    pub impact_score: f64,

    pub published_at: DateTime<Utc>,
}

impl NewsEvent {
    /// Whether this event targets the given ticker specifically.
    pub fn targets(&self, ticker: &str) -> bool {
        self.ticker.as_deref() == Some(ticker)
    }

    /// Whether this event applies to the market as a whole.
    pub fn is_market_wide(&self) -> bool {
        self.ticker.is_none()
    }
}
