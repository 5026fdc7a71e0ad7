//! News generation and news-driven price shocks.
//!
//! A news cycle generates one event (via an external text-generation API
//! when configured, a templated fallback otherwise), aggregates the
//! trailing impact window into a bounded score, and applies the score as
//! a multiplicative shock on top of the routine random walk.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::MarketError;
use crate::models::{Instrument, NewsEvent};

/// Weight for events targeting the instrument itself.
const OWN_TICKER_WEIGHT: f64 = 0.8;
/// Weight for market-wide events (no ticker).
const MARKET_WIDE_WEIGHT: f64 = 0.3;
/// Aggregate impact is clamped to +/- this bound.
const IMPACT_CLAMP: f64 = 5.0;

/// Aggregates news into a bounded impact score and computes shocked prices.
#[derive(Debug, Clone)]
pub struct NewsImpactEngine {
    /// Trailing window considered when aggregating impact
    pub window: chrono::Duration,
}

impl Default for NewsImpactEngine {
    fn default() -> Self {
        Self {
            window: chrono::Duration::hours(24),
        }
    }
}

impl NewsImpactEngine {
    /// Sum the weighted impact of events inside the trailing window:
    /// 0.8x for events targeting `ticker`, 0.3x for market-wide events,
    /// other tickers' events ignored. Clamped to [-5, +5].
    pub fn compute_impact(&self, ticker: &str, events: &[NewsEvent], now: DateTime<Utc>) -> f64 {
        let since = now - self.window;
        let total: f64 = events
            .iter()
            .filter(|e| e.published_at >= since)
            .map(|e| {
                if e.targets(ticker) {
                    e.impact_score * OWN_TICKER_WEIGHT
                } else if e.is_market_wide() {
                    e.impact_score * MARKET_WIDE_WEIGHT
                } else {
                    0.0
                }
            })
            .sum();

        total.clamp(-IMPACT_CLAMP, IMPACT_CLAMP)
    }

    /// Price after applying a multiplicative shock `1 + impact * rate`,
    /// clamped to the instrument floor. The caller persists the result
    /// with a `news_impact` history entry.
    pub fn shocked_price(
        &self,
        instrument: &Instrument,
        current_price: Decimal,
        impact: f64,
        rate: Decimal,
    ) -> Decimal {
        let impact = Decimal::from_f64(impact).unwrap_or(Decimal::ZERO);
        (current_price * (Decimal::ONE + impact * rate))
            .max(instrument.floor_price())
            .round_dp(2)
    }
}

/// Response shape expected from the external news-content API.
#[derive(Debug, Deserialize)]
struct GeneratedNews {
    headline: String,
    content: String,
    impact_score: f64,
}

/// HTTP client for an external news-content generator.
#[derive(Debug, Clone)]
pub struct HttpNewsSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpNewsSource {
    pub fn new(endpoint: String, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    async fn generate(&self, inst: &Instrument) -> Result<NewsEvent, MarketError> {
        let body = serde_json::json!({
            "ticker": inst.ticker,
            "company": inst.name,
            "sector": inst.sector,
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| MarketError::NewsGenerationUnavailable(e.to_string()))?;

        let generated: GeneratedNews = resp
            .json()
            .await
            .map_err(|e| MarketError::NewsGenerationUnavailable(e.to_string()))?;

        Ok(NewsEvent {
            ticker: Some(inst.ticker.clone()),
            headline: generated.headline,
            content: generated.content,
            impact_score: generated.impact_score.clamp(-3.0, 3.0),
            published_at: Utc::now(),
        })
    }
}

/// Where news content comes from. The HTTP source degrades to the
/// templated fallback on any failure, so a news cycle can never block or
/// fail the price tick.
#[derive(Debug, Clone)]
pub enum NewsSource {
    Http(HttpNewsSource),
    Fallback,
}

impl NewsSource {
    /// Build from `NEWS_API_URL` / `NEWS_API_KEY` env vars; fallback-only
    /// when no endpoint is configured.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("NEWS_API_URL") {
            Ok(endpoint) if !endpoint.is_empty() => {
                let api_key = std::env::var("NEWS_API_KEY").ok();
                Ok(NewsSource::Http(HttpNewsSource::new(endpoint, api_key)?))
            }
            _ => Ok(NewsSource::Fallback),
        }
    }

    /// Generate one news event for the instrument. Infallible: API errors
    /// degrade to a neutral templated item with impact 0.
    pub async fn generate(&self, inst: &Instrument) -> NewsEvent {
        match self {
            NewsSource::Http(source) => match source.generate(inst).await {
                Ok(event) => {
                    debug!(ticker = %inst.ticker, headline = %event.headline, "news generated");
                    event
                }
                Err(e) => {
                    warn!(ticker = %inst.ticker, error = %e, "news source failed, using fallback");
                    fallback_news(inst)
                }
            },
            NewsSource::Fallback => fallback_news(inst),
        }
    }
}

/// Static neutral news item used when no generator is available.
pub fn fallback_news(inst: &Instrument) -> NewsEvent {
    NewsEvent {
        ticker: Some(inst.ticker.clone()),
        headline: format!("{} holds steady", inst.name),
        content: format!(
            "{} continues normal operations in the {} sector with no notable developments.",
            inst.name, inst.sector
        ),
        impact_score: 0.0,
        published_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_catalog;
    use rust_decimal_macros::dec;

    fn event(ticker: Option<&str>, impact: f64, hours_ago: i64) -> NewsEvent {
        NewsEvent {
            ticker: ticker.map(|t| t.to_string()),
            headline: "test".to_string(),
            content: String::new(),
            impact_score: impact,
            published_at: Utc::now() - chrono::Duration::hours(hours_ago),
        }
    }

    fn instrument() -> Instrument {
        default_catalog()
            .into_iter()
            .find(|i| i.ticker == "WICR")
            .unwrap()
    }

    #[test]
    fn own_ticker_events_weigh_more_than_market_wide() {
        let engine = NewsImpactEngine::default();
        let now = Utc::now();
        let events = vec![
            event(Some("WICR"), 2.0, 1),  // 2.0 * 0.8 = 1.6
            event(None, 1.0, 2),          // 1.0 * 0.3 = 0.3
            event(Some("QOOG"), 3.0, 1),  // other ticker, ignored
        ];

        let impact = engine.compute_impact("WICR", &events, now);
        assert!((impact - 1.9).abs() < 1e-9);
    }

    #[test]
    fn events_outside_window_are_ignored() {
        let engine = NewsImpactEngine::default();
        let now = Utc::now();
        let events = vec![event(Some("WICR"), 3.0, 25)];
        assert_eq!(engine.compute_impact("WICR", &events, now), 0.0);
    }

    #[test]
    fn aggregate_impact_is_clamped() {
        let engine = NewsImpactEngine::default();
        let now = Utc::now();
        let events: Vec<_> = (0..10).map(|_| event(Some("WICR"), 3.0, 1)).collect();
        assert_eq!(engine.compute_impact("WICR", &events, now), 5.0);

        let events: Vec<_> = (0..10).map(|_| event(Some("WICR"), -3.0, 1)).collect();
        assert_eq!(engine.compute_impact("WICR", &events, now), -5.0);
    }

    #[test]
    fn shock_scales_price_and_respects_floor() {
        let engine = NewsImpactEngine::default();
        let inst = instrument();

        // +2 impact at 5% rate: +10%
        let up = engine.shocked_price(&inst, dec!(1000), 2.0, dec!(0.05));
        assert_eq!(up, dec!(1100));

        // A catastrophic impact cannot break the floor.
        let down = engine.shocked_price(&inst, dec!(130), -5.0, dec!(0.5));
        assert_eq!(down, inst.floor_price());
    }

    #[test]
    fn fallback_news_is_neutral() {
        let inst = instrument();
        let news = fallback_news(&inst);
        assert_eq!(news.impact_score, 0.0);
        assert!(news.targets("WICR"));
    }
}
