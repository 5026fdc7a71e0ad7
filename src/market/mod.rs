//! Market simulation: stochastic price evolution and news-driven shocks.

mod news;
mod price_model;

pub use news::{fallback_news, HttpNewsSource, NewsImpactEngine, NewsSource};
pub use price_model::{advance_with_sample, PriceModel, PriceTick};
