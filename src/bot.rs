//! Market scheduler: drives the price ticks and the news cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::market::{NewsImpactEngine, NewsSource, PriceModel};
use crate::models::{default_catalog, Instrument, UpdateReason};
use crate::notify::Notifier;
use crate::trading::config::MarketConfig;

pub struct MarketBot {
    db: Database,
    config: MarketConfig,
    model: PriceModel,
    impact_engine: NewsImpactEngine,
    news_source: NewsSource,
    notifier: Notifier,
    rng: StdRng,
}

impl MarketBot {
    pub fn new(db: Database, config: MarketConfig) -> Result<Self> {
        Ok(Self {
            db,
            config,
            model: PriceModel::new()?,
            impact_engine: NewsImpactEngine::default(),
            news_source: NewsSource::from_env()?,
            notifier: Notifier::from_env(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Seeds the instrument catalog. Safe to call on every start; rows
    /// already present keep their state.
    pub async fn initialize(&self) -> Result<()> {
        let catalog = default_catalog();
        self.db
            .seed_instruments(&catalog)
            .await
            .context("failed to seed instrument catalog")?;
        info!(instruments = catalog.len(), "market initialized");
        Ok(())
    }

    /// Runs the tick and news loops until interrupted.
    pub async fn run(&mut self) -> Result<()> {
        self.initialize().await?;

        let mut tick_timer =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut news_timer =
            tokio::time::interval(Duration::from_secs(self.config.news_interval_secs));
        news_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval fire is immediate; the market should not
        // publish news the instant it boots.
        news_timer.tick().await;

        info!(
            tick_secs = self.config.tick_interval_secs,
            news_secs = self.config.news_interval_secs,
            "market running"
        );

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    if let Err(e) = self.price_tick().await {
                        error!(error = %e, "price tick failed");
                    }
                }
                _ = news_timer.tick() => {
                    if let Err(e) = self.news_cycle(false).await {
                        error!(error = %e, "news cycle failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Advances every instrument one step and persists the new prices.
    pub async fn price_tick(&mut self) -> Result<()> {
        let now = Utc::now();

        // Daily volumes reset at the first tick of each UTC day. The last
        // tick day is derived from the persisted price state, so the reset
        // still happens when a restart spans midnight.
        let today = now.date_naive();
        let last_tick_day = self
            .db
            .list_price_states()
            .await?
            .iter()
            .map(|s| s.last_updated)
            .max()
            .map(|t| t.date_naive());
        if last_tick_day.map_or(false, |d| d != today) {
            self.db
                .reset_daily_volumes()
                .await
                .context("failed to reset daily volumes")?;
            info!(date = %today, "daily volumes reset");
        }

        let instruments = self.db.list_instruments().await?;
        let dt = self.config.tick_dt();

        for instrument in &instruments {
            let Some(state) = self.db.get_price_state(&instrument.ticker).await? else {
                warn!(ticker = %instrument.ticker, "no price state, skipping");
                continue;
            };

            let tick = self.model.advance(instrument, state.current_price, dt);
            self.persist_update(
                &instrument.ticker,
                tick.new_price,
                tick.change_percent,
                UpdateReason::Tick,
            )
            .await?;

            info!(
                ticker = %instrument.ticker,
                price = %tick.new_price,
                change = %tick.change_percent,
                "tick"
            );
        }

        Ok(())
    }

    /// Maybe publishes one news event and applies its price shock.
    /// `force` skips the probability gate (used by the CLI).
    pub async fn news_cycle(&mut self, force: bool) -> Result<()> {
        if !force && self.rng.gen::<f64>() >= self.config.news_probability {
            info!("news cycle skipped this round");
            return Ok(());
        }

        let instruments = self.db.list_instruments().await?;
        let Some(subject) = instruments.choose(&mut self.rng).cloned() else {
            warn!("no instruments to publish news for");
            return Ok(());
        };

        self.publish_news(&subject).await
    }

    /// Generates, stores, and applies one news event for `subject`.
    pub async fn publish_news(&mut self, subject: &Instrument) -> Result<()> {
        let event = self.news_source.generate(subject).await;
        self.db.insert_news(&event).await?;

        info!(
            ticker = ?event.ticker,
            impact = event.impact_score,
            headline = %event.headline,
            "news published"
        );

        // The shock reflects the whole recent window, not just this
        // event, so clustered stories compound up to the clamp.
        let window_start = Utc::now() - self.impact_engine.window;
        let recent = self.db.recent_news(window_start).await?;

        for instrument in self.db.list_instruments().await? {
            let impact = self
                .impact_engine
                .compute_impact(&instrument.ticker, &recent, Utc::now());
            if impact == 0.0 {
                continue;
            }

            let Some(state) = self.db.get_price_state(&instrument.ticker).await? else {
                continue;
            };

            let shocked = self.impact_engine.shocked_price(
                &instrument,
                state.current_price,
                impact,
                self.config.news_shock_rate,
            );
            if shocked == state.current_price {
                continue;
            }

            let change = if state.current_price.is_zero() {
                Decimal::ZERO
            } else {
                ((shocked - state.current_price) / state.current_price
                    * Decimal::ONE_HUNDRED)
                    .round_dp(2)
            };

            self.persist_update(&instrument.ticker, shocked, change, UpdateReason::NewsImpact)
                .await?;

            info!(
                ticker = %instrument.ticker,
                impact = impact,
                price = %shocked,
                "news shock applied"
            );
        }

        self.notifier
            .post(format!("📰 {}: {}", event.headline, event.content));

        Ok(())
    }

    /// Writes one price update with retry; transient store errors back
    /// off instead of dropping the tick.
    async fn persist_update(
        &self,
        ticker: &str,
        price: Decimal,
        change: Decimal,
        reason: UpdateReason,
    ) -> Result<()> {
        let op = || async {
            self.db
                .apply_price_update(
                    ticker,
                    price,
                    change,
                    reason,
                    self.config.price_history_cap,
                    Utc::now(),
                )
                .await
                .map_err(backoff::Error::transient)
        };

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, op)
            .await
            .with_context(|| format!("failed to persist price update for {ticker}"))
    }
}
