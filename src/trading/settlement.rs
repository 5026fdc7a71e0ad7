//! Trade settlement: validates one buy or sell order and applies its
//! four mutations (balance, holding, trade log, daily volume) atomically.
//!
//! The price is read exactly once per order and that snapshot is used
//! consistently for cost, fee, and logging; a tick landing moments later
//! does not affect an in-flight order. A failed commit leaves every row
//! untouched, so "the trade did not happen" and the user may retry.

use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::Database;
use crate::error::MarketError;
use crate::models::{Holding, TradeRecord, TradeSide};
use crate::trading::config::MarketConfig;
use crate::trading::ledger::PortfolioLedger;

/// Result of an executed buy.
#[derive(Debug, Clone)]
pub struct BuyReceipt {
    pub ticker: String,
    pub shares: i64,
    pub price: Decimal,
    pub gross_cost: i64,
    pub fee: i64,
    pub total_cost: i64,
    pub new_balance: i64,
    pub holding: Holding,
}

/// Result of an executed sell.
#[derive(Debug, Clone)]
pub struct SellReceipt {
    pub ticker: String,
    pub shares: i64,
    pub price: Decimal,
    pub gross_revenue: i64,
    pub fee: i64,
    pub net_revenue: i64,
    pub new_balance: i64,
    pub avg_cost_at_sale: Decimal,
    pub realized_pnl: Decimal,
    pub remaining_shares: i64,
}

/// Buy fee: rounds up, in favor of the house.
pub(crate) fn buy_fee(gross: Decimal, rate: Decimal) -> i64 {
    (gross * rate).ceil().to_i64().unwrap_or(i64::MAX)
}

/// Sell fee: rounds down, also in favor of the house.
pub(crate) fn sell_fee(gross: Decimal, rate: Decimal) -> i64 {
    (gross * rate).floor().to_i64().unwrap_or(0)
}

/// Validates and executes orders against the current price snapshot.
#[derive(Clone)]
pub struct TradeSettlement {
    db: Database,
    config: MarketConfig,
}

impl TradeSettlement {
    pub fn new(db: Database, config: MarketConfig) -> Self {
        Self { db, config }
    }

    /// Shared pre-trade validation: market hours and the daily limit.
    async fn check_trade_gates(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), MarketError> {
        if !self.config.is_market_open(now) {
            return Err(MarketError::MarketClosed {
                open: self.config.market_open_hour,
                close: self.config.market_close_hour,
            });
        }

        let date = now.format("%Y-%m-%d").to_string();
        let count = self.db.count_trades_on(user_id, &date).await?;
        if count >= self.config.daily_trade_limit {
            return Err(MarketError::DailyLimitExceeded {
                limit: self.config.daily_trade_limit,
            });
        }

        Ok(())
    }

    /// One price snapshot per order.
    async fn price_snapshot(&self, ticker: &str) -> Result<Decimal, MarketError> {
        match self.db.get_price_state(ticker).await? {
            Some(state) => Ok(state.current_price),
            None => Err(MarketError::UnknownInstrument(ticker.to_string())),
        }
    }

    /// Execute a buy order.
    pub async fn buy(
        &self,
        user_id: &str,
        ticker: &str,
        shares: i64,
        now: DateTime<Utc>,
    ) -> Result<BuyReceipt, MarketError> {
        self.check_trade_gates(user_id, now).await?;

        if shares <= 0 {
            return Err(MarketError::InvalidQuantity);
        }

        let price = self.price_snapshot(ticker).await?;
        let gross = price * Decimal::from(shares);
        let gross_cost = gross.ceil().to_i64().unwrap_or(i64::MAX);
        let fee = buy_fee(gross, self.config.fee_rate);
        let total_cost = gross_cost + fee;

        if total_cost < self.config.min_trade_amount || total_cost > self.config.max_trade_amount {
            return Err(MarketError::TradeSizeOutOfRange {
                total: total_cost,
                min: self.config.min_trade_amount,
                max: self.config.max_trade_amount,
            });
        }

        let record = TradeRecord::new(user_id, ticker, TradeSide::Buy, shares, price, fee, now);
        let receipt = self
            .with_timeout(self.settle_buy(record, total_cost))
            .await?;

        info!(
            user = %user_id,
            ticker = %ticker,
            shares = shares,
            price = %price,
            total = total_cost,
            "buy settled"
        );

        Ok(BuyReceipt {
            ticker: ticker.to_string(),
            shares,
            price,
            gross_cost,
            fee,
            total_cost,
            new_balance: receipt.0,
            holding: receipt.1,
        })
    }

    /// Execute a sell order. Returns realized P/L computed against the
    /// average cost in effect at the moment of sale.
    pub async fn sell(
        &self,
        user_id: &str,
        ticker: &str,
        shares: i64,
        now: DateTime<Utc>,
    ) -> Result<SellReceipt, MarketError> {
        self.check_trade_gates(user_id, now).await?;

        if shares <= 0 {
            return Err(MarketError::InvalidQuantity);
        }

        let price = self.price_snapshot(ticker).await?;
        let gross = price * Decimal::from(shares);
        let gross_revenue = gross.floor().to_i64().unwrap_or(0);
        let fee = sell_fee(gross, self.config.fee_rate);
        let net_revenue = gross_revenue - fee;

        if net_revenue < self.config.min_trade_amount {
            return Err(MarketError::TradeSizeOutOfRange {
                total: net_revenue,
                min: self.config.min_trade_amount,
                max: self.config.max_trade_amount,
            });
        }

        let record = TradeRecord::new(user_id, ticker, TradeSide::Sell, shares, price, fee, now);
        let (new_balance, outcome) = self
            .with_timeout(self.settle_sell(record, net_revenue))
            .await?;

        let realized_pnl = (price - outcome.avg_cost_at_sale) * Decimal::from(shares);

        info!(
            user = %user_id,
            ticker = %ticker,
            shares = shares,
            price = %price,
            net = net_revenue,
            pnl = %realized_pnl.round_dp(2),
            "sell settled"
        );

        Ok(SellReceipt {
            ticker: ticker.to_string(),
            shares,
            price,
            gross_revenue,
            fee,
            net_revenue,
            new_balance,
            avg_cost_at_sale: outcome.avg_cost_at_sale,
            realized_pnl,
            remaining_shares: outcome.remaining_shares,
        })
    }

    /// Atomic buy mutations: debit-if-sufficient, holding update, trade
    /// log append, volume increment. All or nothing.
    async fn settle_buy(
        &self,
        record: TradeRecord,
        total_cost: i64,
    ) -> Result<(i64, Holding), MarketError> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id, balance) VALUES (?, ?)")
            .bind(&record.user_id)
            .bind(self.config.starting_balance)
            .execute(&mut *tx)
            .await?;

        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM users WHERE user_id = ?")
            .bind(&record.user_id)
            .fetch_one(&mut *tx)
            .await?;

        if balance < total_cost {
            // Dropping the transaction rolls everything back.
            return Err(MarketError::InsufficientBalance {
                required: total_cost,
                available: balance,
                shortfall: total_cost - balance,
            });
        }

        let new_balance = balance - total_cost;
        sqlx::query("UPDATE users SET balance = ? WHERE user_id = ?")
            .bind(new_balance)
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await?;

        let holding = PortfolioLedger::apply_buy(
            &mut tx,
            &record.user_id,
            &record.ticker,
            record.shares,
            record.price,
        )
        .await?;

        self.append_trade(&mut tx, &record).await?;
        self.bump_volume(&mut tx, &record.ticker, record.shares).await?;

        tx.commit().await.map_err(|e| MarketError::StoreUnavailable(e.into()))?;
        Ok((new_balance, holding))
    }

    /// Atomic sell mutations: holding decrement, unconditional credit,
    /// trade log append, volume increment.
    async fn settle_sell(
        &self,
        record: TradeRecord,
        net_revenue: i64,
    ) -> Result<(i64, crate::trading::ledger::SellOutcome), MarketError> {
        let mut tx = self.db.pool().begin().await?;

        let outcome = PortfolioLedger::apply_sell(
            &mut tx,
            &record.user_id,
            &record.ticker,
            record.shares,
        )
        .await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id, balance) VALUES (?, ?)")
            .bind(&record.user_id)
            .bind(self.config.starting_balance)
            .execute(&mut *tx)
            .await?;

        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM users WHERE user_id = ?")
            .bind(&record.user_id)
            .fetch_one(&mut *tx)
            .await?;

        let new_balance = balance + net_revenue;
        sqlx::query("UPDATE users SET balance = ? WHERE user_id = ?")
            .bind(new_balance)
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await?;

        self.append_trade(&mut tx, &record).await?;
        self.bump_volume(&mut tx, &record.ticker, record.shares).await?;

        tx.commit().await.map_err(|e| MarketError::StoreUnavailable(e.into()))?;
        Ok((new_balance, outcome))
    }

    async fn append_trade(
        &self,
        tx: &mut sqlx::SqliteConnection,
        record: &TradeRecord,
    ) -> Result<(), MarketError> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, ticker, side, shares, price, fee, trade_date, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.ticker)
        .bind(record.side.as_str())
        .bind(record.shares)
        .bind(record.price.to_f64().unwrap_or(0.0))
        .bind(record.fee)
        .bind(&record.date)
        .bind(record.executed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    async fn bump_volume(
        &self,
        tx: &mut sqlx::SqliteConnection,
        ticker: &str,
        shares: i64,
    ) -> Result<(), MarketError> {
        sqlx::query("UPDATE price_state SET daily_volume = daily_volume + ? WHERE ticker = ?")
            .bind(shares)
            .bind(ticker)
            .execute(&mut *tx)
            .await?;

        Ok(())
    }

    /// Store calls during settlement are bounded; timing out maps to a
    /// retryable error with nothing committed.
    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MarketError>>,
    ) -> Result<T, MarketError> {
        let limit = Duration::from_secs(self.config.store_timeout_secs);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(MarketError::StoreUnavailable(anyhow!(
                "settlement timed out after {}s",
                limit.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_catalog;
    use crate::models::UpdateReason;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn config_2pct() -> MarketConfig {
        MarketConfig {
            fee_rate: dec!(0.02),
            ..MarketConfig::default()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap()
    }

    async fn market_at(price: Decimal, config: MarketConfig) -> (Database, TradeSettlement) {
        let db = Database::in_memory().await.unwrap();
        db.seed_instruments(&default_catalog()).await.unwrap();
        db.apply_price_update("WICR", price, Decimal::ZERO, UpdateReason::Tick, 100, noon())
            .await
            .unwrap();
        let settlement = TradeSettlement::new(db.clone(), config);
        (db, settlement)
    }

    async fn fund(db: &Database, user: &str, balance: i64) {
        db.ensure_user(user, balance).await.unwrap();
    }

    #[test]
    fn buy_fee_rounds_up_sell_fee_rounds_down() {
        // rate 1.5% on gross 100: 1.5 -> buy 2, sell 1
        assert_eq!(buy_fee(dec!(100), dec!(0.015)), 2);
        assert_eq!(sell_fee(dec!(100), dec!(0.015)), 1);

        // An exact fee stays exact on both sides.
        assert_eq!(buy_fee(dec!(100), dec!(0.01)), 1);
        assert_eq!(sell_fee(dec!(100), dec!(0.01)), 1);
    }

    #[tokio::test]
    async fn end_to_end_buy_buy_sell_scenario() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "alice", 10_000).await;

        // Buy 10 @ 100, 2% fee: 1000 + 20 = 1020
        let r1 = settlement.buy("alice", "WICR", 10, noon()).await.unwrap();
        assert_eq!(r1.gross_cost, 1000);
        assert_eq!(r1.fee, 20);
        assert_eq!(r1.total_cost, 1020);
        assert_eq!(r1.new_balance, 8980);
        assert_eq!(r1.holding.shares, 10);
        assert_eq!(r1.holding.avg_cost, dec!(100));

        // Buy 5 more @ 120: 600 + 12 = 612; avg (1000+600)/15
        db.apply_price_update("WICR", dec!(120), dec!(20), UpdateReason::Tick, 100, noon())
            .await
            .unwrap();
        let r2 = settlement.buy("alice", "WICR", 5, noon()).await.unwrap();
        assert_eq!(r2.total_cost, 612);
        assert_eq!(r2.new_balance, 8368);
        assert_eq!(r2.holding.shares, 15);
        assert_eq!(r2.holding.avg_cost.round_dp(2), dec!(106.67));

        // Sell 8 @ 150: gross 1200, fee floor(24)=24, net 1176
        db.apply_price_update("WICR", dec!(150), dec!(25), UpdateReason::Tick, 100, noon())
            .await
            .unwrap();
        let r3 = settlement.sell("alice", "WICR", 8, noon()).await.unwrap();
        assert_eq!(r3.gross_revenue, 1200);
        assert_eq!(r3.fee, 24);
        assert_eq!(r3.net_revenue, 1176);
        assert_eq!(r3.new_balance, 9544);
        assert_eq!(r3.remaining_shares, 7);
        assert_eq!(r3.avg_cost_at_sale.round_dp(2), dec!(106.67));
        assert_eq!(r3.realized_pnl.round_dp(2), dec!(346.67));

        // Remaining position unchanged in avg cost.
        let holding = db.get_holding("alice", "WICR").await.unwrap().unwrap();
        assert_eq!(holding.shares, 7);
        assert_eq!(holding.avg_cost.round_dp(2), dec!(106.67));

        // Volume accumulated across all three trades.
        let state = db.get_price_state("WICR").await.unwrap().unwrap();
        assert_eq!(state.daily_volume, 23);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_state_unchanged() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "bob", 500).await;

        let err = settlement.buy("bob", "WICR", 10, noon()).await.unwrap_err();
        match err {
            MarketError::InsufficientBalance {
                required,
                available,
                shortfall,
            } => {
                assert_eq!(required, 1020);
                assert_eq!(available, 500);
                assert_eq!(shortfall, 520);
            }
            other => panic!("unexpected error: {other}"),
        }

        // No partial writes: balance, holdings, log, volume all untouched.
        assert_eq!(db.get_balance("bob").await.unwrap(), Some(500));
        assert!(db.get_holding("bob", "WICR").await.unwrap().is_none());
        assert_eq!(db.count_trades_on("bob", "2026-08-29").await.unwrap(), 0);
        let state = db.get_price_state("WICR").await.unwrap().unwrap();
        assert_eq!(state.daily_volume, 0);
    }

    #[tokio::test]
    async fn oversell_leaves_state_unchanged() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "alice", 10_000).await;
        settlement.buy("alice", "WICR", 5, noon()).await.unwrap();
        let balance_before = db.get_balance("alice").await.unwrap();

        let err = settlement.sell("alice", "WICR", 6, noon()).await.unwrap_err();
        assert!(matches!(err, MarketError::InsufficientHoldings { held: 5, .. }));

        assert_eq!(db.get_balance("alice").await.unwrap(), balance_before);
        let holding = db.get_holding("alice", "WICR").await.unwrap().unwrap();
        assert_eq!(holding.shares, 5);
        assert_eq!(db.count_trades_on("alice", "2026-08-29").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_ticker_is_rejected() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "alice", 10_000).await;

        let err = settlement.buy("alice", "ZZZZ", 1, noon()).await.unwrap_err();
        assert!(matches!(err, MarketError::UnknownInstrument(_)));
    }

    #[tokio::test]
    async fn zero_and_negative_quantities_are_rejected() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "alice", 10_000).await;

        assert!(matches!(
            settlement.buy("alice", "WICR", 0, noon()).await.unwrap_err(),
            MarketError::InvalidQuantity
        ));
        assert!(matches!(
            settlement.sell("alice", "WICR", -3, noon()).await.unwrap_err(),
            MarketError::InvalidQuantity
        ));
    }

    #[tokio::test]
    async fn trade_size_limits_apply() {
        let (db, settlement) = market_at(dec!(10), config_2pct()).await;
        fund(&db, "alice", 2_000_000).await;

        // 1 share: 10 + fee 1 = 11, below the 100 KR minimum.
        assert!(matches!(
            settlement.buy("alice", "WICR", 1, noon()).await.unwrap_err(),
            MarketError::TradeSizeOutOfRange { .. }
        ));

        // Over the maximum.
        assert!(matches!(
            settlement.buy("alice", "WICR", 200_000, noon()).await.unwrap_err(),
            MarketError::TradeSizeOutOfRange { .. }
        ));
    }

    #[tokio::test]
    async fn market_closed_rejects_trades() {
        let config = MarketConfig {
            market_open_hour: 9,
            market_close_hour: 17,
            ..config_2pct()
        };
        let (db, settlement) = market_at(dec!(100), config).await;
        fund(&db, "alice", 10_000).await;

        let at_night = Utc.with_ymd_and_hms(2026, 8, 29, 3, 0, 0).unwrap();
        let err = settlement.buy("alice", "WICR", 1, at_night).await.unwrap_err();
        assert!(matches!(err, MarketError::MarketClosed { open: 9, close: 17 }));
        assert_eq!(db.get_balance("alice").await.unwrap(), Some(10_000));
    }

    #[tokio::test]
    async fn daily_limit_counts_the_utc_day() {
        let config = MarketConfig {
            daily_trade_limit: 2,
            ..config_2pct()
        };
        let (db, settlement) = market_at(dec!(100), config).await;
        fund(&db, "alice", 100_000).await;

        settlement.buy("alice", "WICR", 1, noon()).await.unwrap();
        settlement.buy("alice", "WICR", 1, noon()).await.unwrap();
        let err = settlement.buy("alice", "WICR", 1, noon()).await.unwrap_err();
        assert!(matches!(err, MarketError::DailyLimitExceeded { limit: 2 }));

        // The next UTC day starts a fresh bucket.
        let tomorrow = Utc.with_ymd_and_hms(2026, 8, 30, 0, 1, 0).unwrap();
        assert!(settlement.buy("alice", "WICR", 1, tomorrow).await.is_ok());
    }

    #[tokio::test]
    async fn first_buy_bootstraps_the_account() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;

        // No prior account: created at the starting balance (1000), so a
        // small buy succeeds and debits from it.
        let receipt = settlement.buy("carol", "WICR", 1, noon()).await.unwrap();
        assert_eq!(receipt.total_cost, 102);
        assert_eq!(receipt.new_balance, 898);
        assert_eq!(db.get_balance("carol").await.unwrap(), Some(898));
    }

    #[tokio::test]
    async fn trade_size_range_check_on_buy_1_share_at_100() {
        let (db, settlement) = market_at(dec!(100), config_2pct()).await;
        fund(&db, "alice", 10_000).await;

        // 100 + 2 = 102 >= min 100: allowed.
        let receipt = settlement.buy("alice", "WICR", 1, noon()).await.unwrap();
        assert_eq!(receipt.total_cost, 102);
    }
}
