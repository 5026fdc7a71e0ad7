//! SQLite persistence for the simulated market.
//!
//! Stores everything the market needs to resume after restart:
//! - Instrument reference data and per-instrument price state
//! - Bounded price history (capped FIFO, tagged with update reason)
//! - User balances and holdings
//! - The append-only trade log (with UTC day buckets for limits)
//! - Market news for the impact window
//!
//! Convention: prices and cost figures are stored as REAL and converted
//! to `Decimal` at the model boundary; balances, shares, and fees are
//! INTEGER. Trade settlement mutates its rows through a transaction owned
//! by the settlement layer, not through the helpers here.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    Holding, Instrument, NewsEvent, PricePoint, PriceState, TradeRecord, TradeSide, UpdateReason,
};

/// Database connection pool and query helpers.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Stored price state row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPriceState {
    ticker: String,
    current_price: f64,
    change_percent: f64,
    daily_volume: i64,
    last_updated: String,
}

/// Stored instrument row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredInstrument {
    ticker: String,
    name: String,
    sector: String,
    initial_price: f64,
    volatility: f64,
    trend: f64,
    dividend_yield: f64,
}

/// Stored holding row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredHolding {
    user_id: String,
    ticker: String,
    shares: i64,
    avg_cost: f64,
    total_cost: f64,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: String,
    user_id: String,
    ticker: String,
    side: String,
    shares: i64,
    price: f64,
    fee: i64,
    trade_date: String,
    executed_at: String,
}

/// Stored news row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredNews {
    ticker: Option<String>,
    headline: String,
    content: String,
    impact_score: f64,
    published_at: String,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

impl From<StoredPriceState> for PriceState {
    fn from(row: StoredPriceState) -> Self {
        PriceState {
            ticker: row.ticker,
            current_price: to_decimal(row.current_price),
            change_percent: to_decimal(row.change_percent),
            daily_volume: row.daily_volume,
            last_updated: parse_timestamp(&row.last_updated),
        }
    }
}

impl From<StoredInstrument> for Instrument {
    fn from(row: StoredInstrument) -> Self {
        Instrument {
            ticker: row.ticker,
            name: row.name,
            sector: row.sector,
            initial_price: to_decimal(row.initial_price),
            volatility: row.volatility,
            trend: row.trend,
            dividend_yield: row.dividend_yield,
        }
    }
}

impl From<StoredHolding> for Holding {
    fn from(row: StoredHolding) -> Self {
        Holding {
            user_id: row.user_id,
            ticker: row.ticker,
            shares: row.shares,
            avg_cost: to_decimal(row.avg_cost),
            total_cost: to_decimal(row.total_cost),
        }
    }
}

impl From<StoredTrade> for TradeRecord {
    fn from(row: StoredTrade) -> Self {
        TradeRecord {
            id: row.id,
            user_id: row.user_id,
            ticker: row.ticker,
            side: TradeSide::parse(&row.side),
            shares: row.shares,
            price: to_decimal(row.price),
            fee: row.fee,
            date: row.trade_date,
            executed_at: parse_timestamp(&row.executed_at),
        }
    }
}

impl From<StoredNews> for NewsEvent {
    fn from(row: StoredNews) -> Self {
        NewsEvent {
            ticker: row.ticker,
            headline: row.headline,
            content: row.content,
            impact_score: row.impact_score,
            published_at: parse_timestamp(&row.published_at),
        }
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Single-connection in-memory database, for tests and tooling.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                ticker TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sector TEXT NOT NULL,
                initial_price REAL NOT NULL,
                volatility REAL NOT NULL,
                trend REAL NOT NULL,
                dividend_yield REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_state (
                ticker TEXT PRIMARY KEY,
                current_price REAL NOT NULL,
                change_percent REAL NOT NULL DEFAULT 0,
                daily_volume INTEGER NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                price REAL NOT NULL,
                change_percent REAL NOT NULL DEFAULT 0,
                reason TEXT NOT NULL DEFAULT 'tick',
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS holdings (
                user_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                shares INTEGER NOT NULL,
                avg_cost REAL NOT NULL,
                total_cost REAL NOT NULL,
                PRIMARY KEY (user_id, ticker)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                shares INTEGER NOT NULL,
                price REAL NOT NULL,
                fee INTEGER NOT NULL,
                trade_date TEXT NOT NULL,
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT,
                headline TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                impact_score REAL NOT NULL DEFAULT 0,
                published_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_user_date ON trades(user_id, trade_date)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_price_history_ticker ON price_history(ticker, id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_published ON market_news(published_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Instruments ====================

    /// Seed the instrument catalog and default price states. Idempotent:
    /// existing rows (including current prices) are never overwritten.
    pub async fn seed_instruments(&self, catalog: &[Instrument]) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        for inst in catalog {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO instruments
                    (ticker, name, sector, initial_price, volatility, trend, dividend_yield)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&inst.ticker)
            .bind(&inst.name)
            .bind(&inst.sector)
            .bind(inst.initial_price.to_f64().unwrap_or(0.0))
            .bind(inst.volatility)
            .bind(inst.trend)
            .bind(inst.dividend_yield)
            .execute(&self.pool)
            .await?;

            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO price_state (ticker, current_price, last_updated) VALUES (?, ?, ?)",
            )
            .bind(&inst.ticker)
            .bind(inst.initial_price.to_f64().unwrap_or(0.0))
            .bind(&now)
            .execute(&self.pool)
            .await?;

            // Seed the history with the listing price only on first init.
            if inserted.rows_affected() > 0 {
                sqlx::query(
                    "INSERT INTO price_history (ticker, price, reason, recorded_at) VALUES (?, ?, 'tick', ?)",
                )
                .bind(&inst.ticker)
                .bind(inst.initial_price.to_f64().unwrap_or(0.0))
                .bind(&now)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Get one instrument by ticker.
    pub async fn get_instrument(&self, ticker: &str) -> Result<Option<Instrument>> {
        let row: Option<StoredInstrument> =
            sqlx::query_as("SELECT * FROM instruments WHERE ticker = ?")
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Instrument::from))
    }

    /// Get all instruments, ordered by ticker.
    pub async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        let rows: Vec<StoredInstrument> =
            sqlx::query_as("SELECT * FROM instruments ORDER BY ticker")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch instruments")?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    // ==================== Price state ====================

    /// Get the current price state for one ticker.
    pub async fn get_price_state(&self, ticker: &str) -> Result<Option<PriceState>> {
        let row: Option<StoredPriceState> =
            sqlx::query_as("SELECT * FROM price_state WHERE ticker = ?")
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(PriceState::from))
    }

    /// Get all price states, ordered by ticker.
    pub async fn list_price_states(&self) -> Result<Vec<PriceState>> {
        let rows: Vec<StoredPriceState> =
            sqlx::query_as("SELECT * FROM price_state ORDER BY ticker")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch price states")?;

        Ok(rows.into_iter().map(PriceState::from).collect())
    }

    /// Persist a price update: state, history entry, and history pruning
    /// to the cap, in one transaction.
    pub async fn apply_price_update(
        &self,
        ticker: &str,
        new_price: Decimal,
        change_percent: Decimal,
        reason: UpdateReason,
        history_cap: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let at = at.to_rfc3339();
        let price = new_price.to_f64().unwrap_or(0.0);
        let change = change_percent.to_f64().unwrap_or(0.0);

        sqlx::query(
            "UPDATE price_state SET current_price = ?, change_percent = ?, last_updated = ? WHERE ticker = ?",
        )
        .bind(price)
        .bind(change)
        .bind(&at)
        .bind(ticker)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO price_history (ticker, price, change_percent, reason, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ticker)
        .bind(price)
        .bind(change)
        .bind(reason.as_str())
        .bind(&at)
        .execute(&mut *tx)
        .await?;

        // FIFO eviction: keep only the newest `history_cap` entries.
        sqlx::query(
            r#"
            DELETE FROM price_history
            WHERE ticker = ?
              AND id NOT IN (
                SELECT id FROM price_history WHERE ticker = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(ticker)
        .bind(ticker)
        .bind(history_cap)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("Failed to commit price update")?;
        Ok(())
    }

    /// Most recent history points for a ticker, oldest first.
    pub async fn price_history(&self, ticker: &str, limit: i64) -> Result<Vec<PricePoint>> {
        let rows: Vec<(f64, f64, String, String)> = sqlx::query_as(
            r#"
            SELECT price, change_percent, reason, recorded_at
            FROM price_history WHERE ticker = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(ticker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch price history")?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(price, change, reason, at)| PricePoint {
                ticker: ticker.to_string(),
                price: to_decimal(price),
                change_percent: to_decimal(change),
                reason: UpdateReason::parse(&reason),
                recorded_at: parse_timestamp(&at),
            })
            .collect())
    }

    /// Reset daily traded volume on all instruments (UTC day rollover).
    pub async fn reset_daily_volumes(&self) -> Result<()> {
        sqlx::query("UPDATE price_state SET daily_volume = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Users ====================

    /// Get a user's balance, creating the account with the starting
    /// balance on first touch.
    pub async fn ensure_user(&self, user_id: &str, starting_balance: i64) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO users (user_id, balance) VALUES (?, ?)")
            .bind(user_id)
            .bind(starting_balance)
            .execute(&self.pool)
            .await?;

        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(balance)
    }

    /// Get a user's balance without creating the account.
    pub async fn get_balance(&self, user_id: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(b,)| b))
    }

    // ==================== Holdings ====================

    /// Get one holding. Absence means a zero position.
    pub async fn get_holding(&self, user_id: &str, ticker: &str) -> Result<Option<Holding>> {
        let row: Option<StoredHolding> =
            sqlx::query_as("SELECT * FROM holdings WHERE user_id = ? AND ticker = ?")
                .bind(user_id)
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Holding::from))
    }

    /// All holdings for one user, ordered by ticker.
    pub async fn holdings_for_user(&self, user_id: &str) -> Result<Vec<Holding>> {
        let rows: Vec<StoredHolding> =
            sqlx::query_as("SELECT * FROM holdings WHERE user_id = ? ORDER BY ticker")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch holdings")?;

        Ok(rows.into_iter().map(Holding::from).collect())
    }

    /// Every holding in the system, for ranking aggregation.
    pub async fn all_holdings(&self) -> Result<Vec<Holding>> {
        let rows: Vec<StoredHolding> =
            sqlx::query_as("SELECT * FROM holdings ORDER BY user_id, ticker")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch holdings")?;

        Ok(rows.into_iter().map(Holding::from).collect())
    }

    // ==================== Trades ====================

    /// Number of trades a user executed within a UTC day bucket.
    pub async fn count_trades_on(&self, user_id: &str, date: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE user_id = ? AND trade_date = ?")
                .bind(user_id)
                .bind(date)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Most recent trades for a user, newest first.
    pub async fn recent_trades(&self, user_id: &str, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows: Vec<StoredTrade> = sqlx::query_as(
            "SELECT * FROM trades WHERE user_id = ? ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        Ok(rows.into_iter().map(TradeRecord::from).collect())
    }

    // ==================== News ====================

    /// Append a news event.
    pub async fn insert_news(&self, event: &NewsEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_news (ticker, headline, content, impact_score, published_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.ticker)
        .bind(&event.headline)
        .bind(&event.content)
        .bind(event.impact_score)
        .bind(event.published_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// News events published at or after `since`, oldest first.
    pub async fn recent_news(&self, since: DateTime<Utc>) -> Result<Vec<NewsEvent>> {
        let rows: Vec<StoredNews> = sqlx::query_as(
            "SELECT ticker, headline, content, impact_score, published_at FROM market_news WHERE published_at >= ? ORDER BY published_at",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch news")?;

        Ok(rows.into_iter().map(NewsEvent::from).collect())
    }

    /// Get the connection pool (settlement owns its own transactions).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
