//! Per-user holdings with average-cost accounting, executed inside the
//! caller's transaction so a trade's mutations commit all-or-nothing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use crate::error::MarketError;
use crate::models::Holding;

/// Outcome of reducing a position.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    /// Average cost in effect at the moment of sale, for P/L reporting
    pub avg_cost_at_sale: Decimal,

    /// Shares left after the sale; 0 means the holding was deleted
    pub remaining_shares: i64,
}

/// Holdings mutations. Stateless; every operation runs against a
/// connection (normally a settlement transaction) supplied by the caller.
pub struct PortfolioLedger;

impl PortfolioLedger {
    async fn fetch(
        conn: &mut SqliteConnection,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<Holding>, MarketError> {
        let row: Option<(i64, f64, f64)> = sqlx::query_as(
            "SELECT shares, avg_cost, total_cost FROM holdings WHERE user_id = ? AND ticker = ?",
        )
        .bind(user_id)
        .bind(ticker)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|(shares, avg_cost, total_cost)| Holding {
            user_id: user_id.to_string(),
            ticker: ticker.to_string(),
            shares,
            avg_cost: Decimal::try_from(avg_cost).unwrap_or(Decimal::ZERO),
            total_cost: Decimal::try_from(total_cost).unwrap_or(Decimal::ZERO),
        }))
    }

    async fn store(conn: &mut SqliteConnection, holding: &Holding) -> Result<(), MarketError> {
        sqlx::query(
            r#"
            INSERT INTO holdings (user_id, ticker, shares, avg_cost, total_cost)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, ticker) DO UPDATE SET
                shares = excluded.shares,
                avg_cost = excluded.avg_cost,
                total_cost = excluded.total_cost
            "#,
        )
        .bind(&holding.user_id)
        .bind(&holding.ticker)
        .bind(holding.shares)
        .bind(holding.avg_cost.to_f64().unwrap_or(0.0))
        .bind(holding.total_cost.to_f64().unwrap_or(0.0))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Record a buy: create the holding on first purchase, otherwise fold
    /// the shares in at the weighted-average cost.
    pub async fn apply_buy(
        conn: &mut SqliteConnection,
        user_id: &str,
        ticker: &str,
        shares: i64,
        exec_price: Decimal,
    ) -> Result<Holding, MarketError> {
        if shares <= 0 || exec_price <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity);
        }

        let holding = match Self::fetch(conn, user_id, ticker).await? {
            Some(mut existing) => {
                existing.buy(shares, exec_price);
                existing
            }
            None => Holding::open(user_id.to_string(), ticker.to_string(), shares, exec_price),
        };

        Self::store(conn, &holding).await?;
        Ok(holding)
    }

    /// Record a sell. Fails with `InsufficientHoldings` (mutating nothing)
    /// when the position is absent or too small. Selling the entire
    /// position deletes the row; a zero-share holding is never stored.
    pub async fn apply_sell(
        conn: &mut SqliteConnection,
        user_id: &str,
        ticker: &str,
        shares: i64,
    ) -> Result<SellOutcome, MarketError> {
        if shares <= 0 {
            return Err(MarketError::InvalidQuantity);
        }

        let mut holding = match Self::fetch(conn, user_id, ticker).await? {
            Some(h) if h.shares >= shares => h,
            Some(h) => {
                return Err(MarketError::InsufficientHoldings {
                    held: h.shares,
                    requested: shares,
                })
            }
            None => {
                return Err(MarketError::InsufficientHoldings {
                    held: 0,
                    requested: shares,
                })
            }
        };

        let avg_cost_at_sale = holding.sell(shares);

        if holding.is_closed() {
            sqlx::query("DELETE FROM holdings WHERE user_id = ? AND ticker = ?")
                .bind(user_id)
                .bind(ticker)
                .execute(&mut *conn)
                .await?;
        } else {
            Self::store(conn, &holding).await?;
        }

        Ok(SellOutcome {
            avg_cost_at_sale,
            remaining_shares: holding.shares,
        })
    }
}
