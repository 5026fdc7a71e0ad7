//! Leaderboard over unrealized performance.
//!
//! Each user's open holdings are marked to the current price snapshot
//! and ranked by profit percentage, so small and large accounts compete
//! on equal footing.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::db::Database;
use crate::error::MarketError;
use crate::models::{Holding, PriceState};

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub user_id: String,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub profit: Decimal,
    pub profit_percent: Decimal,
}

/// Aggregates holdings per user, marks them to the given prices, and
/// sorts descending by profit percent. Users whose entire cost basis is
/// zero are skipped; a percentage against nothing is meaningless.
pub fn build_ranking(holdings: &[Holding], prices: &[PriceState]) -> Vec<RankingEntry> {
    let price_by_ticker: HashMap<&str, Decimal> = prices
        .iter()
        .map(|p| (p.ticker.as_str(), p.current_price))
        .collect();

    let mut per_user: HashMap<&str, (Decimal, Decimal)> = HashMap::new();
    for holding in holdings {
        let Some(&price) = price_by_ticker.get(holding.ticker.as_str()) else {
            continue;
        };
        let entry = per_user.entry(holding.user_id.as_str()).or_default();
        entry.0 += holding.market_value(price);
        entry.1 += holding.total_cost;
    }

    let mut entries: Vec<RankingEntry> = per_user
        .into_iter()
        .filter(|(_, (_, cost))| !cost.is_zero())
        .map(|(user_id, (market_value, cost_basis))| {
            let profit = market_value - cost_basis;
            let profit_percent = (profit / cost_basis * Decimal::ONE_HUNDRED).round_dp(2);
            RankingEntry {
                user_id: user_id.to_string(),
                market_value,
                cost_basis,
                profit,
                profit_percent,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.profit_percent
            .cmp(&a.profit_percent)
            .then_with(|| b.profit.abs().cmp(&a.profit.abs()))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    entries
}

/// Database-backed leaderboard.
#[derive(Clone)]
pub struct Ranking {
    db: Database,
}

impl Ranking {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn top(&self, limit: usize) -> Result<Vec<RankingEntry>, MarketError> {
        let holdings = self.db.all_holdings().await?;
        let prices = self.db.list_price_states().await?;
        let mut entries = build_ranking(&holdings, &prices);
        entries.truncate(limit);
        Ok(entries)
    }
}
