//! A user's position in one instrument with average-cost-basis accounting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-user, per-ticker position. The record only exists while
/// `shares > 0`; a zero position is represented by its absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: String,
    pub ticker: String,

    /// Shares owned, always positive while the record exists
    pub shares: i64,

    /// Weighted-average purchase price per share; recomputed only on buys
    pub avg_cost: Decimal,

    /// Cumulative cost of the current position (`avg_cost * shares`)
    pub total_cost: Decimal,
}

impl Holding {
    /// Open a new position from a first buy.
    pub fn open(user_id: String, ticker: String, shares: i64, exec_price: Decimal) -> Self {
        let total_cost = exec_price * Decimal::from(shares);
        Self {
            user_id,
            ticker,
            shares,
            avg_cost: exec_price,
            total_cost,
        }
    }

    /// Fold a subsequent buy into the position, recomputing the weighted
    /// average cost. This is the one correctness-critical formula in the
    /// system: the average is invariant under reordering of buys.
    pub fn buy(&mut self, shares: i64, exec_price: Decimal) {
        let added_cost = exec_price * Decimal::from(shares);
        self.shares += shares;
        self.total_cost += added_cost;
        self.avg_cost = self.total_cost / Decimal::from(self.shares);
    }

    /// Reduce the position by `shares`, which the caller has already
    /// validated against the held amount. The average cost of the
    /// remaining position is unchanged; realized P/L is computed by the
    /// caller from the returned pre-sale average cost.
    pub fn sell(&mut self, shares: i64) -> Decimal {
        debug_assert!(shares <= self.shares);
        let avg_cost_at_sale = self.avg_cost;
        self.shares -= shares;
        self.total_cost = self.avg_cost * Decimal::from(self.shares);
        avg_cost_at_sale
    }

    /// Whether the position has been fully sold and should be deleted.
    pub fn is_closed(&self) -> bool {
        self.shares <= 0
    }

    /// Market value at the given price.
    pub fn market_value(&self, current_price: Decimal) -> Decimal {
        current_price * Decimal::from(self.shares)
    }

    /// Unrealized profit/loss at the given price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        self.market_value(current_price) - self.total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn holding(shares: i64, price: Decimal) -> Holding {
        Holding::open("u1".to_string(), "WICR".to_string(), shares, price)
    }

    #[test]
    fn weighted_average_on_repeated_buys() {
        let mut h = holding(10, dec!(100));
        h.buy(5, dec!(120));

        assert_eq!(h.shares, 15);
        assert_eq!(h.total_cost, dec!(1600));
        // (1000 + 600) / 15
        assert_eq!(h.avg_cost.round_dp(2), dec!(106.67));
    }

    #[test]
    fn average_cost_is_order_independent() {
        let buys = [
            (10i64, dec!(100)),
            (5i64, dec!(120)),
            (20i64, dec!(95)),
            (1i64, dec!(300)),
        ];

        let mut forward = holding(buys[0].0, buys[0].1);
        for &(s, p) in &buys[1..] {
            forward.buy(s, p);
        }

        let mut reversed = buys.iter().rev();
        let &(first_shares, first_price) = reversed.next().unwrap();
        let mut backward = holding(first_shares, first_price);
        for &(s, p) in reversed {
            backward.buy(s, p);
        }

        assert_eq!(forward.avg_cost, backward.avg_cost);
        assert_eq!(forward.total_cost, backward.total_cost);

        // Closed form: sum(price*shares) / sum(shares)
        let total: Decimal = buys.iter().map(|(s, p)| *p * Decimal::from(*s)).sum();
        let count: i64 = buys.iter().map(|(s, _)| s).sum();
        assert_eq!(forward.avg_cost, total / Decimal::from(count));
    }

    #[test]
    fn sell_keeps_average_cost_and_reports_it() {
        let mut h = holding(10, dec!(100));
        h.buy(5, dec!(120));
        let avg_before = h.avg_cost;

        let avg_at_sale = h.sell(8);

        assert_eq!(avg_at_sale, avg_before);
        assert_eq!(h.shares, 7);
        assert_eq!(h.avg_cost, avg_before);
        assert_eq!(h.total_cost, avg_before * dec!(7));
        assert!(!h.is_closed());
    }

    #[test]
    fn selling_everything_closes_the_position() {
        let mut h = holding(10, dec!(100));
        h.sell(10);
        assert!(h.is_closed());
        assert_eq!(h.total_cost, Decimal::ZERO);
    }

    #[test]
    fn unrealized_pnl_tracks_current_price() {
        let h = holding(10, dec!(100));
        assert_eq!(h.unrealized_pnl(dec!(130)), dec!(300));
        assert_eq!(h.unrealized_pnl(dec!(90)), dec!(-100));
    }
}
