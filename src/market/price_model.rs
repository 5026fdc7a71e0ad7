//! Stochastic price evolution: one geometric-random-walk step per tick.

use anyhow::{Context, Result};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use statrs::distribution::Normal;

use crate::models::Instrument;

/// Result of advancing one instrument by one tick.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub new_price: Decimal,
    pub change_percent: Decimal,
}

/// Geometric-random-walk price model. Each tick draws one standard-normal
/// sample and evolves the price as
/// `price * exp(trend*dt + volatility*sqrt(dt)*z)`, clamped to the
/// instrument's floor. Seedable for reproducible simulations.
pub struct PriceModel {
    rng: StdRng,
    normal: Normal,
}

impl PriceModel {
    pub fn new() -> Result<Self> {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Result<Self> {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Result<Self> {
        let normal = Normal::new(0.0, 1.0).context("standard normal distribution")?;
        Ok(Self { rng, normal })
    }

    /// Advance one instrument by one tick of `dt` days. Does not persist;
    /// the scheduler writes the result back to the store.
    pub fn advance(&mut self, instrument: &Instrument, current_price: Decimal, dt: f64) -> PriceTick {
        let z = self.normal.sample(&mut self.rng);
        advance_with_sample(instrument, current_price, dt, z)
    }
}

/// Deterministic core of the random walk, with the normal sample supplied
/// by the caller.
pub fn advance_with_sample(
    instrument: &Instrument,
    current_price: Decimal,
    dt: f64,
    z: f64,
) -> PriceTick {
    if dt <= 0.0 || current_price <= Decimal::ZERO {
        return PriceTick {
            new_price: current_price,
            change_percent: Decimal::ZERO,
        };
    }

    let drift = instrument.trend * dt;
    let volatility_term = instrument.volatility * dt.sqrt() * z;
    let multiplier = (drift + volatility_term).exp();

    // Extreme samples can overflow f64 or Decimal; fall back to the
    // unchanged price rather than propagate a NaN into the store.
    let new_price = Decimal::from_f64(multiplier)
        .and_then(|m| current_price.checked_mul(m))
        .unwrap_or(current_price)
        .max(instrument.floor_price())
        .round_dp(2);

    let change_percent = ((new_price - current_price) / current_price * dec!(100)).round_dp(2);

    PriceTick {
        new_price,
        change_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_catalog;

    fn instrument() -> Instrument {
        default_catalog()
            .into_iter()
            .find(|i| i.ticker == "WICR")
            .unwrap()
    }

    #[test]
    fn zero_sample_moves_price_by_drift_only() {
        let inst = instrument();
        let tick = advance_with_sample(&inst, dec!(1200), 0.5 / 24.0, 0.0);

        // exp(0.002 * dt) is a hair above 1, so the price barely rises.
        assert!(tick.new_price >= dec!(1200));
        assert!(tick.new_price < dec!(1201));
    }

    #[test]
    fn price_never_falls_below_floor() {
        let inst = instrument();
        let floor = inst.floor_price();

        // Extreme negative z-scores, long dt, repeated application.
        let mut price = dec!(1200);
        for _ in 0..200 {
            let tick = advance_with_sample(&inst, price, 1.0, -10.0);
            assert!(tick.new_price >= floor, "price {} below floor {}", tick.new_price, floor);
            price = tick.new_price;
        }
        assert_eq!(price, floor);
    }

    #[test]
    fn extreme_positive_sample_does_not_produce_nan() {
        let inst = instrument();
        let tick = advance_with_sample(&inst, dec!(1200), 1.0, 1.0e6);
        // Overflowing multiplier falls back to the unchanged price.
        assert_eq!(tick.new_price, dec!(1200));
        assert_eq!(tick.change_percent, Decimal::ZERO);
    }

    #[test]
    fn change_percent_matches_prices() {
        let inst = instrument();
        let tick = advance_with_sample(&inst, dec!(1000), 0.5 / 24.0, 1.5);
        let expected = ((tick.new_price - dec!(1000)) / dec!(1000) * dec!(100)).round_dp(2);
        assert_eq!(tick.change_percent, expected);
    }

    #[test]
    fn nonpositive_dt_is_a_no_op() {
        let inst = instrument();
        let tick = advance_with_sample(&inst, dec!(1200), 0.0, 2.0);
        assert_eq!(tick.new_price, dec!(1200));
    }

    #[test]
    fn seeded_model_is_reproducible() {
        let inst = instrument();
        let mut a = PriceModel::with_seed(42).unwrap();
        let mut b = PriceModel::with_seed(42).unwrap();
        let ta = a.advance(&inst, dec!(1200), 0.5 / 24.0);
        let tb = b.advance(&inst, dec!(1200), 0.5 / 24.0);
        assert_eq!(ta.new_price, tb.new_price);
    }

}
