//! Instrument reference data and the built-in catalog.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A tradable simulated stock. Static reference data, loaded at startup;
/// only the associated price state mutates at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique ticker symbol
    pub ticker: String,

    /// Company display name
    pub name: String,

    /// Sector label for display
    pub sector: String,

    /// Listing price in KR; also anchors the price floor
    pub initial_price: Decimal,

    /// Annualized-ish volatility coefficient for the random walk
    pub volatility: f64,

    /// Drift coefficient per day
    pub trend: f64,

    /// Dividend yield in percent (display only)
    pub dividend_yield: f64,
}

impl Instrument {
    /// Hard lower bound for the price: 10% of the listing price. Neither
    /// ticks nor news shocks may push the price below this.
    pub fn floor_price(&self) -> Decimal {
        self.initial_price * dec!(0.1)
    }
}

/// The built-in ten-company catalog. Seeded into the store at startup;
/// seeding is idempotent and never overwrites existing price state.
pub fn default_catalog() -> Vec<Instrument> {
    fn inst(
        ticker: &str,
        name: &str,
        sector: &str,
        initial_price: Decimal,
        volatility: f64,
        trend: f64,
        dividend_yield: f64,
    ) -> Instrument {
        Instrument {
            ticker: ticker.to_string(),
            name: name.to_string(),
            sector: sector.to_string(),
            initial_price,
            volatility,
            trend,
            dividend_yield,
        }
    }

    vec![
        inst("WICR", "Wicrosoft", "Technology", dec!(1200), 0.06, 0.002, 1.5),
        inst("QOOG", "Qoogle", "Quantum Computing", dec!(2800), 0.07, 0.003, 1.2),
        inst("RBLX", "Roblux", "Gaming", dec!(1800), 0.08, 0.001, 0.0),
        inst("NFOX", "Netfox", "Streaming", dec!(1400), 0.05, 0.0012, 2.5),
        inst("MOSL", "Mosla", "Renewable Energy", dec!(680), 0.05, 0.0005, 3.5),
        inst("NKDA", "Nikuda", "Logistics", dec!(920), 0.03, 0.001, 2.8),
        inst("FSCH", "Firma Schnitzel", "Biotech", dec!(2200), 0.06, 0.002, 4.5),
        inst("IRHA", "Iroha", "Healthcare IT", dec!(1650), 0.04, 0.0008, 2.8),
        inst("STRK", "Strike", "Digital Payments", dec!(850), 0.06, 0.0005, 4.2),
        inst("ASST", "Assist", "Banking", dec!(3200), 0.02, 0.0008, 3.8),
    ]
}
