pub mod config;
pub mod ledger;
pub mod ranking;
pub mod settlement;

pub use config::MarketConfig;
pub use ledger::{PortfolioLedger, SellOutcome};
pub use ranking::{build_ranking, Ranking, RankingEntry};
pub use settlement::{BuyReceipt, SellReceipt, TradeSettlement};
