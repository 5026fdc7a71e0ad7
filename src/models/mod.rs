//! Data models for instruments, prices, holdings, trades, and news.

mod holding;
mod instrument;
mod news;
mod price;
mod trade;

pub use holding::Holding;
pub use instrument::{default_catalog, Instrument};
pub use news::NewsEvent;
pub use price::{PricePoint, PriceState, UpdateReason};
pub use trade::{TradeRecord, TradeSide};
