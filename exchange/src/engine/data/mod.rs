//! Data Structures Module
//!
//! Book sides (price levels plus the market-order queue) and the aggregated
//! depth view published from them.

pub mod orderbook;
pub mod trade_plate;

pub use orderbook::{OrderBookSide, PriceLevel};
pub use trade_plate::{TradePlate, TradePlateItem, TradePlateResult, DEFAULT_MAX_DEPTH};
