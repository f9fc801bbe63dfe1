//! Spot Market Module
//!
//! - `registry`: the symbol -> engine map built at boot
//! - `trade_processor`: the single reader of the engine topic
//!
//! Together these components turn engine commands into book mutations and
//! the events that follow them.

pub mod registry;
pub mod trade_processor;

pub use registry::EngineRegistry;
pub use trade_processor::TradeProcessor;
