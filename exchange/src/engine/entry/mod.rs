pub mod order;
pub mod symbol;
pub mod trade;

pub use order::{Order, OrderDirection, OrderStatus, OrderType};
pub use symbol::{Symbol, SymbolStatus};
pub use trade::Trade;
