//! Commands carried on the engine's inbound topic
//!
//! Only the single reader of `exchange_order_trading` turns these into engine
//! calls, which is what gives each symbol's book a total order.

use super::entry::Order;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum MatchCmd {
    /// Admit a TRADING order into its symbol's book
    PlaceOrder { order: Order },
    /// Withdraw a resting order
    #[serde(rename_all = "camelCase")]
    CancelOrder { order_id: String, symbol: String },
}

impl MatchCmd {
    pub fn symbol(&self) -> &str {
        match self {
            MatchCmd::PlaceOrder { order } => &order.symbol,
            MatchCmd::CancelOrder { symbol, .. } => symbol,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            MatchCmd::PlaceOrder { order } => &order.order_id,
            MatchCmd::CancelOrder { order_id, .. } => order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MatchCmd::PlaceOrder { .. } => "place_order",
            MatchCmd::CancelOrder { .. } => "cancel_order",
        }
    }
}
