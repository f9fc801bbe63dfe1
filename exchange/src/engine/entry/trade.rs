//! Trade Types and Structures
//!
//! A trade is one execution between an incoming order and a resting order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{now_millis, Order, OrderDirection};

/// Represents an executed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Unique identifier for the trade
    pub id: String,
    pub symbol: String,
    /// Execution price
    pub price: Decimal,
    /// Base quantity exchanged
    pub amount: Decimal,
    /// Quote value exchanged, `amount * price` truncated
    pub turnover: Decimal,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub buy_user_id: u64,
    pub sell_user_id: u64,
    /// Direction of the incoming (aggressing) order
    pub taker_direction: OrderDirection,
    pub time: i64,
}

impl Trade {
    /// Creates a trade between the incoming order and the order it hit
    pub fn between(
        incoming: &Order,
        resting: &Order,
        price: Decimal,
        amount: Decimal,
        turnover: Decimal,
    ) -> Self {
        let (buy, sell) = match incoming.direction {
            OrderDirection::Buy => (incoming, resting),
            OrderDirection::Sell => (resting, incoming),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: incoming.symbol.clone(),
            price,
            amount,
            turnover,
            buy_order_id: buy.order_id.clone(),
            sell_order_id: sell.order_id.clone(),
            buy_user_id: buy.user_id,
            sell_user_id: sell.user_id,
            taker_direction: incoming.direction,
            time: now_millis(),
        }
    }
}
