use crate::engine::entry::{OrderDirection, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Published on `exchange_order_add` once a client order is accepted.
///
/// `amount` is what must be frozen: quote currency for buys, base quantity
/// for sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionMessage {
    pub user_id: u64,
    pub order_id: String,
    pub amount: Decimal,
    pub symbol: String,
    pub direction: OrderDirection,
    pub base_unit: String,
    pub coin_unit: String,
}

impl AdmissionMessage {
    pub fn new(
        user_id: u64,
        order_id: &str,
        amount: Decimal,
        symbol: &Symbol,
        direction: OrderDirection,
    ) -> Self {
        Self {
            user_id,
            order_id: order_id.to_string(),
            amount,
            symbol: symbol.name.clone(),
            direction,
            base_unit: symbol.base_unit.clone(),
            coin_unit: symbol.coin_unit.clone(),
        }
    }

    /// The wallet unit that backs this order
    pub fn freeze_unit(&self) -> &str {
        match self.direction {
            OrderDirection::Buy => &self.base_unit,
            OrderDirection::Sell => &self.coin_unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingReady {
    pub user_id: u64,
    pub order_id: String,
}
