use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::decimal;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDirection {
    #[default]
    Buy,
    Sell,
}

impl OrderDirection {
    pub fn label(self) -> &'static str {
        match self {
            OrderDirection::Buy => "BUY",
            OrderDirection::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// INIT -> TRADING -> COMPLETED | CANCELED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Init,
    Trading,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Init => "INIT",
            OrderStatus::Trading => "TRADING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// An exchange order.
///
/// For a MARKET BUY `requested_amount` is denominated in the quote unit (how
/// much to spend); for every other order it is a base quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub user_id: u64,
    pub symbol: String,
    pub direction: OrderDirection,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Decimal,
    pub requested_amount: Decimal,
    #[serde(default)]
    pub traded_amount: Decimal,
    #[serde(default)]
    pub turnover: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub submitted_at_millis: i64,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[allow(unused)]
impl Order {
    pub fn new(
        order_id: impl Into<String>,
        user_id: u64,
        symbol: impl Into<String>,
        order_type: OrderType,
        direction: OrderDirection,
        price: Decimal,
        requested_amount: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id,
            symbol: symbol.into(),
            direction,
            order_type,
            price,
            requested_amount,
            traded_amount: Decimal::ZERO,
            turnover: Decimal::ZERO,
            status: OrderStatus::Init,
            submitted_at_millis: now_millis(),
        }
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn is_limit(&self) -> bool {
        self.order_type == OrderType::Limit
    }

    pub fn is_market_buy(&self) -> bool {
        self.is_market() && self.direction == OrderDirection::Buy
    }

    /// Base quantity still open, ignoring the quote denomination of market buys
    pub fn remaining_quantity(&self) -> Decimal {
        decimal::sub_floor(self.requested_amount, self.traded_amount)
    }

    /// Base quantity this order can still take when executing at `price`.
    ///
    /// A market buy converts its unspent quote into base at that price.
    pub fn remaining_at(&self, price: Decimal) -> Decimal {
        if self.is_market_buy() {
            decimal::div_floor(
                decimal::sub_floor(self.requested_amount, self.turnover),
                price,
            )
        } else {
            self.remaining_quantity()
        }
    }

    /// Traded amount and turnover after a fill of `amount` base units worth
    /// `turnover` quote units, without applying it
    pub fn totals_after(
        &self,
        amount: Decimal,
        turnover: Decimal,
    ) -> Result<(Decimal, Decimal), EngineError> {
        Ok((
            decimal::add_floor(self.traded_amount, amount)?,
            decimal::add_floor(self.turnover, turnover)?,
        ))
    }

    pub fn is_trading(&self) -> bool {
        self.status == OrderStatus::Trading
    }

    /// Checks that amounts are in range before the order touches a book.
    ///
    /// The notional (`price * requested_amount`, or the quote amount of a
    /// market buy) must be representable, which bounds every single fill.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = self.requested_amount <= Decimal::ZERO
            || self.price < Decimal::ZERO
            || (self.is_limit() && self.price.is_zero())
            || self.traded_amount < Decimal::ZERO
            || self.turnover < Decimal::ZERO;
        if invalid {
            return Err(EngineError::InvalidAmount(self.order_id.clone()));
        }
        if !self.is_market_buy() {
            decimal::mul_floor(self.price, self.requested_amount)?;
        }
        Ok(())
    }
}
