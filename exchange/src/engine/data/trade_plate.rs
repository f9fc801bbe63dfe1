//! Aggregated depth ("trade plate") for one side of one symbol

use crate::engine::decimal;
use crate::engine::entry::{Order, OrderDirection};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlateItem {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Depth snapshot published on `exchange_order_trade_plate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePlateResult {
    pub direction: OrderDirection,
    pub symbol: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub items: Vec<TradePlateItem>,
}

/// Items are kept in matching priority so the head of the list is the
/// visible top of book. Every operation takes the same lock.
#[derive(Debug)]
pub struct TradePlate {
    symbol: String,
    direction: OrderDirection,
    max_depth: usize,
    items: Mutex<Vec<TradePlateItem>>,
}

impl TradePlate {
    pub fn new(symbol: &str, direction: OrderDirection, max_depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            max_depth,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// `a` is shown before `b`
    fn ahead(&self, a: Decimal, b: Decimal) -> bool {
        match self.direction {
            OrderDirection::Buy => a > b,
            OrderDirection::Sell => a < b,
        }
    }

    /// Adds the open quantity of a resting limit order.
    ///
    /// A new price level is only created while the plate is below its
    /// maximum depth.
    pub fn add(&self, order: &Order) {
        if order.direction != self.direction || order.is_market() {
            return;
        }
        let remaining = order.remaining_quantity();
        let mut items = self.items.lock();
        if let Some(item) = items.iter_mut().find(|i| i.price == order.price) {
            item.amount = decimal::saturating_add_floor(item.amount, remaining);
            return;
        }
        if items.len() >= self.max_depth {
            return;
        }
        let at = items
            .iter()
            .position(|i| self.ahead(order.price, i.price))
            .unwrap_or(items.len());
        items.insert(
            at,
            TradePlateItem {
                price: order.price,
                amount: decimal::floor(remaining),
            },
        );
    }

    /// Takes `amount` off the level at the order's price, dropping the level
    /// once nothing is left.
    pub fn remove(&self, order: &Order, amount: Decimal) {
        let mut items = self.items.lock();
        if let Some(idx) = items.iter().position(|i| i.price == order.price) {
            let left = decimal::sub_floor(items[idx].amount, amount);
            if left <= Decimal::ZERO {
                items.remove(idx);
            } else {
                items[idx].amount = left;
            }
        }
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn get_items(&self) -> Vec<TradePlateItem> {
        self.items.lock().clone()
    }

    pub fn depth(&self) -> usize {
        self.items.lock().len()
    }

    /// The top `num` levels with summary statistics over those levels
    pub fn result(&self, num: usize) -> TradePlateResult {
        let items: Vec<TradePlateItem> = {
            let guard = self.items.lock();
            guard.iter().take(num).cloned().collect()
        };
        let stat = |f: fn(&TradePlateItem) -> Decimal, pick_max: bool| {
            items
                .iter()
                .map(f)
                .reduce(|a, b| if (b > a) == pick_max { b } else { a })
                .unwrap_or(Decimal::ZERO)
        };
        TradePlateResult {
            direction: self.direction,
            symbol: self.symbol.clone(),
            min_amount: stat(|i| i.amount, false),
            max_amount: stat(|i| i.amount, true),
            min_price: stat(|i| i.price, false),
            max_price: stat(|i| i.price, true),
            items,
        }
    }
}
