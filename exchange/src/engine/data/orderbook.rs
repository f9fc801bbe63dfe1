use crate::engine::decimal;
use crate::engine::entry::{Order, OrderDirection};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};

/// Resting limit orders at one price, oldest first
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    pub orders: VecDeque<Order>,
}

impl PriceLevel {
    fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Sum of the open quantity of every order at this level
    pub fn total_remaining(&self) -> Decimal {
        self.orders.iter().fold(Decimal::ZERO, |acc, o| {
            decimal::saturating_add_floor(acc, o.remaining_quantity())
        })
    }
}

/// One direction of a symbol's book.
///
/// Limit orders live in price levels keyed by price; market orders that could
/// not be filled on arrival wait in a queue sorted by submission time.
#[derive(Debug, Clone)]
pub struct OrderBookSide {
    direction: OrderDirection,
    levels: BTreeMap<Decimal, PriceLevel>,
    market: VecDeque<Order>,
}

impl OrderBookSide {
    pub fn new(direction: OrderDirection) -> Self {
        Self {
            direction,
            levels: BTreeMap::new(),
            market: VecDeque::new(),
        }
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// Level prices in matching priority: bids high to low, asks low to high
    pub fn prices(&self) -> Vec<Decimal> {
        match self.direction {
            OrderDirection::Buy => self.levels.keys().rev().copied().collect(),
            OrderDirection::Sell => self.levels.keys().copied().collect(),
        }
    }

    pub fn best_price(&self) -> Option<Decimal> {
        match self.direction {
            OrderDirection::Buy => self.levels.keys().next_back().copied(),
            OrderDirection::Sell => self.levels.keys().next().copied(),
        }
    }

    pub fn level(&self, price: &Decimal) -> Option<&PriceLevel> {
        self.levels.get(price)
    }

    pub fn level_mut(&mut self, price: &Decimal) -> Option<&mut PriceLevel> {
        self.levels.get_mut(price)
    }

    /// Drops the level at `price` once its last order is gone
    pub fn prune_level(&mut self, price: &Decimal) {
        if self.levels.get(price).map_or(false, PriceLevel::is_empty) {
            self.levels.remove(price);
        }
    }

    /// Levels in matching priority
    pub fn levels(&self) -> Vec<&PriceLevel> {
        match self.direction {
            OrderDirection::Buy => self.levels.values().rev().collect(),
            OrderDirection::Sell => self.levels.values().collect(),
        }
    }

    pub fn add_limit(&mut self, order: Order) {
        self.levels
            .entry(order.price)
            .or_insert_with(|| PriceLevel::new(order.price))
            .orders
            .push_back(order);
    }

    /// Queues a market order behind every order submitted at or before it
    pub fn add_market(&mut self, order: Order) {
        let at = self
            .market
            .iter()
            .position(|o| o.submitted_at_millis > order.submitted_at_millis)
            .unwrap_or(self.market.len());
        self.market.insert(at, order);
    }

    pub fn market_queue(&self) -> &VecDeque<Order> {
        &self.market
    }

    pub fn market_queue_mut(&mut self) -> &mut VecDeque<Order> {
        &mut self.market
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.levels
            .values()
            .flat_map(|level| level.orders.iter())
            .chain(self.market.iter())
            .find(|o| o.order_id == order_id)
    }

    /// Removes a resting order, limit or market, by id
    pub fn remove(&mut self, order_id: &str) -> Option<Order> {
        let found = self.levels.iter().find_map(|(price, level)| {
            level
                .orders
                .iter()
                .position(|o| o.order_id == order_id)
                .map(|idx| (*price, idx))
        });
        if let Some((price, idx)) = found {
            let order = self.levels.get_mut(&price)?.orders.remove(idx);
            self.prune_level(&price);
            return order;
        }
        let idx = self.market.iter().position(|o| o.order_id == order_id)?;
        self.market.remove(idx)
    }

    /// Restores time priority after a bulk reload
    pub fn sort_by_time(&mut self) {
        for level in self.levels.values_mut() {
            level
                .orders
                .make_contiguous()
                .sort_by_key(|o| o.submitted_at_millis);
        }
        self.market
            .make_contiguous()
            .sort_by_key(|o| o.submitted_at_millis);
    }
}
