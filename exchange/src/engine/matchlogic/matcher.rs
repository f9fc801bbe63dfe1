use crate::engine::data::{OrderBookSide, TradePlate, TradePlateResult};
use crate::engine::decimal;
use crate::engine::entry::{Order, OrderDirection, OrderStatus, Trade};
use crate::error::EngineError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};

/// How many finished order ids an engine keeps for duplicate detection
pub const FINISHED_ID_MEMORY: usize = 100_000;

/// Everything a single `trade` or `cancel` call produced.
///
/// The caller publishes these after the book mutation has finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    /// Orders that reached a terminal state, incoming and resting alike
    pub completed: Vec<Order>,
    pub buy_plate_changed: bool,
    pub sell_plate_changed: bool,
}

impl MatchOutcome {
    fn mark_plate(&mut self, direction: OrderDirection) {
        match direction {
            OrderDirection::Buy => self.buy_plate_changed = true,
            OrderDirection::Sell => self.sell_plate_changed = true,
        }
    }

    pub fn changed_plates(&self) -> Vec<OrderDirection> {
        let mut changed = Vec::with_capacity(2);
        if self.buy_plate_changed {
            changed.push(OrderDirection::Buy);
        }
        if self.sell_plate_changed {
            changed.push(OrderDirection::Sell);
        }
        changed
    }
}

/// Ids the engine has admitted: every resting order, plus the most recently
/// finished ones so a redelivered place command is still recognised.
#[derive(Debug, Default)]
struct AdmittedIds {
    live: HashSet<String>,
    finished: HashSet<String>,
    finished_order: VecDeque<String>,
    capacity: usize,
}

impl AdmittedIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// False when the id is already known
    fn insert(&mut self, order_id: &str) -> bool {
        if self.live.contains(order_id) || self.finished.contains(order_id) {
            return false;
        }
        self.live.insert(order_id.to_string());
        true
    }

    fn finish(&mut self, order_id: &str) {
        if !self.live.remove(order_id) || self.capacity == 0 {
            return;
        }
        if self.finished_order.len() >= self.capacity {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        self.finished.insert(order_id.to_string());
        self.finished_order.push_back(order_id.to_string());
    }

    fn len(&self) -> usize {
        self.live.len() + self.finished.len()
    }
}

/// Matching engine for one symbol.
///
/// `trade` is the only way orders enter the book. The caller (one reader of
/// the inbound topic) serializes calls; the book and plate locks only keep
/// concurrent depth reads from observing a half-applied match.
#[derive(Debug)]
pub struct MatchingEngine {
    symbol: String,
    buy_book: Mutex<OrderBookSide>,
    sell_book: Mutex<OrderBookSide>,
    buy_plate: TradePlate,
    sell_plate: TradePlate,
    admitted: Mutex<AdmittedIds>,
}

impl MatchingEngine {
    pub fn new(symbol: &str, plate_max_depth: usize) -> Self {
        Self::with_id_memory(symbol, plate_max_depth, FINISHED_ID_MEMORY)
    }

    pub fn with_id_memory(symbol: &str, plate_max_depth: usize, finished_ids: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            buy_book: Mutex::new(OrderBookSide::new(OrderDirection::Buy)),
            sell_book: Mutex::new(OrderBookSide::new(OrderDirection::Sell)),
            buy_plate: TradePlate::new(symbol, OrderDirection::Buy, plate_max_depth),
            sell_plate: TradePlate::new(symbol, OrderDirection::Sell, plate_max_depth),
            admitted: Mutex::new(AdmittedIds::new(finished_ids)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn plate(&self, direction: OrderDirection) -> &TradePlate {
        match direction {
            OrderDirection::Buy => &self.buy_plate,
            OrderDirection::Sell => &self.sell_plate,
        }
    }

    pub fn depth(&self, direction: OrderDirection, levels: usize) -> TradePlateResult {
        self.plate(direction).result(levels)
    }

    /// Reloads still-open orders after a restart.
    ///
    /// Returns how many orders were put back into the book.
    pub fn recover(&self, orders: Vec<Order>) -> usize {
        let mut buy = self.buy_book.lock();
        let mut sell = self.sell_book.lock();
        let mut admitted = self.admitted.lock();
        let mut count = 0;
        for order in orders {
            if order.symbol != self.symbol || !order.is_trading() || order.validate().is_err() {
                log::warn!(
                    "skip recovering order {} ({}, {}) into {}",
                    order.order_id,
                    order.symbol,
                    order.status,
                    self.symbol
                );
                continue;
            }
            if !admitted.insert(&order.order_id) {
                continue;
            }
            let book = match order.direction {
                OrderDirection::Buy => &mut *buy,
                OrderDirection::Sell => &mut *sell,
            };
            if order.is_market() {
                book.add_market(order);
            } else {
                self.plate(order.direction).add(&order);
                book.add_limit(order);
            }
            count += 1;
        }
        buy.sort_by_time();
        sell.sort_by_time();
        count
    }

    /// Matches one admitted order against the book and rests what is left.
    pub fn trade(&self, order: Order) -> Result<MatchOutcome, EngineError> {
        if order.symbol != self.symbol {
            return Err(EngineError::SymbolMismatch {
                order_id: order.order_id,
                symbol: order.symbol,
                engine: self.symbol.clone(),
            });
        }
        if !order.is_trading() {
            return Err(EngineError::NotTrading {
                order_id: order.order_id,
                status: order.status,
            });
        }
        if !self.admitted.lock().insert(&order.order_id) {
            return Err(EngineError::Duplicate(order.order_id));
        }

        let mut incoming = order;
        let mut outcome = MatchOutcome::default();
        if let Err(e) = incoming.validate() {
            // completes untouched so its frozen funds are released
            log::warn!("order {} rejected before matching: {}", incoming.order_id, e);
            incoming.status = OrderStatus::Canceled;
            self.admitted.lock().finish(&incoming.order_id);
            outcome.completed.push(incoming);
            return Ok(outcome);
        }
        let mut buy = self.buy_book.lock();
        let mut sell = self.sell_book.lock();
        let (own, opposite) = match incoming.direction {
            OrderDirection::Buy => (&mut *buy, &mut *sell),
            OrderDirection::Sell => (&mut *sell, &mut *buy),
        };

        let matched = if incoming.is_market() {
            self.match_market_with_limit(opposite, &mut incoming, &mut outcome)
        } else {
            match self.match_limit_with_limit(opposite, &mut incoming, &mut outcome) {
                Ok(()) if incoming.is_trading() => {
                    Self::match_limit_with_market(opposite, &mut incoming, &mut outcome)
                }
                other => other,
            }
        };
        if let Err(e) = matched {
            // fills so far stand; the rest of the order would cross the book
            log::error!(
                "order {} stopped matching after {} fills: {}",
                incoming.order_id,
                outcome.trades.len(),
                e
            );
            incoming.status = OrderStatus::Canceled;
        }

        if incoming.is_trading() {
            if incoming.is_market() {
                own.add_market(incoming.clone());
            } else {
                self.plate(incoming.direction).add(&incoming);
                outcome.mark_plate(incoming.direction);
                own.add_limit(incoming.clone());
            }
        } else {
            outcome.completed.push(incoming);
        }

        let mut admitted = self.admitted.lock();
        for done in &outcome.completed {
            admitted.finish(&done.order_id);
        }
        Ok(outcome)
    }

    /// Withdraws a resting order.
    pub fn cancel(&self, order_id: &str) -> Result<MatchOutcome, EngineError> {
        let mut buy = self.buy_book.lock();
        let mut sell = self.sell_book.lock();
        let mut order = buy
            .remove(order_id)
            .or_else(|| sell.remove(order_id))
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        let mut outcome = MatchOutcome::default();
        if order.is_limit() {
            self.plate(order.direction)
                .remove(&order, order.remaining_quantity());
            outcome.mark_plate(order.direction);
        }
        order.status = OrderStatus::Canceled;
        self.admitted.lock().finish(&order.order_id);
        outcome.completed.push(order);
        Ok(outcome)
    }

    fn match_limit_with_limit(
        &self,
        opposite: &mut OrderBookSide,
        incoming: &mut Order,
        outcome: &mut MatchOutcome,
    ) -> Result<(), EngineError> {
        for price in opposite.prices() {
            let acceptable = match incoming.direction {
                OrderDirection::Buy => incoming.price >= price,
                OrderDirection::Sell => incoming.price <= price,
            };
            if !acceptable {
                break;
            }
            self.fill_level(opposite, price, incoming, outcome)?;
            if !incoming.is_trading() {
                break;
            }
        }
        Ok(())
    }

    fn match_market_with_limit(
        &self,
        opposite: &mut OrderBookSide,
        incoming: &mut Order,
        outcome: &mut MatchOutcome,
    ) -> Result<(), EngineError> {
        for price in opposite.prices() {
            self.fill_level(opposite, price, incoming, outcome)?;
            if !incoming.is_trading() {
                break;
            }
        }
        Ok(())
    }

    /// Applies one fill to both orders, or to neither when a running total
    /// would overflow. Returns the fill's turnover.
    fn exchange(
        incoming: &mut Order,
        resting: &mut Order,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        let turnover = decimal::mul_floor(price, amount)?;
        let taker = incoming.totals_after(amount, turnover)?;
        let maker = resting.totals_after(amount, turnover)?;
        (incoming.traded_amount, incoming.turnover) = taker;
        (resting.traded_amount, resting.turnover) = maker;
        Ok(turnover)
    }

    /// Fills `incoming` against the level at `price`, oldest order first,
    /// executing at the level's price.
    fn fill_level(
        &self,
        side: &mut OrderBookSide,
        price: Decimal,
        incoming: &mut Order,
        outcome: &mut MatchOutcome,
    ) -> Result<(), EngineError> {
        let direction = side.direction();
        let plate = self.plate(direction);
        let Some(level) = side.level_mut(&price) else {
            return Ok(());
        };

        let mut result = Ok(());
        let mut idx = 0;
        while idx < level.orders.len() {
            let resting = &mut level.orders[idx];
            if resting.user_id == incoming.user_id {
                idx += 1;
                continue;
            }
            let available = resting.remaining_quantity();
            if available <= Decimal::ZERO {
                idx += 1;
                continue;
            }
            let wanted = incoming.remaining_at(price);
            if wanted <= Decimal::ZERO {
                // a market buy whose unspent quote no longer buys a unit
                incoming.status = OrderStatus::Completed;
                break;
            }

            let amount = available.min(wanted);
            let turnover = match Self::exchange(incoming, resting, price, amount) {
                Ok(turnover) => turnover,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            plate.remove(resting, amount);
            outcome.mark_plate(direction);
            outcome
                .trades
                .push(Trade::between(incoming, resting, price, amount, turnover));

            if amount >= available {
                resting.status = OrderStatus::Completed;
                if let Some(done) = level.orders.remove(idx) {
                    outcome.completed.push(done);
                }
            } else {
                idx += 1;
            }
            if amount >= wanted {
                incoming.status = OrderStatus::Completed;
                break;
            }
        }
        side.prune_level(&price);
        result
    }

    /// Fills a limit order against waiting market orders at the limit price.
    fn match_limit_with_market(
        opposite: &mut OrderBookSide,
        incoming: &mut Order,
        outcome: &mut MatchOutcome,
    ) -> Result<(), EngineError> {
        let price = incoming.price;
        let queue = opposite.market_queue_mut();
        let mut idx = 0;
        while idx < queue.len() {
            let resting = &mut queue[idx];
            if resting.user_id == incoming.user_id {
                idx += 1;
                continue;
            }
            let available = resting.remaining_at(price);
            if available <= Decimal::ZERO {
                idx += 1;
                continue;
            }
            let wanted = incoming.remaining_quantity();
            let amount = available.min(wanted);
            let turnover = Self::exchange(incoming, resting, price, amount)?;
            outcome
                .trades
                .push(Trade::between(incoming, resting, price, amount, turnover));

            if amount >= available {
                resting.status = OrderStatus::Completed;
                if let Some(done) = queue.remove(idx) {
                    outcome.completed.push(done);
                }
            } else {
                idx += 1;
            }
            if amount >= wanted {
                incoming.status = OrderStatus::Completed;
                break;
            }
        }
        Ok(())
    }

    /// Ids currently remembered for duplicate detection
    pub fn admitted_len(&self) -> usize {
        self.admitted.lock().len()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.buy_book.lock().best_price()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.sell_book.lock().best_price()
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Current state of a resting order
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        if let Some(order) = self.buy_book.lock().get(order_id) {
            return Some(order.clone());
        }
        self.sell_book.lock().get(order_id).cloned()
    }

    /// A copy of one side of the book
    pub fn book(&self, direction: OrderDirection) -> OrderBookSide {
        match direction {
            OrderDirection::Buy => self.buy_book.lock().clone(),
            OrderDirection::Sell => self.sell_book.lock().clone(),
        }
    }
}
