use super::PersistenceGateway;
use crate::engine::entry::{Order, OrderStatus};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Order records held in memory.
///
/// A terminal order never changes status again; rewriting the same terminal
/// status is accepted so replayed completions stay harmless.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    failures: Mutex<usize>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.lock().insert(order.order_id.clone(), order);
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_status(&self, status: OrderStatus) -> usize {
        self.orders.lock().values().filter(|o| o.status == status).count()
    }

    /// The next `times` calls fail as if the store were down
    pub fn fail_next(&self, times: usize) {
        *self.failures.lock() = times;
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let mut left = self.failures.lock();
        if *left > 0 {
            *left -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn transition(order: &Order, to: OrderStatus) -> Result<(), StoreError> {
        if order.status.is_terminal() && order.status != to {
            return Err(StoreError::InvalidTransition {
                order_id: order.order_id.clone(),
                from: order.status,
                to,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryOrderStore {
    async fn find_open_orders_by_symbol(&self, symbol: &str) -> Result<Vec<Order>, StoreError> {
        self.injected_failure()?;
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .values()
            .filter(|o| o.symbol == symbol && o.status == OrderStatus::Trading)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.submitted_at_millis);
        Ok(orders)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        self.injected_failure()?;
        Ok(self.get(order_id))
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;
        Self::transition(order, status)?;
        order.status = status;
        Ok(())
    }

    async fn update_fill_state(
        &self,
        order_id: &str,
        traded_amount: Decimal,
        turnover: Decimal,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;
        Self::transition(order, status)?;
        order.traded_amount = traded_amount;
        order.turnover = turnover;
        order.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::{OrderDirection, OrderType};
    use rust_decimal_macros::dec;

    fn order(id: &str, symbol: &str, status: OrderStatus, at: i64) -> Order {
        let mut o = Order::new(
            id,
            1,
            symbol,
            OrderType::Limit,
            OrderDirection::Buy,
            dec!(100),
            dec!(1),
        );
        o.status = status;
        o.submitted_at_millis = at;
        o
    }

    #[tokio::test]
    async fn test_open_orders_are_trading_only_and_time_sorted() {
        let store = MemoryOrderStore::new();
        store.insert(order("b", "BTC/USDT", OrderStatus::Trading, 20));
        store.insert(order("a", "BTC/USDT", OrderStatus::Trading, 10));
        store.insert(order("c", "BTC/USDT", OrderStatus::Init, 5));
        store.insert(order("d", "ETH/USDT", OrderStatus::Trading, 1));
        let open = store.find_open_orders_by_symbol("BTC/USDT").await.unwrap();
        let ids: Vec<_> = open.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let store = MemoryOrderStore::new();
        store.insert(order("a", "BTC/USDT", OrderStatus::Trading, 1));
        store
            .update_fill_state("a", dec!(1), dec!(100), OrderStatus::Completed)
            .await
            .unwrap();
        store
            .update_fill_state("a", dec!(1), dec!(100), OrderStatus::Completed)
            .await
            .unwrap();
        assert!(matches!(
            store.update_status("a", OrderStatus::Trading).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        assert_eq!(store.get("a").unwrap().turnover, dec!(100));
        assert_eq!(
            store.update_status("zz", OrderStatus::Trading).await,
            Err(StoreError::NotFound("zz".to_string()))
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryOrderStore::new();
        store.fail_next(1);
        assert!(store.find_by_order_id("a").await.is_err());
        assert_eq!(store.find_by_order_id("a").await, Ok(None));
    }
}
