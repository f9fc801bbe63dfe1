//! Trade Processing Module
//!
//! The only consumer of `exchange_order_trading`. Commands are applied to the
//! engines one at a time; events are published after each mutation finished.

use crate::bus::{
    send_until_acked, send_with_retries, topics, BusMessage, Disposition, EventBus, MessageHandler,
};
use crate::engine::entry::OrderDirection;
use crate::engine::matchengine::MatchCmd;
use crate::engine::matchlogic::{MatchOutcome, MatchingEngine};
use crate::engine::spot::EngineRegistry;
use crate::error::EngineError;
use crate::metrics;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;

const TRADE_PUBLISH_ATTEMPTS: usize = 3;

pub struct TradeProcessor {
    registry: Arc<EngineRegistry>,
    bus: Arc<dyn EventBus>,
    plate_depth: usize,
    backoff: Duration,
}

impl TradeProcessor {
    pub fn new(
        registry: Arc<EngineRegistry>,
        bus: Arc<dyn EventBus>,
        plate_depth: usize,
        backoff: Duration,
    ) -> Self {
        Self {
            registry,
            bus,
            plate_depth,
            backoff,
        }
    }

    /// Applies one command and publishes what it produced
    pub async fn process(&self, cmd: MatchCmd) -> Result<MatchOutcome, EngineError> {
        let engine = self
            .registry
            .get(cmd.symbol())
            .ok_or_else(|| EngineError::UnknownSymbol(cmd.symbol().to_string()))?;
        metrics::ORDER_COUNTER_VEC
            .with_label_values(&[engine.symbol(), cmd.name()])
            .inc();
        let outcome = metrics::observe(cmd.name(), || match cmd {
            MatchCmd::PlaceOrder { order } => engine.trade(order),
            MatchCmd::CancelOrder { order_id, .. } => engine.cancel(&order_id),
        })?;
        self.publish(&engine, &outcome).await;
        Ok(outcome)
    }

    async fn publish(&self, engine: &MatchingEngine, outcome: &MatchOutcome) {
        for direction in outcome.changed_plates() {
            self.publish_plate(engine, direction).await;
        }

        let symbol = engine.symbol();
        for trade in &outcome.trades {
            metrics::TRADE_COUNTER_VEC.with_label_values(&[symbol]).inc();
            let sent = match BusMessage::json(topics::TRADE, symbol, trade) {
                Ok(message) => {
                    let bus = self.bus.as_ref();
                    send_with_retries(bus, message, TRADE_PUBLISH_ATTEMPTS, self.backoff).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!("trade {} of {} not published: {}", trade.id, symbol, e);
            }
        }

        for order in &outcome.completed {
            let status = order.status.to_string();
            metrics::COMPLETION_COUNTER_VEC
                .with_label_values(&[symbol, status.as_str()])
                .inc();
            let message = match BusMessage::json(topics::ORDER_COMPLETE, &order.order_id, order) {
                Ok(message) => message,
                Err(e) => {
                    error!("encoding completion of {}: {}", order.order_id, e);
                    continue;
                }
            };
            if let Err(e) = send_until_acked(self.bus.as_ref(), message, self.backoff).await {
                error!("completion of {} not published: {}", order.order_id, e);
            }
        }
    }

    /// Publishes the top of one trade plate; failures are logged and skipped
    pub async fn publish_plate(&self, engine: &MatchingEngine, direction: OrderDirection) {
        let result = engine.depth(direction, self.plate_depth);
        let sent = match BusMessage::json(topics::TRADE_PLATE, engine.symbol(), &result) {
            Ok(message) => self.bus.send_sync(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("{} {} trade plate not published: {}", engine.symbol(), direction, e);
        }
    }

    /// Publishes both plates of every named symbol, after recovery
    pub async fn publish_plates(&self, symbols: &[String]) {
        for name in symbols {
            if let Some(engine) = self.registry.get(name) {
                self.publish_plate(&engine, OrderDirection::Buy).await;
                self.publish_plate(&engine, OrderDirection::Sell).await;
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TradeProcessor {
    fn name(&self) -> &'static str {
        "trade_processor"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        let cmd: MatchCmd = match message.decode() {
            Ok(cmd) => cmd,
            Err(e) => {
                error!("malformed engine command: {}", e);
                return Disposition::Done;
            }
        };
        let order_id = cmd.order_id().to_string();
        match self.process(cmd).await {
            Ok(outcome) => debug!(
                "order {}: {} trades, {} completed",
                order_id,
                outcome.trades.len(),
                outcome.completed.len()
            ),
            Err(EngineError::Duplicate(id)) => debug!("order {} already admitted, skipping", id),
            Err(e) => warn!("engine rejected command for {}: {}", order_id, e),
        }
        Disposition::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{spawn_reader, MemoryBus};
    use crate::engine::data::TradePlateResult;
    use crate::engine::entry::{Order, OrderStatus, OrderType, Symbol, Trade};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::watch;

    fn setup() -> (Arc<MemoryBus>, TradeProcessor) {
        let registry = Arc::new(EngineRegistry::new());
        registry.add(Symbol::new("BTC/USDT", "BTC", "USDT"), MatchingEngine::new("BTC/USDT", 100));
        let bus = Arc::new(MemoryBus::new());
        let processor = TradeProcessor::new(registry, bus.clone(), 24, Duration::from_millis(1));
        (bus, processor)
    }

    fn trading(
        id: &str,
        user: u64,
        direction: OrderDirection,
        price: Decimal,
        amount: Decimal,
    ) -> Order {
        let mut order = Order::new(
            id,
            user,
            "BTC/USDT",
            OrderType::Limit,
            direction,
            price,
            amount,
        );
        order.status = OrderStatus::Trading;
        order
    }

    fn place(order: Order) -> BusMessage {
        let symbol = order.symbol.clone();
        BusMessage::json(topics::ORDER_TRADING, &symbol, &MatchCmd::PlaceOrder { order }).unwrap()
    }

    #[tokio::test]
    async fn test_partial_fill_publishes_plate_trade_and_completion() {
        let (bus, processor) = setup();
        processor
            .handle(&place(trading("B1", 1, OrderDirection::Buy, dec!(100), dec!(1))))
            .await;
        processor
            .handle(&place(trading("S1", 2, OrderDirection::Sell, dec!(100), dec!(0.4))))
            .await;

        let plates: Vec<TradePlateResult> = bus
            .published(topics::TRADE_PLATE)
            .iter()
            .map(|m| m.decode().unwrap())
            .collect();
        let last_buy = plates
            .iter()
            .rev()
            .find(|p| p.direction == OrderDirection::Buy)
            .unwrap();
        assert_eq!(last_buy.items.len(), 1);
        assert_eq!(last_buy.items[0].amount, dec!(0.6));

        let trades: Vec<Trade> = bus
            .published(topics::TRADE)
            .iter()
            .map(|m| m.decode().unwrap())
            .collect();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(100));
        assert_eq!(trades[0].turnover, dec!(40));

        let completed: Vec<Order> = bus
            .published(topics::ORDER_COMPLETE)
            .iter()
            .map(|m| m.decode().unwrap())
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].order_id, "S1");
        assert_eq!(completed[0].status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_publishes_canceled_completion() {
        let (bus, processor) = setup();
        processor
            .process(MatchCmd::PlaceOrder {
                order: trading("B1", 1, OrderDirection::Buy, dec!(100), dec!(1)),
            })
            .await
            .unwrap();
        let outcome = processor
            .process(MatchCmd::CancelOrder {
                order_id: "B1".to_string(),
                symbol: "BTC/USDT".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.completed[0].status, OrderStatus::Canceled);
        let completed = bus.published(topics::ORDER_COMPLETE);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].key_str(), "B1");
    }

    #[tokio::test]
    async fn test_bad_input_is_skipped() {
        let (bus, processor) = setup();
        let garbage = BusMessage::new(topics::ORDER_TRADING, "BTC/USDT", b"[]".to_vec());
        assert_eq!(processor.handle(&garbage).await, Disposition::Done);

        let mut other = trading("E1", 1, OrderDirection::Buy, dec!(1), dec!(1));
        other.symbol = "ETH/USDT".to_string();
        assert_eq!(
            processor.process(MatchCmd::PlaceOrder { order: other }).await,
            Err(EngineError::UnknownSymbol("ETH/USDT".to_string()))
        );

        let order = trading("B1", 1, OrderDirection::Buy, dec!(100), dec!(1));
        assert_eq!(processor.handle(&place(order.clone())).await, Disposition::Done);
        assert_eq!(processor.handle(&place(order)).await, Disposition::Done);
        assert_eq!(bus.published(topics::TRADE_PLATE).len(), 1);
    }

    #[tokio::test]
    async fn test_reader_keeps_matching_after_unrepresentable_order() {
        let registry = Arc::new(EngineRegistry::new());
        registry.add(Symbol::new("BTC/USDT", "BTC", "USDT"), MatchingEngine::new("BTC/USDT", 100));
        let memory = Arc::new(MemoryBus::new());
        let bus: Arc<dyn EventBus> = memory.clone();
        let processor = TradeProcessor::new(
            registry.clone(),
            bus.clone(),
            24,
            Duration::from_millis(1),
        );
        let (_stop, stop_rx) = watch::channel(false);
        let task = spawn_reader(
            &bus,
            topics::ORDER_TRADING,
            Arc::new(processor),
            Duration::from_millis(1),
            stop_rx,
        );

        let price = Decimal::from_i128_with_scale(1_000_000_000_000_000, 0);
        let amount = Decimal::from_i128_with_scale(100_000_000_000_000, 0);
        bus.send_sync(place(trading("huge", 2, OrderDirection::Sell, price, amount)))
            .await
            .unwrap();
        bus.send_sync(place(trading("B1", 1, OrderDirection::Buy, dec!(100), dec!(1))))
            .await
            .unwrap();

        let engine = registry.get("BTC/USDT").unwrap();
        for _ in 0..200 {
            if engine.get_order("B1").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.best_bid(), Some(dec!(100)));
        assert!(engine.get_order("huge").is_none());
        let completed: Vec<Order> = memory
            .published(topics::ORDER_COMPLETE)
            .iter()
            .map(|m| m.decode().unwrap())
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].order_id, "huge");
        assert_eq!(completed[0].status, OrderStatus::Canceled);

        memory.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_plate_publish_failure_does_not_block_completions() {
        let (bus, processor) = setup();
        bus.fail_next(topics::TRADE_PLATE, 10);
        bus.fail_next(topics::ORDER_COMPLETE, 2);
        processor
            .process(MatchCmd::PlaceOrder {
                order: trading("S1", 2, OrderDirection::Sell, dec!(100), dec!(1)),
            })
            .await
            .unwrap();
        processor
            .process(MatchCmd::PlaceOrder {
                order: trading("B1", 1, OrderDirection::Buy, dec!(100), dec!(1)),
            })
            .await
            .unwrap();
        assert!(bus.published(topics::TRADE_PLATE).is_empty());
        assert_eq!(bus.published(topics::ORDER_COMPLETE).len(), 2);
    }
}
