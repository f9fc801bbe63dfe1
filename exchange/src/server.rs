use crate::bus::{spawn_reader, topics, EventBus, MemoryBus, MessageHandler};
use crate::config::RuntimeConfig;
use crate::engine::spot::{EngineRegistry, TradeProcessor};
use crate::gateway::{LedgerGateway, MemoryLedger, MemoryOrderStore, PersistenceGateway};
use crate::lock::{LockStore, MemoryLockStore};
use crate::market::{DepthCache, LoggingMarketHandler, MarketProcessor};
use crate::metrics;
use crate::saga::{
    AdmissionHandler, CompletionHandler, SagaContext, SettlementHandler, TradingReadyHandler,
};

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The outside world the process talks to
#[derive(Clone)]
pub struct Adapters {
    pub bus: Arc<dyn EventBus>,
    pub store: Arc<dyn PersistenceGateway>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub locks: Arc<dyn LockStore>,
}

impl Adapters {
    pub fn in_memory() -> Self {
        Self {
            bus: Arc::new(MemoryBus::new()),
            store: Arc::new(MemoryOrderStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
            locks: Arc::new(MemoryLockStore::new()),
        }
    }
}

pub struct Server {
    config: RuntimeConfig,
    adapters: Adapters,
    registry: Arc<EngineRegistry>,
    depth: Arc<DepthCache>,
    tasks: Vec<JoinHandle<()>>,
    metrics_task: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn builder(config: RuntimeConfig, adapters: Adapters) -> Self {
        Server {
            config,
            adapters,
            registry: Arc::new(EngineRegistry::new()),
            depth: Arc::new(DepthCache::new()),
            tasks: Vec::new(),
            metrics_task: None,
            shutdown: watch::channel(false).0,
        }
    }

    pub fn registry(&self) -> Arc<EngineRegistry> {
        self.registry.clone()
    }

    pub fn depth_cache(&self) -> Arc<DepthCache> {
        self.depth.clone()
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        metrics::init_registry();
        if !self.config.metrics_addr.is_empty() {
            self.start_metrics_server()?;
        }

        let symbols = self.config.trading_symbols();
        let (registry, recovered) = EngineRegistry::boot(
            symbols,
            self.adapters.store.as_ref(),
            self.config.engine.plate_max_depth,
        )
        .await
        .context("rebuilding order books")?;
        self.registry = Arc::new(registry);
        log::info!("{} matching engines ready", self.registry.len());

        self.start_market_consumers();
        let processor = Arc::new(TradeProcessor::new(
            self.registry.clone(),
            self.adapters.bus.clone(),
            self.config.engine.plate_publish_depth,
            self.config.saga.publish_backoff(),
        ));
        processor.publish_plates(&recovered).await;
        self.spawn(topics::ORDER_TRADING, processor);
        self.start_saga_consumers();
        Ok(())
    }

    /// Stops the consumers, then the bus.
    ///
    /// Readers finish the message in hand while the bus still accepts
    /// publishes, so nothing a handler already applied loses its events.
    /// Unread messages stay queued.
    pub async fn stop(&mut self) {
        log::info!("server stop");
        if let Some(task) = self.metrics_task.take() {
            task.abort();
        }
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                log::warn!("consumer did not finish in time, aborting");
                abort.abort();
            }
        }
        self.adapters.bus.close();
    }

    fn spawn(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) {
        let backoff = self.config.saga.requeue_backoff();
        let shutdown = self.shutdown.subscribe();
        self.tasks.push(spawn_reader(
            &self.adapters.bus,
            topic,
            handler,
            backoff,
            shutdown,
        ));
    }

    fn start_saga_consumers(&mut self) {
        let ctx = Arc::new(SagaContext {
            store: self.adapters.store.clone(),
            ledger: self.adapters.ledger.clone(),
            locks: self.adapters.locks.clone(),
            bus: self.adapters.bus.clone(),
            config: self.config.saga.clone(),
        });
        self.spawn(topics::ORDER_ADD, Arc::new(AdmissionHandler::new(ctx.clone())));
        self.spawn(
            topics::ORDER_TRADING_READY,
            Arc::new(TradingReadyHandler::new(ctx.clone())),
        );
        self.spawn(topics::ORDER_COMPLETE, Arc::new(CompletionHandler::new(ctx.clone())));
        let settlement = SettlementHandler::new(ctx, self.registry.symbols());
        self.spawn(topics::ORDER_SETTLEMENT, Arc::new(settlement));
    }

    fn start_market_consumers(&mut self) {
        let mut market = MarketProcessor::new();
        market.add_handler(self.depth.clone());
        market.add_handler(Arc::new(LoggingMarketHandler));
        let market = Arc::new(market);
        for topic in [topics::TRADE_PLATE, topics::TRADE, topics::KLINE] {
            self.spawn(topic, market.clone());
        }
    }

    fn start_metrics_server(&mut self) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .metrics_addr
            .parse()
            .with_context(|| format!("metrics address {}", self.config.metrics_addr))?;
        let make_svc = make_service_fn(move |_| {
            let registry = metrics::REGISTRY_INSTANCE.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |_: Request<Body>| {
                    let registry = registry.clone();
                    async move {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                            log::error!("encoding metrics: {}", e);
                        }
                        Ok::<_, hyper::Error>(Response::new(Body::from(buffer)))
                    }
                }))
            }
        });
        let server = hyper::Server::try_bind(&addr)?.serve(make_svc);
        self.metrics_task = Some(tokio::spawn(async move {
            if let Err(e) = server.await {
                log::error!("metrics server stopped: {}", e);
            }
        }));
        log::info!("metrics server started on {}", addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::messages::AdmissionMessage;
    use crate::bus::BusMessage;
    use crate::config::SagaConfig;
    use crate::engine::entry::{Order, OrderDirection, OrderStatus, OrderType, Symbol};
    use crate::gateway::Wallet;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        bus: Arc<MemoryBus>,
        store: Arc<MemoryOrderStore>,
        ledger: Arc<MemoryLedger>,
        server: Server,
    }

    fn harness() -> Harness {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryOrderStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let adapters = Adapters {
            bus: bus.clone(),
            store: store.clone(),
            ledger: ledger.clone(),
            locks: Arc::new(MemoryLockStore::new()),
        };
        let config = RuntimeConfig {
            metrics_addr: String::new(),
            symbols: vec!["BTC/USDT".to_string()],
            saga: SagaConfig {
                publish_backoff_ms: 1,
                requeue_backoff_ms: 1,
                ..SagaConfig::default()
            },
            ..RuntimeConfig::default()
        };
        Harness {
            bus,
            store,
            ledger,
            server: Server::builder(config, adapters),
        }
    }

    async fn submit(
        h: &Harness,
        id: &str,
        user: u64,
        direction: OrderDirection,
        price: Decimal,
        amount: Decimal,
    ) {
        let order = Order::new(id, user, "BTC/USDT", OrderType::Limit, direction, price, amount);
        h.store.insert(order);
        let symbol = Symbol::new("BTC/USDT", "BTC", "USDT");
        let freeze = match direction {
            OrderDirection::Buy => price * amount,
            OrderDirection::Sell => amount,
        };
        let msg = AdmissionMessage::new(user, id, freeze, &symbol, direction);
        h.bus
            .send_sync(BusMessage::json(topics::ORDER_ADD, id, &msg).unwrap())
            .await
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_orders_flow_from_admission_to_settlement() {
        let mut h = harness();
        h.ledger.deposit(1, "USDT", dec!(1000));
        h.ledger.deposit(2, "BTC", dec!(1));
        h.server.start().await.unwrap();
        let registry = h.server.registry();
        let depth = h.server.depth_cache();

        submit(&h, "B1", 1, OrderDirection::Buy, dec!(100), dec!(1)).await;
        eventually(|| registry.get("BTC/USDT").unwrap().get_order("B1").is_some()).await;
        submit(&h, "S1", 2, OrderDirection::Sell, dec!(100), dec!(0.4)).await;
        eventually(|| h.ledger.wallet(2, "USDT").map_or(false, |w| w.balance == dec!(40))).await;

        let sell = h.store.get("S1").unwrap();
        assert_eq!(sell.traded_amount, dec!(0.4));
        assert_eq!(sell.turnover, dec!(40));
        assert_eq!(sell.status, OrderStatus::Completed);
        assert_eq!(
            h.ledger.wallet(2, "BTC").unwrap(),
            Wallet { balance: dec!(0.6), frozen: Decimal::ZERO }
        );
        assert!(h.ledger.reservation("S1").is_none());
        assert_eq!(h.ledger.reservation("B1").unwrap().amount, dec!(100));
        assert_eq!(h.store.get("B1").unwrap().status, OrderStatus::Trading);
        assert_eq!(h.ledger.wallet(1, "USDT").unwrap().frozen, dec!(100));

        eventually(|| {
            depth
                .get("BTC/USDT", OrderDirection::Buy)
                .map_or(false, |p| p.items.len() == 1 && p.items[0].amount == dec!(0.6))
        })
        .await;

        h.server.stop().await;
    }

    #[tokio::test]
    async fn test_unfunded_order_is_canceled_and_never_matched() {
        let mut h = harness();
        h.ledger.deposit(3, "USDT", dec!(10));
        h.server.start().await.unwrap();

        submit(&h, "B9", 3, OrderDirection::Buy, dec!(100), dec!(1)).await;
        eventually(|| h.store.get("B9").unwrap().status == OrderStatus::Canceled).await;
        assert!(h.server.registry().get("BTC/USDT").unwrap().get_order("B9").is_none());
        assert!(h.bus.published(topics::ORDER_TRADING).is_empty());
        h.server.stop().await;
    }

    #[tokio::test]
    async fn test_restart_rebuilds_book_and_publishes_depth() {
        let mut h = harness();
        let mut resting = Order::new(
            "R1",
            1,
            "BTC/USDT",
            OrderType::Limit,
            OrderDirection::Sell,
            dec!(101),
            dec!(2),
        );
        resting.status = OrderStatus::Trading;
        h.store.insert(resting);
        h.server.start().await.unwrap();

        assert_eq!(
            h.server.registry().get("BTC/USDT").unwrap().best_ask(),
            Some(dec!(101))
        );
        let depth = h.server.depth_cache();
        eventually(|| depth.get("BTC/USDT", OrderDirection::Sell).is_some()).await;
        h.server.stop().await;
    }
}
