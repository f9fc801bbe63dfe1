use super::SagaContext;
use crate::bus::messages::TradingReady;
use crate::bus::{send_until_acked, topics, BusMessage, Disposition, MessageHandler};
use crate::engine::matchengine::MatchCmd;
use crate::metrics;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    Forwarded,
    Discarded(&'static str),
    Requeue,
}

impl ReadyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReadyOutcome::Forwarded => "forwarded",
            ReadyOutcome::Discarded(_) => "discarded",
            ReadyOutcome::Requeue => "requeue",
        }
    }
}

/// Consumer of `exchange_order_init_complete_trading`: hands TRADING orders
/// to the engine topic, keyed by symbol.
pub struct TradingReadyHandler {
    ctx: Arc<SagaContext>,
}

impl TradingReadyHandler {
    pub fn new(ctx: Arc<SagaContext>) -> Self {
        Self { ctx }
    }

    pub async fn forward(&self, ready: &TradingReady) -> ReadyOutcome {
        let order = match self
            .ctx
            .store_call(self.ctx.store.find_by_order_id(&ready.order_id))
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!("trading ready for unknown order {}", ready.order_id);
                return ReadyOutcome::Discarded("order not found");
            }
            Err(e) => {
                warn!("reading order {} failed: {}", ready.order_id, e);
                return ReadyOutcome::Requeue;
            }
        };
        if !order.is_trading() {
            info!("order {} is {}, not forwarding to the engine", order.order_id, order.status);
            return ReadyOutcome::Discarded("order not trading");
        }

        let symbol = order.symbol.clone();
        let order_id = order.order_id.clone();
        let cmd = MatchCmd::PlaceOrder { order };
        let message = match BusMessage::json(topics::ORDER_TRADING, &symbol, &cmd) {
            Ok(message) => message,
            Err(e) => {
                error!("encoding place command for {}: {}", order_id, e);
                return ReadyOutcome::Discarded("unencodable order");
            }
        };
        let backoff = self.ctx.config.publish_backoff();
        match send_until_acked(self.ctx.bus.as_ref(), message, backoff).await {
            Ok(()) => ReadyOutcome::Forwarded,
            Err(e) => {
                error!("place command for {} not published: {}", order_id, e);
                ReadyOutcome::Requeue
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TradingReadyHandler {
    fn name(&self) -> &'static str {
        "trading_ready"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        let ready: TradingReady = match message.decode() {
            Ok(ready) => ready,
            Err(e) => {
                error!("malformed trading ready message: {}", e);
                return Disposition::Done;
            }
        };
        let outcome = metrics::record_metrics("trading_ready", || self.forward(&ready)).await;
        metrics::saga_event("trading_ready", outcome.label());
        if outcome == ReadyOutcome::Requeue {
            Disposition::Requeue
        } else {
            Disposition::Done
        }
    }
}
