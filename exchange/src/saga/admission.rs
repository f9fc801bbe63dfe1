use super::SagaContext;
use crate::bus::messages::{AdmissionMessage, TradingReady};
use crate::bus::{send_until_acked, topics, BusMessage, Disposition, MessageHandler};
use crate::engine::entry::OrderStatus;
use crate::error::StoreError;
use crate::lock::order_lock_key;
use crate::metrics;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Funds frozen, order TRADING, trading-ready published
    Admitted,
    /// Freeze failed and the order was canceled
    Canceled,
    /// Another consumer is working on this order
    LockHeld,
    Discarded(&'static str),
    Requeue,
}

impl AdmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AdmissionOutcome::Admitted => "admitted",
            AdmissionOutcome::Canceled => "canceled",
            AdmissionOutcome::LockHeld => "lock_held",
            AdmissionOutcome::Discarded(_) => "discarded",
            AdmissionOutcome::Requeue => "requeue",
        }
    }
}

/// Consumer of `exchange_order_add`
pub struct AdmissionHandler {
    ctx: Arc<SagaContext>,
}

impl AdmissionHandler {
    pub fn new(ctx: Arc<SagaContext>) -> Self {
        Self { ctx }
    }

    /// Freezes the order's funds and moves it to TRADING, under the
    /// (user, order) lock. Replays of an admitted order are discarded.
    pub async fn admit(&self, msg: &AdmissionMessage) -> AdmissionOutcome {
        let key = order_lock_key(msg.user_id, &msg.order_id);
        let guard = match self.ctx.locks.try_acquire(&key, self.ctx.config.lock_ttl()).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                info!("order {} is locked by another consumer, dropping", msg.order_id);
                return AdmissionOutcome::LockHeld;
            }
            Err(e) => {
                warn!("lock {} unavailable, requeueing admission: {}", key, e);
                return AdmissionOutcome::Requeue;
            }
        };

        let outcome = self.admit_locked(msg).await;

        match self.ctx.locks.release(guard).await {
            Ok(true) => {}
            Ok(false) => warn!("lock {} expired before admission finished", key),
            Err(e) => warn!("releasing lock {}: {}", key, e),
        }
        outcome
    }

    async fn admit_locked(&self, msg: &AdmissionMessage) -> AdmissionOutcome {
        let order = match self
            .ctx
            .store_call(self.ctx.store.find_by_order_id(&msg.order_id))
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!("admission for unknown order {}", msg.order_id);
                return AdmissionOutcome::Discarded("order not found");
            }
            Err(e) => {
                // status unknown, so canceling could clobber an admitted order
                warn!("reading order {} failed: {}", msg.order_id, e);
                return AdmissionOutcome::Requeue;
            }
        };
        if order.status != OrderStatus::Init {
            debug!("order {} is already {}, skipping admission", order.order_id, order.status);
            return AdmissionOutcome::Discarded("order already processed");
        }
        if order.user_id != msg.user_id || order.symbol != msg.symbol {
            error!(
                "admission {}/{} does not match stored order {}/{}",
                msg.user_id, msg.symbol, order.user_id, order.symbol
            );
            return AdmissionOutcome::Discarded("order does not match admission");
        }

        let unit = msg.freeze_unit();
        let frozen = self
            .ctx
            .ledger_call(self.ctx.ledger.freeze(&msg.order_id, msg.user_id, unit, msg.amount))
            .await;
        if let Err(e) = frozen {
            warn!("freezing {} {} for order {} failed: {}", msg.amount, unit, msg.order_id, e);
            return match self
                .ctx
                .store_call(self.ctx.store.update_status(&msg.order_id, OrderStatus::Canceled))
                .await
            {
                Ok(()) => {
                    info!("order {} canceled", msg.order_id);
                    AdmissionOutcome::Canceled
                }
                Err(e) => {
                    error!("canceling order {} failed: {}", msg.order_id, e);
                    AdmissionOutcome::Requeue
                }
            };
        }

        // funds are frozen now; the order must leave INIT
        loop {
            match self
                .ctx
                .store_call(self.ctx.store.update_status(&msg.order_id, OrderStatus::Trading))
                .await
            {
                Ok(()) => break,
                Err(e @ (StoreError::NotFound(_) | StoreError::InvalidTransition { .. })) => {
                    error!("order {} changed under its lock: {}", msg.order_id, e);
                    return AdmissionOutcome::Discarded("order changed while frozen");
                }
                Err(e) => {
                    warn!("marking order {} TRADING failed, retrying: {}", msg.order_id, e);
                    tokio::time::sleep(self.ctx.config.publish_backoff()).await;
                }
            }
        }

        let ready = TradingReady {
            user_id: msg.user_id,
            order_id: msg.order_id.clone(),
        };
        let message = match BusMessage::json(topics::ORDER_TRADING_READY, &msg.order_id, &ready) {
            Ok(message) => message,
            Err(e) => {
                error!("encoding trading ready for {}: {}", msg.order_id, e);
                return AdmissionOutcome::Discarded("unencodable trading ready");
            }
        };
        let backoff = self.ctx.config.publish_backoff();
        if let Err(e) = send_until_acked(self.ctx.bus.as_ref(), message, backoff).await {
            error!("trading ready for {} not published: {}", msg.order_id, e);
        }
        info!("order {} admitted, {} {} frozen", msg.order_id, msg.amount, unit);
        AdmissionOutcome::Admitted
    }
}

#[async_trait]
impl MessageHandler for AdmissionHandler {
    fn name(&self) -> &'static str {
        "admission"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        let msg: AdmissionMessage = match message.decode() {
            Ok(msg) => msg,
            Err(e) => {
                error!("malformed admission message: {}", e);
                return Disposition::Done;
            }
        };
        if !message.key.is_empty() && message.key_str() != msg.order_id {
            warn!("admission key {} does not match order {}", message.key_str(), msg.order_id);
            return Disposition::Done;
        }
        let outcome = metrics::record_metrics("admission", || self.admit(&msg)).await;
        metrics::saga_event("admission", outcome.label());
        if outcome == AdmissionOutcome::Requeue {
            Disposition::Requeue
        } else {
            Disposition::Done
        }
    }
}
