use super::SagaContext;
use crate::bus::{send_until_acked, topics, BusMessage, Disposition, MessageHandler};
use crate::engine::entry::Order;
use crate::error::StoreError;
use crate::metrics;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Fill state stored and settlement notified
    Persisted,
    Discarded(&'static str),
    Requeue,
}

impl CompletionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CompletionOutcome::Persisted => "persisted",
            CompletionOutcome::Discarded(_) => "discarded",
            CompletionOutcome::Requeue => "requeue",
        }
    }
}

/// Consumer of `exchange_order_complete`.
///
/// A failed write goes back to the front of the topic; the settlement notice
/// is only sent once the write stuck.
pub struct CompletionHandler {
    ctx: Arc<SagaContext>,
}

impl CompletionHandler {
    pub fn new(ctx: Arc<SagaContext>) -> Self {
        Self { ctx }
    }

    pub async fn complete(&self, order: &Order) -> CompletionOutcome {
        if !order.status.is_terminal() {
            warn!("completion for order {} in status {}", order.order_id, order.status);
            return CompletionOutcome::Discarded("order not terminal");
        }
        let written = self
            .ctx
            .store_call(self.ctx.store.update_fill_state(
                &order.order_id,
                order.traded_amount,
                order.turnover,
                order.status,
            ))
            .await;
        match written {
            Ok(()) => {}
            Err(e @ (StoreError::NotFound(_) | StoreError::InvalidTransition { .. })) => {
                error!("completion of order {} rejected by the store: {}", order.order_id, e);
                return CompletionOutcome::Discarded("store rejected completion");
            }
            Err(e) => {
                warn!("persisting completion of {} failed: {}", order.order_id, e);
                return CompletionOutcome::Requeue;
            }
        }

        let message = match BusMessage::json(topics::ORDER_SETTLEMENT, &order.order_id, order) {
            Ok(message) => message,
            Err(e) => {
                error!("encoding settlement notice for {}: {}", order.order_id, e);
                return CompletionOutcome::Discarded("unencodable order");
            }
        };
        let backoff = self.ctx.config.requeue_backoff();
        if let Err(e) = send_until_acked(self.ctx.bus.as_ref(), message, backoff).await {
            error!("settlement notice for {} not published: {}", order.order_id, e);
        }
        info!(
            "order {} {}: traded {} turnover {}",
            order.order_id, order.status, order.traded_amount, order.turnover
        );
        CompletionOutcome::Persisted
    }
}

#[async_trait]
impl MessageHandler for CompletionHandler {
    fn name(&self) -> &'static str {
        "completion"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        let order: Order = match message.decode() {
            Ok(order) => order,
            Err(e) => {
                error!("malformed completion message: {}", e);
                return Disposition::Done;
            }
        };
        let outcome = metrics::record_metrics("completion", || self.complete(&order)).await;
        metrics::saga_event("completion", outcome.label());
        if outcome == CompletionOutcome::Requeue {
            Disposition::Requeue
        } else {
            Disposition::Done
        }
    }
}
