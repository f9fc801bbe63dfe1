use super::SagaContext;
use crate::bus::{BusMessage, Disposition, MessageHandler};
use crate::engine::entry::{Order, OrderDirection, Symbol};
use crate::error::LedgerError;
use crate::gateway::Settlement;
use crate::metrics;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    Discarded(&'static str),
    Requeue,
}

impl SettlementOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled => "settled",
            SettlementOutcome::Discarded(_) => "discarded",
            SettlementOutcome::Requeue => "requeue",
        }
    }
}

/// Ledger-side consumer of `exchange_order_complete_update_success`.
///
/// Closes the reservation of a finished order: a buy spent its turnover in
/// the base unit and received its traded amount in the coin unit, a sell the
/// other way round. Whatever the order froze but did not spend goes back to
/// the balance. The ledger drops the reservation once settled, so replays are
/// recognised there.
pub struct SettlementHandler {
    ctx: Arc<SagaContext>,
    symbols: HashMap<String, Symbol>,
}

impl SettlementHandler {
    pub fn new(ctx: Arc<SagaContext>, symbols: Vec<Symbol>) -> Self {
        Self {
            ctx,
            symbols: symbols.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn settlement(symbol: &Symbol, order: &Order) -> Settlement {
        let (spent_unit, spent, received_unit, received) = match order.direction {
            OrderDirection::Buy => (
                &symbol.base_unit,
                order.turnover,
                &symbol.coin_unit,
                order.traded_amount,
            ),
            OrderDirection::Sell => (
                &symbol.coin_unit,
                order.traded_amount,
                &symbol.base_unit,
                order.turnover,
            ),
        };
        Settlement {
            order_id: order.order_id.clone(),
            user_id: order.user_id,
            spent_unit: spent_unit.clone(),
            spent,
            received_unit: received_unit.clone(),
            received,
        }
    }

    pub async fn settle(&self, order: &Order) -> SettlementOutcome {
        if !order.status.is_terminal() {
            warn!("order {} is {}, not settling", order.order_id, order.status);
            return SettlementOutcome::Discarded("order not finished");
        }
        let symbol = match self.symbols.get(&order.symbol) {
            Some(symbol) => symbol,
            None => {
                error!(
                    "settlement for order {} of unknown symbol {}",
                    order.order_id, order.symbol
                );
                return SettlementOutcome::Discarded("unknown symbol");
            }
        };
        let settlement = Self::settlement(symbol, order);
        match self.ctx.ledger_call(self.ctx.ledger.settle(&settlement)).await {
            Ok(true) => SettlementOutcome::Settled,
            Ok(false) => {
                debug!("order {} already settled", order.order_id);
                SettlementOutcome::Discarded("already settled")
            }
            Err(e @ (LedgerError::Timeout(_) | LedgerError::Unavailable(_))) => {
                warn!("settling order {} failed: {}", order.order_id, e);
                SettlementOutcome::Requeue
            }
            Err(e) => {
                error!("ledger refused settling order {}: {}", order.order_id, e);
                SettlementOutcome::Discarded("ledger refused settlement")
            }
        }
    }
}

#[async_trait]
impl MessageHandler for SettlementHandler {
    fn name(&self) -> &'static str {
        "settlement"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        let order: Order = match message.decode() {
            Ok(order) => order,
            Err(e) => {
                error!("malformed settlement message: {}", e);
                return Disposition::Done;
            }
        };
        let outcome = metrics::record_metrics("settlement", || self.settle(&order)).await;
        metrics::saga_event("settlement", outcome.label());
        if outcome == SettlementOutcome::Requeue {
            Disposition::Requeue
        } else {
            Disposition::Done
        }
    }
}
