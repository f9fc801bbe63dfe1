//! Order lifecycle saga
//!
//! `INIT -> TRADING -> COMPLETED | CANCELED`, driven by bus consumers:
//! - `admission`: lock, freeze funds, mark TRADING, announce trading ready
//! - `trading_ready`: forward TRADING orders to the engine topic
//! - `completion`: persist fill state, then notify settlement
//! - `settlement`: release the frozen funds a finished order spent

pub mod admission;
pub mod completion;
pub mod settlement;
pub mod trading_ready;

pub use admission::{AdmissionHandler, AdmissionOutcome};
pub use completion::{CompletionHandler, CompletionOutcome};
pub use settlement::{SettlementHandler, SettlementOutcome};
pub use trading_ready::{ReadyOutcome, TradingReadyHandler};

use crate::bus::EventBus;
use crate::config::SagaConfig;
use crate::error::{LedgerError, StoreError};
use crate::gateway::{LedgerGateway, PersistenceGateway};
use crate::lock::LockStore;
use std::future::Future;
use std::sync::Arc;

/// Adapters and timings shared by every saga consumer
pub struct SagaContext {
    pub store: Arc<dyn PersistenceGateway>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub locks: Arc<dyn LockStore>,
    pub bus: Arc<dyn EventBus>,
    pub config: SagaConfig,
}

impl SagaContext {
    /// Runs a store call under the configured deadline
    pub async fn store_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let deadline = self.config.store_timeout();
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(deadline)))
    }

    /// Runs a ledger call under the freeze deadline
    pub async fn ledger_call<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        let deadline = self.config.freeze_timeout();
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout(deadline)))
    }
}
