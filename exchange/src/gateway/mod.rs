//! Seams to the order store and the wallet ledger
//!
//! The persistence gateway is the only path to the order record of truth; the
//! ledger owns balances and applies each freeze or settlement atomically.

pub mod ledger;
pub mod store;

pub use ledger::{MemoryLedger, Reservation, Wallet};
pub use store::MemoryOrderStore;

use crate::engine::entry::{Order, OrderStatus};
use crate::error::{LedgerError, StoreError};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// TRADING orders of `symbol`, used to rebuild its book at boot
    async fn find_open_orders_by_symbol(&self, symbol: &str) -> Result<Vec<Order>, StoreError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError>;

    async fn update_fill_state(
        &self,
        order_id: &str,
        traded_amount: Decimal,
        turnover: Decimal,
        status: OrderStatus,
    ) -> Result<(), StoreError>;
}

/// What a finished order did to its owner's wallets
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub order_id: String,
    pub user_id: u64,
    /// Frozen unit the fills paid with
    pub spent_unit: String,
    pub spent: Decimal,
    /// Counter-asset the fills delivered
    pub received_unit: String,
    pub received: Decimal,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Reserves `amount` of `unit` for `order_id`, moving it from balance to
    /// frozen, or fails with insufficient funds without touching the wallet.
    /// Freezing an order that already holds a reservation is a no-op.
    async fn freeze(
        &self,
        order_id: &str,
        user_id: u64,
        unit: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError>;

    /// Closes a finished order's reservation in one step: consumes what the
    /// fills spent, returns the unspent remainder to the balance and credits
    /// the received asset. `Ok(false)` when the order holds no reservation,
    /// which is the case once it has been settled.
    async fn settle(&self, settlement: &Settlement) -> Result<bool, LedgerError>;
}
