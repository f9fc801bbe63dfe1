use super::{LedgerGateway, Settlement};
use crate::engine::decimal;
use crate::error::LedgerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wallet {
    pub balance: Decimal,
    pub frozen: Decimal,
}

/// Funds frozen for one open order
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub user_id: u64,
    pub unit: String,
    pub amount: Decimal,
}

#[derive(Debug, Default)]
struct Books {
    wallets: HashMap<(u64, String), Wallet>,
    reservations: HashMap<String, Reservation>,
}

/// Wallets keyed by (user, unit) plus the open reservation of every admitted
/// order. Each operation runs under one lock, so it applies entirely or not
/// at all.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    books: Mutex<Books>,
    latency: Mutex<Option<Duration>>,
    freezes: Mutex<usize>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, user_id: u64, unit: &str, amount: Decimal) {
        let mut books = self.books.lock();
        let wallet = books.wallets.entry((user_id, unit.to_string())).or_default();
        wallet.balance = decimal::saturating_add_floor(wallet.balance, amount);
    }

    pub fn wallet(&self, user_id: u64, unit: &str) -> Option<Wallet> {
        self.books
            .lock()
            .wallets
            .get(&(user_id, unit.to_string()))
            .cloned()
    }

    pub fn reservation(&self, order_id: &str) -> Option<Reservation> {
        self.books.lock().reservations.get(order_id).cloned()
    }

    /// Successful freezes so far
    pub fn freeze_count(&self) -> usize {
        *self.freezes.lock()
    }

    /// Delays every call, to exercise caller timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn credit(
    balance: Decimal,
    amount: Decimal,
    user_id: u64,
    unit: &str,
) -> Result<Decimal, LedgerError> {
    balance
        .checked_add(amount)
        .map(decimal::floor)
        .ok_or_else(|| LedgerError::Overflow {
            user_id,
            unit: unit.to_string(),
        })
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn freeze(
        &self,
        order_id: &str,
        user_id: u64,
        unit: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.delay().await;
        let mut books = self.books.lock();
        if books.reservations.contains_key(order_id) {
            return Ok(());
        }
        let wallet = books
            .wallets
            .get_mut(&(user_id, unit.to_string()))
            .ok_or_else(|| LedgerError::WalletNotFound {
                user_id,
                unit: unit.to_string(),
            })?;
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                user_id,
                unit: unit.to_string(),
                required: amount,
                available: wallet.balance,
            });
        }
        let frozen = credit(wallet.frozen, amount, user_id, unit)?;
        wallet.balance = decimal::sub_floor(wallet.balance, amount);
        wallet.frozen = frozen;
        books.reservations.insert(
            order_id.to_string(),
            Reservation {
                user_id,
                unit: unit.to_string(),
                amount,
            },
        );
        *self.freezes.lock() += 1;
        Ok(())
    }

    async fn settle(&self, settlement: &Settlement) -> Result<bool, LedgerError> {
        self.delay().await;
        let mut books = self.books.lock();
        let Some(reservation) = books.reservations.get(&settlement.order_id).cloned() else {
            return Ok(false);
        };
        if reservation.user_id != settlement.user_id
            || reservation.unit != settlement.spent_unit
            || reservation.unit == settlement.received_unit
        {
            return Err(LedgerError::ReservationMismatch(settlement.order_id.clone()));
        }
        let user_id = settlement.user_id;
        if settlement.spent > reservation.amount {
            return Err(LedgerError::InsufficientFunds {
                user_id,
                unit: reservation.unit,
                required: settlement.spent,
                available: reservation.amount,
            });
        }

        let paid_key = (user_id, reservation.unit.clone());
        let paid = books
            .wallets
            .get(&paid_key)
            .cloned()
            .ok_or_else(|| LedgerError::WalletNotFound {
                user_id,
                unit: reservation.unit.clone(),
            })?;
        if paid.frozen < reservation.amount {
            return Err(LedgerError::InsufficientFunds {
                user_id,
                unit: reservation.unit,
                required: reservation.amount,
                available: paid.frozen,
            });
        }
        let refund = decimal::sub_floor(reservation.amount, settlement.spent);
        let paid = Wallet {
            balance: credit(paid.balance, refund, user_id, &reservation.unit)?,
            frozen: decimal::sub_floor(paid.frozen, reservation.amount),
        };
        let received_key = (user_id, settlement.received_unit.clone());
        let mut received = books.wallets.get(&received_key).cloned().unwrap_or_default();
        received.balance = credit(
            received.balance,
            settlement.received,
            user_id,
            &settlement.received_unit,
        )?;

        books.wallets.insert(paid_key, paid);
        books.wallets.insert(received_key, received);
        books.reservations.remove(&settlement.order_id);
        Ok(true)
    }
}
