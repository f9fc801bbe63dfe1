//! Error types shared across the engine, the bus and the saga

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::engine::entry::OrderStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("symbol {0} has no matching engine")]
    UnknownSymbol(String),

    #[error("order {order_id} belongs to {symbol}, not {engine}")]
    SymbolMismatch {
        order_id: String,
        symbol: String,
        engine: String,
    },

    #[error("order {order_id} is {status}, only TRADING orders can be matched")]
    NotTrading { order_id: String, status: OrderStatus },

    #[error("order {0} was already admitted")]
    Duplicate(String),

    #[error("order {0} is not resting in the book")]
    OrderNotFound(String),

    #[error("order {0} has a negative or empty amount or price")]
    InvalidAmount(String),

    #[error("decimal overflow")]
    Overflow,
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("order store unavailable: {0}")]
    Unavailable(String),

    #[error("order store timed out after {0:?}")]
    Timeout(Duration),

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient {unit} for user {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: u64,
        unit: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("user {user_id} has no {unit} wallet")]
    WalletNotFound { user_id: u64, unit: String },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger timed out after {0:?}")]
    Timeout(Duration),

    #[error("reservation of order {0} does not match its settlement")]
    ReservationMismatch(String),

    #[error("balance of user {user_id} in {unit} would overflow")]
    Overflow { user_id: u64, unit: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}
