pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod market;
pub mod metrics;
pub mod saga;
pub mod server;
