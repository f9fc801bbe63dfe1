//! Match Logic Module
//!
//! Price-time priority matching for one symbol: limit orders against resting
//! limits then waiting market orders, market orders against resting limits.

pub mod matcher;

pub use matcher::{MatchOutcome, MatchingEngine};
