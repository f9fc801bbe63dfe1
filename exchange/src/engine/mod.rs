//! Match Engine Module
//!
//! This module contains the core components of the matching engine system:
//! - `decimal`: Truncating fixed-point arithmetic
//! - `data`: Book sides and trade plates
//! - `entry`: Order, symbol and trade definitions
//! - `matchengine`: Commands carried on the engine topic
//! - `matchlogic`: Core matching logic and algorithms
//! - `spot`: Engine registry and the topic processor

pub mod data;
pub mod decimal;
pub mod entry;
pub mod matchengine;
pub mod matchlogic;
pub mod spot;
