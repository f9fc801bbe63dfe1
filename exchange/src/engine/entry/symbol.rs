//! Symbol Types and Structures
//!
//! This module defines the trading pair description the registry builds
//! engines from.

use serde::{Deserialize, Serialize};

/// A trading pair, e.g. `BTC/USDT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    /// Name of the trading pair (e.g., "BTC/USDT")
    pub name: String,
    /// Traded asset (e.g., "BTC"); a SELL freezes this unit
    pub coin_unit: String,
    /// Pricing asset (e.g., "USDT"); a BUY freezes this unit
    pub base_unit: String,
    /// Current status of the symbol
    #[serde(default)]
    pub status: SymbolStatus,
}

/// Only `Visible` pairs get a matching engine at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymbolStatus {
    #[default]
    Visible,
    Hidden,
}

impl Symbol {
    pub fn new(name: &str, coin_unit: &str, base_unit: &str) -> Self {
        Self {
            name: name.to_string(),
            coin_unit: coin_unit.to_string(),
            base_unit: base_unit.to_string(),
            status: SymbolStatus::Visible,
        }
    }

    /// Builds a pair from its `COIN/BASE` name
    pub fn parse(name: &str) -> Option<Self> {
        let (coin, base) = name.split_once('/')?;
        if coin.is_empty() || base.is_empty() {
            return None;
        }
        Some(Self::new(name, coin, base))
    }

    pub fn is_visible(&self) -> bool {
        self.status == SymbolStatus::Visible
    }
}
