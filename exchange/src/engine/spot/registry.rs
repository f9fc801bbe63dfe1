//! Engine Registry Module
//!
//! Owns one matching engine per visible trading pair. The map is filled once
//! at boot and only read afterwards.

use crate::engine::entry::Symbol;
use crate::engine::matchlogic::MatchingEngine;
use crate::error::StoreError;
use crate::gateway::PersistenceGateway;
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    symbol: Symbol,
    engine: Arc<MatchingEngine>,
}

#[derive(Default)]
pub struct EngineRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine for every visible symbol and rebuilds its book from
    /// the persisted TRADING orders.
    ///
    /// Returns the registry and the symbols that got orders back.
    pub async fn boot(
        symbols: Vec<Symbol>,
        store: &dyn PersistenceGateway,
        plate_max_depth: usize,
    ) -> Result<(Self, Vec<String>), StoreError> {
        let registry = Self::new();
        let mut recovered = Vec::new();
        for symbol in symbols.into_iter().filter(Symbol::is_visible) {
            let engine = MatchingEngine::new(&symbol.name, plate_max_depth);
            let open = store.find_open_orders_by_symbol(&symbol.name).await?;
            let count = engine.recover(open);
            info!("engine {} started with {} resting orders", symbol.name, count);
            if count > 0 {
                recovered.push(symbol.name.clone());
            }
            registry.add(symbol, engine);
        }
        Ok((registry, recovered))
    }

    /// Adds or replaces the engine for `symbol`
    pub fn add(&self, symbol: Symbol, engine: MatchingEngine) -> Arc<MatchingEngine> {
        let engine = Arc::new(engine);
        let mut entries = self.entries.write();
        entries.insert(
            symbol.name.clone(),
            Entry {
                symbol,
                engine: engine.clone(),
            },
        );
        engine
    }

    pub fn get(&self, name: &str) -> Option<Arc<MatchingEngine>> {
        let entries = self.entries.read();
        entries.get(name).map(|e| e.engine.clone())
    }

    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        let entries = self.entries.read();
        entries.get(name).map(|e| e.symbol.clone())
    }

    /// All registered symbols, sorted by name
    pub fn symbols(&self) -> Vec<Symbol> {
        let entries = self.entries.read();
        let mut symbols: Vec<Symbol> = entries.values().map(|e| e.symbol.clone()).collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        symbols
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
