use super::{Kline, MarketHandler};
use crate::engine::data::TradePlateResult;
use crate::engine::entry::{OrderDirection, Trade};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Latest published trade plate per (symbol, direction)
#[derive(Debug, Default)]
pub struct DepthCache {
    plates: RwLock<HashMap<(String, OrderDirection), TradePlateResult>>,
}

impl DepthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str, direction: OrderDirection) -> Option<TradePlateResult> {
        self.plates
            .read()
            .get(&(symbol.to_string(), direction))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.plates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MarketHandler for DepthCache {
    fn handle_trade(&self, _symbol: &str, _trade: &Trade) {}

    fn handle_kline(&self, _symbol: &str, _kline: &Kline) {}

    fn handle_trade_plate(&self, symbol: &str, plate: &TradePlateResult) {
        self.plates
            .write()
            .insert((symbol.to_string(), plate.direction), plate.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::data::TradePlateItem;
    use rust_decimal_macros::dec;

    #[test]
    fn test_newer_plate_replaces_older() {
        let cache = DepthCache::new();
        let mut plate = TradePlateResult {
            direction: OrderDirection::Buy,
            symbol: "BTC/USDT".to_string(),
            min_amount: dec!(1),
            max_amount: dec!(1),
            min_price: dec!(100),
            max_price: dec!(100),
            items: vec![TradePlateItem { price: dec!(100), amount: dec!(1) }],
        };
        cache.handle_trade_plate("BTC/USDT", &plate);
        plate.items.clear();
        cache.handle_trade_plate("BTC/USDT", &plate);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("BTC/USDT", OrderDirection::Buy).unwrap().items.is_empty());
        assert!(cache.get("BTC/USDT", OrderDirection::Sell).is_none());
    }
}
