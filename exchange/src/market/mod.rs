//! Market data fan-out
//!
//! The processor decodes `exchange_order_trade_plate`, `exchange_trade` and
//! `kline_1m` messages into typed events and hands them to every registered
//! [`MarketHandler`].

pub mod depth_cache;

pub use depth_cache::DepthCache;

use crate::bus::{topics, BusMessage, Disposition, MessageHandler};
use crate::engine::data::TradePlateResult;
use crate::engine::entry::Trade;
use async_trait::async_trait;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One candle of a symbol's trading activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub symbol: String,
    pub period: String,
    pub open_price: Decimal,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    pub close_price: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
    pub count: u64,
    pub time: i64,
}

pub trait MarketHandler: Send + Sync {
    fn handle_trade(&self, symbol: &str, trade: &Trade);

    fn handle_kline(&self, symbol: &str, kline: &Kline);

    fn handle_trade_plate(&self, symbol: &str, plate: &TradePlateResult);
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Trade(Trade),
    Kline(Kline),
    TradePlate(TradePlateResult),
}

impl MarketEvent {
    /// Decodes a market topic message; `None` for topics that carry no
    /// market data
    pub fn decode(message: &BusMessage) -> Result<Option<Self>, serde_json::Error> {
        let event = match message.topic.as_str() {
            topics::TRADE => MarketEvent::Trade(message.decode()?),
            topics::KLINE => MarketEvent::Kline(message.decode()?),
            topics::TRADE_PLATE => MarketEvent::TradePlate(message.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade(trade) => &trade.symbol,
            MarketEvent::Kline(kline) => &kline.symbol,
            MarketEvent::TradePlate(plate) => &plate.symbol,
        }
    }
}

#[derive(Default)]
pub struct MarketProcessor {
    handlers: Vec<Arc<dyn MarketHandler>>,
}

impl MarketProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn MarketHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: &MarketEvent) {
        let symbol = event.symbol();
        for handler in &self.handlers {
            match event {
                MarketEvent::Trade(trade) => handler.handle_trade(symbol, trade),
                MarketEvent::Kline(kline) => handler.handle_kline(symbol, kline),
                MarketEvent::TradePlate(plate) => handler.handle_trade_plate(symbol, plate),
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MarketProcessor {
    fn name(&self) -> &'static str {
        "market"
    }

    async fn handle(&self, message: &BusMessage) -> Disposition {
        match MarketEvent::decode(message) {
            Ok(Some(event)) => self.dispatch(&event),
            Ok(None) => warn!("no market handler for topic {}", message.topic),
            Err(e) => error!("malformed {} message: {}", message.topic, e),
        }
        Disposition::Done
    }
}

/// Writes every market event to the log
pub struct LoggingMarketHandler;

impl MarketHandler for LoggingMarketHandler {
    fn handle_trade(&self, symbol: &str, trade: &Trade) {
        info!(
            "{} trade {} {} @ {} (taker {})",
            symbol, trade.id, trade.amount, trade.price, trade.taker_direction
        );
    }

    fn handle_kline(&self, symbol: &str, kline: &Kline) {
        info!(
            "{} {} kline o={} h={} l={} c={} v={}",
            symbol,
            kline.period,
            kline.open_price,
            kline.highest_price,
            kline.lowest_price,
            kline.close_price,
            kline.volume
        );
    }

    fn handle_trade_plate(&self, symbol: &str, plate: &TradePlateResult) {
        info!(
            "{} {} plate: {} levels, {}..{}",
            symbol,
            plate.direction,
            plate.items.len(),
            plate.min_price,
            plate.max_price
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::OrderDirection;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl MarketHandler for Recorder {
        fn handle_trade(&self, symbol: &str, trade: &Trade) {
            self.seen.lock().push(format!("trade {} {}", symbol, trade.amount));
        }

        fn handle_kline(&self, symbol: &str, kline: &Kline) {
            self.seen.lock().push(format!("kline {} {}", symbol, kline.period));
        }

        fn handle_trade_plate(&self, symbol: &str, plate: &TradePlateResult) {
            self.seen.lock().push(format!("plate {} {}", symbol, plate.direction));
        }
    }

    fn kline() -> Kline {
        Kline {
            symbol: "BTC/USDT".to_string(),
            period: "1min".to_string(),
            open_price: dec!(100),
            highest_price: dec!(101),
            lowest_price: dec!(99),
            close_price: dec!(100.5),
            volume: dec!(3),
            turnover: dec!(301),
            count: 4,
            time: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_events_reach_every_handler() {
        let recorder = Arc::new(Recorder::default());
        let cache = Arc::new(DepthCache::new());
        let mut processor = MarketProcessor::new();
        processor.add_handler(recorder.clone());
        processor.add_handler(cache.clone());
        processor.add_handler(Arc::new(LoggingMarketHandler));

        let plate = TradePlateResult {
            direction: OrderDirection::Sell,
            symbol: "BTC/USDT".to_string(),
            min_amount: dec!(1),
            max_amount: dec!(1),
            min_price: dec!(100),
            max_price: dec!(100),
            items: vec![],
        };
        for message in [
            BusMessage::json(topics::TRADE_PLATE, "BTC/USDT", &plate).unwrap(),
            BusMessage::json(topics::KLINE, "BTC/USDT", &kline()).unwrap(),
            BusMessage::new(topics::TRADE, "BTC/USDT", b"oops".to_vec()),
            BusMessage::new("elsewhere", "BTC/USDT", b"{}".to_vec()),
        ] {
            assert_eq!(processor.handle(&message).await, Disposition::Done);
        }

        assert_eq!(
            *recorder.seen.lock(),
            vec!["plate BTC/USDT SELL".to_string(), "kline BTC/USDT 1min".to_string()]
        );
        assert_eq!(cache.get("BTC/USDT", OrderDirection::Sell), Some(plate));
    }
}
