//! Event bus seam
//!
//! - `memory`: in-process adapter with per-topic queues
//! - `messages`: payloads exchanged between the saga and the engine
//!
//! Delivery is at-least-once. A reader can hand a message back to the front of
//! its topic with `rput`, which is how consumers retry without losing order.

pub mod memory;
pub mod messages;

pub use memory::MemoryBus;

use crate::error::BusError;
use crate::metrics;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod topics {
    pub const ORDER_ADD: &str = "exchange_order_add";
    pub const ORDER_TRADING_READY: &str = "exchange_order_init_complete_trading";
    pub const ORDER_TRADING: &str = "exchange_order_trading";
    pub const ORDER_COMPLETE: &str = "exchange_order_complete";
    pub const ORDER_SETTLEMENT: &str = "exchange_order_complete_update_success";
    pub const TRADE_PLATE: &str = "exchange_order_trade_plate";
    pub const TRADE: &str = "exchange_trade";
    pub const KLINE: &str = "kline_1m";
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: &str, key: &str, data: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            key: key.as_bytes().to_vec(),
            data,
        }
    }

    pub fn json<T: Serialize>(topic: &str, key: &str, payload: &T) -> Result<Self, BusError> {
        Ok(Self::new(topic, key, serde_json::to_vec(payload)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes and waits for the bus to acknowledge
    async fn send_sync(&self, message: BusMessage) -> Result<(), BusError>;

    /// Opens a reader on `topic`. Readers of the same topic share its queue.
    fn start_read(&self, topic: &str) -> Box<dyn BusReader>;

    /// Stops accepting publishes; readers finish and leave what is still
    /// queued in place
    fn close(&self);
}

#[async_trait]
pub trait BusReader: Send {
    /// Next message, or `None` once the bus is closed
    async fn read(&mut self) -> Option<BusMessage>;

    /// Returns a message to the front of the topic
    fn rput(&mut self, message: BusMessage);
}

/// Keeps publishing until the bus acknowledges.
///
/// Only a closed bus stops the loop, since nothing will ever acknowledge.
pub async fn send_until_acked(
    bus: &dyn EventBus,
    message: BusMessage,
    backoff: Duration,
) -> Result<(), BusError> {
    loop {
        match bus.send_sync(message.clone()).await {
            Ok(()) => return Ok(()),
            Err(BusError::Closed) => return Err(BusError::Closed),
            Err(e) => {
                log::warn!("publish to {} failed, retrying: {}", message.topic, e);
                metrics::PUBLISH_RETRY_COUNTER_VEC
                    .with_label_values(&[message.topic.as_str()])
                    .inc();
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Publishes with at most `attempts` tries
pub async fn send_with_retries(
    bus: &dyn EventBus,
    message: BusMessage,
    attempts: usize,
    backoff: Duration,
) -> Result<(), BusError> {
    let mut last = BusError::Closed;
    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            metrics::PUBLISH_RETRY_COUNTER_VEC
                .with_label_values(&[message.topic.as_str()])
                .inc();
            tokio::time::sleep(backoff).await;
        }
        match bus.send_sync(message.clone()).await {
            Ok(()) => return Ok(()),
            Err(BusError::Closed) => return Err(BusError::Closed),
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// What a consumer wants done with the message it just handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    /// Put it back at the front of the topic and back off
    Requeue,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &BusMessage) -> Disposition;
}

/// Runs one reader task for `topic`, feeding every message to `handler`.
///
/// The task stops taking new messages once `shutdown` turns true (or its
/// sender is dropped). A message already being handled is finished first, so
/// its publishes still reach the bus.
pub fn spawn_reader(
    bus: &Arc<dyn EventBus>,
    topic: &str,
    handler: Arc<dyn MessageHandler>,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut reader = bus.start_read(topic);
    let topic = topic.to_string();
    tokio::spawn(async move {
        log::info!("{} reading {}", handler.name(), topic);
        while !*shutdown.borrow() {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                message = reader.read() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if handler.handle(&message).await == Disposition::Requeue {
                reader.rput(message);
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
        log::info!("{} stopped reading {}", handler.name(), topic);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Publishes an echo of every message after a short pause
    struct Echo {
        bus: Arc<MemoryBus>,
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, message: &BusMessage) -> Disposition {
            self.seen.lock().push(message.data.clone());
            tokio::time::sleep(Duration::from_millis(20)).await;
            let echo = BusMessage::new("out", "k", message.data.clone());
            match send_until_acked(self.bus.as_ref(), echo, Duration::from_millis(1)).await {
                Ok(()) => Disposition::Done,
                Err(_) => Disposition::Requeue,
            }
        }
    }

    fn echo(bus: &Arc<MemoryBus>) -> Arc<Echo> {
        Arc::new(Echo {
            bus: bus.clone(),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_shutdown_finishes_message_in_hand_and_leaves_the_rest() {
        let bus = Arc::new(MemoryBus::new());
        let handler = echo(&bus);
        let (stop, stop_rx) = watch::channel(false);
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        let task = spawn_reader(&dyn_bus, "in", handler.clone(), Duration::from_millis(1), stop_rx);

        bus.send_sync(BusMessage::new("in", "k", vec![1])).await.unwrap();
        while handler.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        stop.send_replace(true);
        bus.send_sync(BusMessage::new("in", "k", vec![2])).await.unwrap();
        task.await.unwrap();
        bus.close();

        assert_eq!(*handler.seen.lock(), vec![vec![1]]);
        assert_eq!(bus.published("out").len(), 1);
        assert_eq!(bus.pending("in"), 1);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_the_reader() {
        let bus = Arc::new(MemoryBus::new());
        let (stop, stop_rx) = watch::channel(false);
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        let task = spawn_reader(&dyn_bus, "in", echo(&bus), Duration::from_millis(1), stop_rx);
        drop(stop);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
