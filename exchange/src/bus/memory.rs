use super::{BusMessage, BusReader, EventBus};
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TopicQueue {
    pending: Mutex<VecDeque<BusMessage>>,
    notify: Notify,
}

impl TopicQueue {
    fn push_back(&self, message: BusMessage) {
        self.pending.lock().push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: BusMessage) {
        self.pending.lock().push_front(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<BusMessage> {
        self.pending.lock().pop_front()
    }
}

/// In-process bus: one queue per topic shared by all of its readers.
///
/// Every acknowledged publish is also kept in a history so callers can see
/// what was emitted after readers have drained the queues. `fail_next`
/// makes the next publishes to a topic fail, to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Arc<TopicQueue>>>,
    history: Mutex<Vec<BusMessage>>,
    failures: Mutex<HashMap<String, usize>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, topic: &str) -> Arc<TopicQueue> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    pub fn fail_next(&self, topic: &str, times: usize) {
        self.failures.lock().insert(topic.to_string(), times);
    }

    /// Messages acknowledged on `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.history
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Messages waiting for a reader on `topic`
    pub fn pending(&self, topic: &str) -> usize {
        self.queue(topic).pending.lock().len()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn send_sync(&self, message: BusMessage) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        {
            let mut failures = self.failures.lock();
            if let Some(left) = failures.get_mut(&message.topic) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BusError::Publish {
                        topic: message.topic.clone(),
                        reason: "injected failure".to_string(),
                    });
                }
            }
        }
        self.history.lock().push(message.clone());
        self.queue(&message.topic).push_back(message);
        Ok(())
    }

    fn start_read(&self, topic: &str) -> Box<dyn BusReader> {
        Box::new(MemoryReader {
            queue: self.queue(topic),
            closed: self.closed.clone(),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for queue in self.topics.lock().values() {
            queue.notify.notify_waiters();
        }
    }
}

struct MemoryReader {
    queue: Arc<TopicQueue>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BusReader for MemoryReader {
    async fn read(&mut self) -> Option<BusMessage> {
        loop {
            let notified = self.queue.notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(message) = self.queue.pop() {
                return Some(message);
            }
            notified.await;
        }
    }

    fn rput(&mut self, message: BusMessage) {
        self.queue.push_front(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_and_rput() {
        let bus = MemoryBus::new();
        let mut reader = bus.start_read("t");
        for i in 0..3 {
            bus.send_sync(BusMessage::new("t", "k", vec![i])).await.unwrap();
        }
        let first = reader.read().await.unwrap();
        assert_eq!(first.data, vec![0]);
        reader.rput(first);
        assert_eq!(reader.read().await.unwrap().data, vec![0]);
        assert_eq!(reader.read().await.unwrap().data, vec![1]);
        assert_eq!(bus.pending("t"), 1);
        assert_eq!(bus.published("t").len(), 3);
    }

    #[tokio::test]
    async fn test_reader_wakes_on_publish() {
        let bus = Arc::new(MemoryBus::new());
        let mut reader = bus.start_read("t");
        let handle = tokio::spawn(async move { reader.read().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.send_sync(BusMessage::new("t", "k", b"x".to_vec())).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().data, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_injected_failures_and_close() {
        let bus = MemoryBus::new();
        bus.fail_next("t", 1);
        assert!(matches!(
            bus.send_sync(BusMessage::new("t", "k", vec![])).await,
            Err(BusError::Publish { .. })
        ));
        bus.send_sync(BusMessage::new("t", "k", vec![])).await.unwrap();

        let mut reader = bus.start_read("t");
        bus.close();
        assert!(reader.read().await.is_none());
        assert_eq!(bus.pending("t"), 1);
        assert!(matches!(
            bus.send_sync(BusMessage::new("t", "k", vec![])).await,
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_send_until_acked_rides_out_failures() {
        let bus = MemoryBus::new();
        bus.fail_next("t", 3);
        let backoff = Duration::from_millis(1);
        crate::bus::send_until_acked(&bus, BusMessage::new("t", "k", vec![7]), backoff)
            .await
            .unwrap();
        assert_eq!(bus.published("t").len(), 1);

        bus.fail_next("t", 5);
        let message = BusMessage::new("t", "k", vec![8]);
        let res = crate::bus::send_with_retries(&bus, message, 2, backoff).await;
        assert!(res.is_err());
    }
}
