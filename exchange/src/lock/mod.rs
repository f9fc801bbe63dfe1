//! Expiring per-order locks
//!
//! A lock is proven by a random token, so a holder whose lease ran out cannot
//! release a lock someone else has since taken.

use crate::error::LockError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub fn order_lock_key(user_id: u64, order_id: &str) -> String {
    format!("exchange_order::{}::{}", user_id, order_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Takes the lock without waiting; `None` while someone else holds it
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError>;

    /// Releases the lock if `guard` still owns it
    async fn release(&self, guard: LockGuard) -> Result<bool, LockError>;
}

#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some((_, expires)) = entries.get(key) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        entries.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockGuard {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let mut entries = self.entries.lock();
        match entries.get(&guard.key) {
            Some((token, _)) if *token == guard.token => {
                entries.remove(&guard.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(order_lock_key(42, "E7"), "exchange_order::42::E7");
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused_until_release() {
        let locks = MemoryLockStore::new();
        let guard = locks.try_acquire("k", Duration::from_secs(30)).await.unwrap().unwrap();
        assert!(locks.try_acquire("k", Duration::from_secs(30)).await.unwrap().is_none());
        assert!(locks.is_held("k"));
        assert!(locks.release(guard).await.unwrap());
        assert!(!locks.is_held("k"));
        assert!(locks.try_acquire("k", Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_release_new_owner() {
        let locks = MemoryLockStore::new();
        let stale = locks.try_acquire("k", Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fresh = locks.try_acquire("k", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_ne!(stale.token, fresh.token);
        assert!(!locks.release(stale).await.unwrap());
        assert!(locks.is_held("k"));
    }
}
