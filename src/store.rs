//! Key-value store boundary.
//!
//! Balances, round snapshots, bet tables, and instant-game records live in
//! an external store reached through the [`Store`] trait. The contract is a
//! small slice of the Redis command set; the one primitive everything else
//! leans on is `incr_by_float`, whose server-side atomicity lets the ledger
//! mutate balances without a read-modify-write race even when several
//! instances share the store.
//!
//! [`MemoryStore`] is the in-process implementation: a `DashMap` whose
//! per-key entry lock provides the same atomic increment. Production
//! deployments put a Redis client behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Key prefixes and TTLs, shared with external tooling that inspects the
/// store directly.
pub mod keys {
    use std::time::Duration;

    pub const ROUND_PREFIX: &str = "crash:round:";
    pub const ACTIVE_BETS_PREFIX: &str = "crash:bets:active:";
    pub const BALANCE_PREFIX: &str = "crash:balance:";
    pub const MINES_GAME_PREFIX: &str = "mines:game:";
    pub const PLINKO_GAME_PREFIX: &str = "plinko:game:";
    pub const DICE_GAME_PREFIX: &str = "dice:game:";

    pub const ROUND_TTL: Duration = Duration::from_secs(60 * 60);
    pub const ACTIVE_BETS_TTL: Duration = Duration::from_secs(10 * 60);
    pub const GAME_TTL: Duration = Duration::from_secs(60 * 60);

    pub fn round(round_id: &str) -> String {
        format!("{}{}", ROUND_PREFIX, round_id)
    }

    pub fn active_bets(round_id: &str) -> String {
        format!("{}{}", ACTIVE_BETS_PREFIX, round_id)
    }

    pub fn balance(user_id: &str) -> String {
        format!("{}{}", BALANCE_PREFIX, user_id)
    }

    pub fn mines_game(game_id: &str) -> String {
        format!("{}{}", MINES_GAME_PREFIX, game_id)
    }

    pub fn plinko_game(game_id: &str) -> String {
        format!("{}{}", PLINKO_GAME_PREFIX, game_id)
    }

    pub fn dice_game(game_id: &str) -> String {
        format!("{}{}", DICE_GAME_PREFIX, game_id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    ReadFailed(String),

    #[error("store write failed: {0}")]
    WriteFailed(String),

    #[error("value at {key} has the wrong type for this operation")]
    WrongType { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal ordered key-value store contract.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a string value, optionally with a time-to-live.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically add `delta` to the float stored at `key` (missing keys
    /// count as 0.0) and return the new value.
    async fn incr_by_float(&self, key: &str, delta: f64) -> StoreResult<f64>;

    async fn hset(&self, key: &str, field: &str, value: String) -> StoreResult<()>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Health snapshot for the `/health` endpoint.
    fn health(&self) -> HashMap<String, String>;
}

enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process store with lazily-expired TTLs.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_if_expired(&self, key: &str) {
        if let Some(entry) = self.entries.get(key) {
            if entry.expired() {
                drop(entry);
                self.entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Scalar(s) => Ok(Some(s.clone())),
                Value::Hash(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> StoreResult<f64> {
        // The dashmap entry guard holds the shard lock for the whole
        // read-add-write, which is what makes this increment atomic.
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Scalar("0".to_string()),
            expires_at: None,
        });

        if entry.expired() {
            entry.value = Value::Scalar("0".to_string());
            entry.expires_at = None;
        }

        let current = match &entry.value {
            Value::Scalar(s) => s.parse::<f64>().map_err(|_| StoreError::WrongType {
                key: key.to_string(),
            })?,
            Value::Hash(_) => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };

        let next = current + delta;
        entry.value = Value::Scalar(next.to_string());
        Ok(next)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> StoreResult<()> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });

        if entry.expired() {
            entry.value = Value::Hash(HashMap::new());
            entry.expires_at = None;
        }

        match &mut entry.value {
            Value::Hash(map) => {
                map.insert(field.to_string(), value);
                Ok(())
            }
            Value::Scalar(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.get(field).cloned()),
                Value::Scalar(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.clone()),
                Value::Scalar(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    fn health(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        stats.insert("status".to_string(), "up".to_string());
        stats.insert("backend".to_string(), "memory".to_string());
        stats.insert("keys".to_string(), self.entries.len().to_string());
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_values() {
        let store = MemoryStore::new();
        store
            .set("short", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();

        assert!(store.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_by_float_accumulates_and_defaults_to_zero() {
        let store = MemoryStore::new();

        assert_eq!(store.incr_by_float("bal", 100.0).await.unwrap(), 100.0);
        assert_eq!(store.incr_by_float("bal", -30.5).await.unwrap(), 69.5);
        assert_eq!(store.get("bal").await.unwrap(), Some("69.5".to_string()));
    }

    #[tokio::test]
    async fn incr_by_float_is_atomic_under_contention() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.incr_by_float("counter", 1.0).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total: f64 = store.get("counter").await.unwrap().unwrap().parse().unwrap();
        assert_eq!(total, 800.0);
    }

    #[tokio::test]
    async fn hash_operations() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1".to_string()).await.unwrap();
        store.hset("h", "b", "2".to_string()).await.unwrap();

        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.hget("h", "c").await.unwrap(), None);

        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);

        store.del("h").await.unwrap();
        assert!(store.hgetall("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn type_mismatch_is_an_error() {
        let store = MemoryStore::new();
        store.set("s", "plain".to_string(), None).await.unwrap();

        assert!(store.hset("s", "f", "v".to_string()).await.is_err());
        assert!(store.incr_by_float("s", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn expire_applies_to_existing_key() {
        let store = MemoryStore::new();
        store.hset("bets", "b1", "{}".to_string()).await.unwrap();
        store
            .expire("bets", Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.hgetall("bets").await.unwrap().is_empty());
    }
}
