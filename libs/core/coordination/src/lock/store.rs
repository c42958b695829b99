use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::LockError;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Storage for lock records.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Store `token` under `key` with `ttl` unless the key exists.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` only if it holds `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError>;
}

#[derive(Clone)]
pub struct RedisLockStore {
    redis: Arc<ConnectionManager>,
    release: Arc<Script>,
}

impl RedisLockStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis: Arc::new(redis),
            release: Arc::new(Script::new(RELEASE_SCRIPT)),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = (*self.redis).clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = (*self.redis).clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

/// In-process store with TTL expiry on the tokio clock.
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    records: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current holder token, ignoring expired records.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut records = self.lock();
        if let Some((_, expires)) = records.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        records.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut records = self.lock();
        match records.get(key) {
            Some((held, expires)) if held == token && *expires > now => {
                records.remove(key);
                Ok(true)
            }
            Some((_, expires)) if *expires <= now => {
                records.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires() {
        let store = MemoryLockStore::new();
        assert!(store.set_if_absent("k", "a", Duration::from_millis(100)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_millis(100)).await.unwrap());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.holder("k"), None);
        assert!(store.set_if_absent("k", "b", Duration::from_millis(100)).await.unwrap());
        assert_eq!(store.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_memory_store_compare_and_delete() {
        let store = MemoryLockStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap();
        assert!(!store.compare_and_delete("k", "other").await.unwrap());
        assert!(store.compare_and_delete("k", "a").await.unwrap());
        assert!(!store.compare_and_delete("k", "a").await.unwrap());
    }
}
