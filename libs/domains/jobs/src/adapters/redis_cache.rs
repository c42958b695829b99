use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::collaborators::CacheStore;
use crate::error::DomainResult;

const SCAN_COUNT: usize = 100;

/// String cache on plain Redis keys.
#[derive(Clone)]
pub struct RedisCacheStore {
    redis: Arc<ConnectionManager>,
}

impl RedisCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis: Arc::new(redis) }
    }
}

/// Escape glob metacharacters so the prefix matches literally.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> DomainResult<Option<String>> {
        let mut conn = (*self.redis).clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DomainResult<()> {
        let mut conn = (*self.redis).clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> DomainResult<bool> {
        let mut conn = (*self.redis).clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn remove_by_prefix(&self, prefix: &str) -> DomainResult<u64> {
        let mut conn = (*self.redis).clone();
        let pattern = match_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.del(&keys).await?;
                removed += count;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(prefix = %prefix, removed, "Invalidated cache prefix");
        Ok(removed)
    }
}
