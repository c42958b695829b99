use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::collaborators::RecipientDirectory;
use crate::error::{DomainError, DomainResult};

/// Audience membership kept as Redis sets under `audience:<name>`.
/// `user:<id>` keys resolve to that user without a lookup.
#[derive(Clone)]
pub struct RedisRecipientDirectory {
    redis: Arc<ConnectionManager>,
}

impl RedisRecipientDirectory {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis: Arc::new(redis) }
    }
}

#[async_trait]
impl RecipientDirectory for RedisRecipientDirectory {
    async fn resolve(&self, audience: &str) -> DomainResult<Vec<String>> {
        if let Some(user_id) = audience.strip_prefix("user:") {
            return Ok(vec![user_id.to_string()]);
        }
        if !audience.starts_with("audience:") {
            return Err(DomainError::Validation(format!("Unknown audience key: {}", audience)));
        }

        let mut conn = (*self.redis).clone();
        let mut members: Vec<String> = conn
            .smembers(audience)
            .await
            .map_err(|e| DomainError::Provider(format!("directory lookup failed: {}", e)))?;
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::TestRedis;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_resolves_audience_set_sorted() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();
        let _: () = conn.sadd("audience:beta", &["u3", "u1", "u2"]).await.unwrap();

        let directory = RedisRecipientDirectory::new(redis.connection());
        assert_eq!(directory.resolve("audience:beta").await.unwrap(), vec!["u1", "u2", "u3"]);
        assert!(directory.resolve("audience:nobody").await.unwrap().is_empty());
        assert_eq!(directory.resolve("user:u9").await.unwrap(), vec!["u9"]);
        assert!(matches!(
            directory.resolve("group:x").await,
            Err(DomainError::Validation(_))
        ));
    }
}
