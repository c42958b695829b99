use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::collaborators::PushChannel;
use crate::error::DomainResult;
use crate::models::PushMessage;

/// Publishes each user's messages on `<prefix><user_id>`, where gateway
/// processes holding that user's connections subscribe.
#[derive(Clone)]
pub struct RedisPushChannel {
    redis: Arc<ConnectionManager>,
    prefix: String,
}

impl RedisPushChannel {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis: Arc::new(redis),
            prefix: "realtime:user:".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn channel(&self, user_id: &str) -> String {
        format!("{}{}", self.prefix, user_id)
    }
}

#[async_trait]
impl PushChannel for RedisPushChannel {
    async fn publish(&self, user_id: &str, message: &PushMessage) -> DomainResult<u64> {
        let body = serde_json::to_string(message)?;
        let mut conn = (*self.redis).clone();
        let receivers: u64 = conn.publish(self.channel(user_id), body).await?;
        Ok(receivers)
    }
}
