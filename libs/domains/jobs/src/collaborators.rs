//! Interfaces the handlers depend on. Concrete adapters live in
//! [`adapters`](crate::adapters); tests use the generated mocks.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::DomainResult;
use crate::models::{PaymentJob, PushMessage};
use crate::templates::OutgoingEmail;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> DomainResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DomainResult<()>;

    /// Returns whether the key existed.
    async fn remove(&self, key: &str) -> DomainResult<bool>;

    /// Returns the number of keys removed.
    async fn remove_by_prefix(&self, prefix: &str) -> DomainResult<u64>;
}

/// Per-user push delivery, addressed by user id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Returns how many live connections received the message.
    async fn publish(&self, user_id: &str, message: &PushMessage) -> DomainResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Returns the provider message id.
    async fn send(&self, email: &OutgoingEmail, idempotency_key: &str) -> DomainResult<String>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the provider transaction id. Repeating a call with the same
    /// idempotency key must not move money twice.
    async fn execute(&self, payment: &PaymentJob, idempotency_key: &str) -> DomainResult<String>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> DomainResult<()>;

    async fn delete(&self, index: &str, id: &str) -> DomainResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// User ids behind an audience key (`user:<id>` or `audience:<name>`).
    async fn resolve(&self, audience: &str) -> DomainResult<Vec<String>>;
}
