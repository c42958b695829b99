//! Broker abstraction over stream storage.
//!
//! [`RedisBroker`] is the production backend. [`MemoryBroker`] gives the
//! same consumer-group semantics in-process and backs the unit tests.

mod memory;
mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

use async_trait::async_trait;
use std::time::Duration;

use crate::entry::{Fields, StreamEntry};
use crate::error::QueueError;

#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append an entry and return its stream id.
    async fn append(&self, queue: &str, fields: &[(String, String)]) -> Result<String, QueueError>;

    /// Append several entries. Ids are returned in input order.
    async fn append_batch(
        &self,
        queue: &str,
        entries: &[Fields],
    ) -> Result<Vec<String>, QueueError> {
        let mut ids = Vec::with_capacity(entries.len());
        for fields in entries {
            ids.push(self.append(queue, fields).await?);
        }
        Ok(ids)
    }

    /// Create the group at the stream tail, creating the stream if needed.
    /// Returns `false` when the group already existed.
    async fn ensure_group(&self, queue: &str, group: &str) -> Result<bool, QueueError>;

    /// Entries never delivered to the group. With `block`, wait up to that
    /// long for the first one.
    async fn read_new(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, QueueError>;

    /// Entries pending for `consumer` and idle at least `min_idle`, redelivered to it.
    async fn read_owned(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError>;

    /// Take over entries from any consumer that have been idle at least `min_idle`.
    async fn claim_idle(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError>;

    /// Number of entries removed from the pending list (0 for unknown ids).
    async fn ack(&self, queue: &str, group: &str, id: &str) -> Result<u64, QueueError>;

    /// Insert a deferred member scored by its due time.
    async fn schedule(&self, queue: &str, member: &str, due_at_ms: i64) -> Result<(), QueueError>;

    /// Atomically move up to `limit` members due at `now_ms` onto the stream.
    async fn promote_due(
        &self,
        queue: &str,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError>;

    async fn deferred_len(&self, queue: &str) -> Result<u64, QueueError>;

    async fn len(&self, queue: &str) -> Result<u64, QueueError>;

    /// Pending entries of the group; 0 if the group does not exist.
    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64, QueueError>;

    /// Entries from `start` (`-` for the beginning, `(id` for exclusive).
    async fn range(
        &self,
        queue: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, QueueError>;

    async fn delete(&self, queue: &str, id: &str) -> Result<u64, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}
