//! Dead-letter queue management.
//!
//! Entries that exceeded their delivery budget, could not be decoded, or
//! failed permanently are copied to `<queue>-deadletter` before being
//! acknowledged on the source queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::StreamBroker;
use crate::entry::{EntryField, StreamEntry, dead_letter_name, job_fields, now_ms};
use crate::error::QueueError;

/// One dead-lettered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    /// Id in the dead-letter stream.
    pub id: String,
    pub job: String,
    pub job_key: Option<String>,
    pub error: String,
    pub original_id: String,
    pub delivery_count: u64,
    pub failed_at: Option<DateTime<Utc>>,
}

impl DeadLetter {
    fn from_entry(entry: StreamEntry) -> Self {
        let get = |f: EntryField| entry.field(f).map(str::to_string);
        Self {
            job: get(EntryField::Job).unwrap_or_default(),
            job_key: get(EntryField::JobKey).filter(|k| !k.is_empty()),
            error: get(EntryField::Error).unwrap_or_default(),
            original_id: get(EntryField::OriginalId).unwrap_or_default(),
            delivery_count: get(EntryField::DeliveryCount)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            failed_at: get(EntryField::FailedAt)
                .and_then(|v| v.parse().ok())
                .and_then(DateTime::from_timestamp_millis),
            id: entry.id,
        }
    }
}

#[derive(Clone)]
pub struct DeadLetterQueue {
    broker: Arc<dyn StreamBroker>,
    queue: String,
    stream: String,
}

impl DeadLetterQueue {
    pub fn new(broker: Arc<dyn StreamBroker>, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        let stream = dead_letter_name(&queue);
        Self {
            broker,
            queue,
            stream,
        }
    }

    /// Source queue name.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Copy `entry` to the dead-letter stream. The caller acknowledges it on
    /// the source queue only after this succeeds.
    pub async fn push(&self, entry: &StreamEntry, error: &str) -> Result<String, QueueError> {
        let fields = vec![
            (
                EntryField::Job.to_string(),
                entry.field(EntryField::Job).unwrap_or_default().to_string(),
            ),
            (
                EntryField::JobKey.to_string(),
                entry.job_key().unwrap_or_default().to_string(),
            ),
            (EntryField::Error.to_string(), error.to_string()),
            (EntryField::OriginalId.to_string(), entry.id.clone()),
            (
                EntryField::DeliveryCount.to_string(),
                entry.delivery_count.to_string(),
            ),
            (EntryField::FailedAt.to_string(), now_ms().to_string()),
        ];

        let id = self.broker.append(&self.stream, &fields).await?;

        warn!(
            queue = %self.queue,
            stream_id = %entry.id,
            job_key = entry.job_key().unwrap_or_default(),
            delivery_count = entry.delivery_count,
            dead_letter_id = %id,
            error = %error,
            "Moved job to dead-letter queue"
        );

        Ok(id)
    }

    pub async fn len(&self) -> Result<u64, QueueError> {
        self.broker.len(&self.stream).await
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Up to `count` entries, oldest first, starting after `after` when given.
    pub async fn list(
        &self,
        count: usize,
        after: Option<&str>,
    ) -> Result<Vec<DeadLetter>, QueueError> {
        let start = match after {
            Some(id) => format!("({}", id),
            None => "-".to_string(),
        };
        let entries = self.broker.range(&self.stream, &start, count).await?;
        Ok(entries.into_iter().map(DeadLetter::from_entry).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeadLetter>, QueueError> {
        let mut entries = self.broker.range(&self.stream, id, 1).await?;
        match entries.pop() {
            Some(entry) if entry.id == id => Ok(Some(DeadLetter::from_entry(entry))),
            _ => Ok(None),
        }
    }

    /// Re-enqueue a dead letter onto its source queue, keeping its job key,
    /// then remove it. Returns the new stream id, or `None` if `id` is unknown.
    pub async fn replay(&self, id: &str) -> Result<Option<String>, QueueError> {
        let Some(letter) = self.get(id).await? else {
            return Ok(None);
        };

        let job_key = letter.job_key.clone().unwrap_or_default();
        let fields = job_fields(&job_key, letter.job, now_ms());
        let new_id = self.broker.append(&self.queue, &fields).await?;
        self.broker.delete(&self.stream, id).await?;

        info!(
            queue = %self.queue,
            dead_letter_id = %id,
            stream_id = %new_id,
            job_key = %job_key,
            "Replayed dead-lettered job"
        );

        Ok(Some(new_id))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self.broker.delete(&self.stream, id).await? > 0)
    }
}
