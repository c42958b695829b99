//! Stream entry model and wire format.
//!
//! An immediate job is one stream entry with the fields
//! `job`, `job_key`, `enqueued_at` and, after promotion, `due_at`.
//! A delayed job is a [`DeferredJob`] envelope serialized into the
//! `<queue>:delayed` sorted set, scored by its due time in milliseconds.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::error::QueueError;

/// Field names used in stream entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EntryField {
    /// JSON payload.
    Job,
    /// Producer-assigned idempotency key.
    JobKey,
    EnqueuedAt,
    DueAt,
    /// Dead-letter only: why the entry was dead-lettered.
    Error,
    /// Dead-letter only: stream id on the source queue.
    OriginalId,
    /// Dead-letter only.
    DeliveryCount,
    /// Dead-letter only.
    FailedAt,
}

pub type Fields = Vec<(String, String)>;

/// A raw entry as read from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Fields,
    /// Deliveries to the consumer group including this one. Zero for plain range reads.
    pub delivery_count: u64,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            delivery_count: 0,
        }
    }

    pub fn with_delivery_count(mut self, delivery_count: u64) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    pub fn field(&self, name: EntryField) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name.as_ref())
            .map(|(_, v)| v.as_str())
    }

    pub fn job_key(&self) -> Option<&str> {
        self.field(EntryField::JobKey)
    }
}

/// A decoded job handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub queue: String,
    /// Stream id, used to acknowledge.
    pub id: String,
    /// Stable across promotion and redelivery. Empty for entries written by foreign producers.
    pub job_key: String,
    pub payload: T,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub delivery_count: u64,
}

impl<T: DeserializeOwned> Delivery<T> {
    /// Decode the `job` field of a raw entry.
    pub fn decode(queue: &str, entry: &StreamEntry) -> Result<Self, QueueError> {
        let json = entry
            .field(EntryField::Job)
            .ok_or_else(|| QueueError::MalformedEntry {
                id: entry.id.clone(),
                reason: "missing 'job' field".to_string(),
            })?;

        let payload = serde_json::from_str(json)?;

        Ok(Self {
            queue: queue.to_string(),
            id: entry.id.clone(),
            job_key: entry.job_key().unwrap_or_default().to_string(),
            payload,
            enqueued_at: entry
                .field(EntryField::EnqueuedAt)
                .and_then(|v| v.parse().ok())
                .and_then(DateTime::from_timestamp_millis),
            delivery_count: entry.delivery_count,
        })
    }
}

/// What `enqueue` returns once the job is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReceipt {
    pub job_key: String,
    /// Set for immediate jobs only; delayed jobs get an id when promoted.
    pub stream_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

impl JobReceipt {
    pub fn is_delayed(&self) -> bool {
        self.due_at.is_some()
    }
}

/// Sorted-set member for a delayed job. All values are strings so the
/// promotion script can copy them into stream fields untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredJob {
    pub key: String,
    pub job: String,
    pub enqueued_at: String,
    pub due_at: String,
}

impl DeferredJob {
    /// Stream fields written when the job is promoted.
    pub fn into_fields(self) -> Fields {
        vec![
            (EntryField::Job.to_string(), self.job),
            (EntryField::JobKey.to_string(), self.key),
            (EntryField::EnqueuedAt.to_string(), self.enqueued_at),
            (EntryField::DueAt.to_string(), self.due_at),
        ]
    }
}

/// Fields for an immediate job.
pub fn job_fields(job_key: &str, payload: String, enqueued_at_ms: i64) -> Fields {
    vec![
        (EntryField::Job.to_string(), payload),
        (EntryField::JobKey.to_string(), job_key.to_string()),
        (EntryField::EnqueuedAt.to_string(), enqueued_at_ms.to_string()),
    ]
}

/// Sorted set holding delayed jobs for `queue`.
pub fn delayed_key(queue: &str) -> String {
    format!("{}:delayed", queue)
}

/// Dead-letter stream for `queue`.
pub fn dead_letter_name(queue: &str) -> String {
    format!("{}-deadletter", queue)
}

pub fn validate_queue_name(queue: &str) -> Result<(), QueueError> {
    if queue.trim().is_empty() {
        return Err(QueueError::InvalidQueueName);
    }
    Ok(())
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
