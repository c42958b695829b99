//! Producer and single-shot consumer API.

use chrono::DateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::broker::StreamBroker;
use crate::dlq::DeadLetterQueue;
use crate::entry::{DeferredJob, Delivery, JobReceipt, job_fields, now_ms, validate_queue_name};
use crate::error::QueueError;
use crate::metrics;

/// Durable job queue on top of a [`StreamBroker`].
///
/// ```rust,ignore
/// let queue = JobQueue::new(Arc::new(RedisBroker::new(conn)));
/// queue.enqueue("email", &EmailJob::to("a@b.com"), None).await?;
/// queue.enqueue("email", &reminder, Some(Duration::from_secs(3600))).await?;
/// ```
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn StreamBroker>,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn StreamBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn StreamBroker> {
        &self.broker
    }

    /// Serialize `payload` and make it durable on `queue`.
    ///
    /// Without a delay (or with a zero delay) the job is appended to the
    /// stream right away. With a positive delay it is parked in
    /// `<queue>:delayed` until the promoter moves it.
    pub async fn enqueue<T>(
        &self,
        queue: &str,
        payload: &T,
        delay: Option<Duration>,
    ) -> Result<JobReceipt, QueueError>
    where
        T: Serialize + ?Sized + Sync,
    {
        validate_queue_name(queue)?;
        let json = serde_json::to_string(payload)?;
        self.enqueue_raw(queue, json, delay).await
    }

    /// Enqueue pre-serialized JSON text.
    pub async fn enqueue_raw(
        &self,
        queue: &str,
        payload: String,
        delay: Option<Duration>,
    ) -> Result<JobReceipt, QueueError> {
        validate_queue_name(queue)?;

        let job_key = Uuid::now_v7().to_string();
        let enqueued_at = now_ms();

        match delay.filter(|d| !d.is_zero()) {
            None => {
                let fields = job_fields(&job_key, payload, enqueued_at);
                let id = self.broker.append(queue, &fields).await?;

                metrics::record_enqueued(queue, false);
                debug!(queue = %queue, stream_id = %id, job_key = %job_key, "Enqueued job");

                Ok(JobReceipt {
                    job_key,
                    stream_id: Some(id),
                    due_at: None,
                })
            }
            Some(delay) => {
                let due_at_ms = i64::try_from(delay.as_millis())
                    .ok()
                    .and_then(|ms| enqueued_at.checked_add(ms))
                    .ok_or(QueueError::InvalidDelay(delay))?;
                let due_at = DateTime::from_timestamp_millis(due_at_ms)
                    .ok_or(QueueError::InvalidDelay(delay))?;

                let member = serde_json::to_string(&DeferredJob {
                    key: job_key.clone(),
                    job: payload,
                    enqueued_at: enqueued_at.to_string(),
                    due_at: due_at_ms.to_string(),
                })?;
                self.broker.schedule(queue, &member, due_at_ms).await?;

                metrics::record_enqueued(queue, true);
                debug!(
                    queue = %queue,
                    job_key = %job_key,
                    due_at = %due_at,
                    "Scheduled delayed job"
                );

                Ok(JobReceipt {
                    job_key,
                    stream_id: None,
                    due_at: Some(due_at),
                })
            }
        }
    }

    /// Append several immediate jobs in one round trip.
    pub async fn enqueue_batch<T>(
        &self,
        queue: &str,
        payloads: &[T],
    ) -> Result<Vec<JobReceipt>, QueueError>
    where
        T: Serialize + Sync,
    {
        validate_queue_name(queue)?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let enqueued_at = now_ms();
        let mut keys = Vec::with_capacity(payloads.len());
        let mut entries = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let job_key = Uuid::now_v7().to_string();
            entries.push(job_fields(&job_key, serde_json::to_string(payload)?, enqueued_at));
            keys.push(job_key);
        }

        let ids = self.broker.append_batch(queue, &entries).await?;
        for _ in &ids {
            metrics::record_enqueued(queue, false);
        }
        debug!(queue = %queue, count = ids.len(), "Enqueued job batch");

        Ok(keys
            .into_iter()
            .zip(ids)
            .map(|(job_key, id)| JobReceipt {
                job_key,
                stream_id: Some(id),
                due_at: None,
            })
            .collect())
    }

    /// Read at most one new job for `consumer`.
    ///
    /// The group is created on first use. The returned delivery stays
    /// pending until [`acknowledge`](Self::acknowledge) is called. A payload
    /// that does not decode as `T` is dead-lettered and acknowledged, and
    /// `Ok(None)` is returned.
    pub async fn dequeue<T>(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<Delivery<T>>, QueueError>
    where
        T: DeserializeOwned,
    {
        validate_queue_name(queue)?;
        self.broker.ensure_group(queue, group).await?;

        let Some(entry) = self
            .broker
            .read_new(queue, group, consumer, 1, None)
            .await?
            .pop()
        else {
            return Ok(None);
        };

        match Delivery::<T>::decode(queue, &entry) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                DeadLetterQueue::new(self.broker.clone(), queue)
                    .push(&entry, &format!("undecodable payload: {}", e))
                    .await?;
                self.acknowledge(queue, group, &entry.id).await;
                Ok(None)
            }
        }
    }

    /// Remove `id` from the group's pending list. Idempotent; failures are
    /// logged, never returned.
    pub async fn acknowledge(&self, queue: &str, group: &str, id: &str) {
        match self.broker.ack(queue, group, id).await {
            Ok(0) => warn!(
                queue = %queue,
                group = %group,
                stream_id = %id,
                "Acknowledged unknown or already-acknowledged entry"
            ),
            Ok(_) => debug!(queue = %queue, group = %group, stream_id = %id, "Acknowledged entry"),
            Err(e) => error!(
                queue = %queue,
                group = %group,
                stream_id = %id,
                error = %e,
                "Failed to acknowledge entry"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::entry::EntryField;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Email {
        to: String,
    }

    fn queue() -> (JobQueue, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        (JobQueue::new(broker.clone()), broker)
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue() {
        let (queue, _) = queue();
        queue.broker().ensure_group("email", "workers").await.unwrap();

        let receipt = queue
            .enqueue("email", &Email { to: "a@b.com".into() }, None)
            .await
            .unwrap();
        assert!(receipt.stream_id.is_some());
        assert!(!receipt.is_delayed());

        let delivery = queue
            .dequeue::<Email>("email", "workers", "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload.to, "a@b.com");
        assert_eq!(delivery.job_key, receipt.job_key);
        assert_eq!(Some(delivery.id.clone()), receipt.stream_id);
        assert_eq!(delivery.delivery_count, 1);

        queue.acknowledge("email", "workers", &delivery.id).await;
        assert_eq!(queue.broker().pending_count("email", "workers").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let (queue, _) = queue();
        let got = queue.dequeue::<Email>("email", "workers", "c1").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_empty_queue_name_rejected() {
        let (queue, _) = queue();
        let err = queue
            .enqueue("", &Email { to: "x".into() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidQueueName));
    }

    #[tokio::test]
    async fn test_zero_delay_is_immediate() {
        let (queue, broker) = queue();
        let receipt = queue
            .enqueue("email", &Email { to: "x".into() }, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(receipt.stream_id.is_some());
        assert_eq!(broker.len("email").await.unwrap(), 1);
        assert_eq!(broker.deferred_len("email").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delayed_job_is_invisible() {
        let (queue, broker) = queue();
        broker.ensure_group("email", "workers").await.unwrap();

        let receipt = queue
            .enqueue("email", &Email { to: "x".into() }, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(receipt.is_delayed());
        assert!(receipt.stream_id.is_none());
        assert_eq!(broker.deferred_len("email").await.unwrap(), 1);

        let got = queue.dequeue::<Email>("email", "workers", "c1").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_identical_delayed_payloads_stay_distinct() {
        let (queue, broker) = queue();
        let job = Email { to: "same".into() };
        queue.enqueue("email", &job, Some(Duration::from_secs(5))).await.unwrap();
        queue.enqueue("email", &job, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(broker.deferred_len("email").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let (queue, broker) = queue();
        broker.ensure_group("email", "workers").await.unwrap();
        queue
            .enqueue_raw("email", "{not json".to_string(), None)
            .await
            .unwrap();

        let got = queue.dequeue::<Email>("email", "workers", "c1").await.unwrap();
        assert!(got.is_none());
        assert_eq!(broker.pending_count("email", "workers").await.unwrap(), 0);

        let dead = broker.range("email-deadletter", "-", 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].field(EntryField::Job), Some("{not json"));
    }

    #[tokio::test]
    async fn test_enqueue_batch_preserves_order() {
        let (queue, broker) = queue();
        let jobs = vec![Email { to: "1".into() }, Email { to: "2".into() }];
        let receipts = queue.enqueue_batch("email", &jobs).await.unwrap();
        assert_eq!(receipts.len(), 2);

        let entries = broker.range("email", "-", 10).await.unwrap();
        assert_eq!(entries[0].job_key(), Some(receipts[0].job_key.as_str()));
        assert_eq!(entries[1].field(EntryField::Job), Some("{\"to\":\"2\"}"));
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_does_not_panic() {
        let (queue, broker) = queue();
        broker.ensure_group("email", "workers").await.unwrap();
        queue.acknowledge("email", "workers", "1-0").await;
        queue.acknowledge("missing", "workers", "1-0").await;
    }
}
