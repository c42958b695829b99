//! Queue bindings and a typed producer.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use stream_queue::{JobQueue, JobReceipt, QueueBinding, QueueDef, QueueError};

use crate::models::{EmailJob, NotificationJob, PaymentJob, RealtimeJob, SearchIndexJob};

pub struct EmailQueue;

impl QueueDef for EmailQueue {
    const QUEUE_NAME: &'static str = "email";
    const CONSUMER_GROUP: &'static str = "email-workers";
}

pub struct PaymentQueue;

impl QueueDef for PaymentQueue {
    const QUEUE_NAME: &'static str = "payments";
    const CONSUMER_GROUP: &'static str = "payment-workers";
}

pub struct NotificationQueue;

impl QueueDef for NotificationQueue {
    const QUEUE_NAME: &'static str = "notifications";
    const CONSUMER_GROUP: &'static str = "notification-workers";
}

pub struct RealtimeQueue;

impl QueueDef for RealtimeQueue {
    const QUEUE_NAME: &'static str = "realtime";
    const CONSUMER_GROUP: &'static str = "realtime-workers";
}

pub struct SearchIndexQueue;

impl QueueDef for SearchIndexQueue {
    const QUEUE_NAME: &'static str = "search-index";
    const CONSUMER_GROUP: &'static str = "search-index-workers";
}

/// Ties a payload type to the queue it travels on.
pub trait QueuedJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Queue: QueueDef;
}

impl QueuedJob for EmailJob {
    type Queue = EmailQueue;
}

impl QueuedJob for PaymentJob {
    type Queue = PaymentQueue;
}

impl QueuedJob for NotificationJob {
    type Queue = NotificationQueue;
}

impl QueuedJob for RealtimeJob {
    type Queue = RealtimeQueue;
}

impl QueuedJob for SearchIndexJob {
    type Queue = SearchIndexQueue;
}

fn binding<Q: QueueDef>() -> QueueBinding {
    QueueBinding::new(Q::QUEUE_NAME, Q::CONSUMER_GROUP)
}

/// Every queue this domain consumes.
pub fn all_queues() -> Vec<QueueBinding> {
    vec![
        binding::<EmailQueue>(),
        binding::<PaymentQueue>(),
        binding::<NotificationQueue>(),
        binding::<RealtimeQueue>(),
        binding::<SearchIndexQueue>(),
    ]
}

/// Enqueues typed jobs onto their own queue.
#[derive(Clone)]
pub struct JobProducer {
    queue: JobQueue,
}

impl JobProducer {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub async fn submit<J: QueuedJob>(&self, job: &J) -> Result<JobReceipt, QueueError> {
        self.queue.enqueue(<J::Queue as QueueDef>::QUEUE_NAME, job, None).await
    }

    pub async fn submit_after<J: QueuedJob>(
        &self,
        job: &J,
        delay: Duration,
    ) -> Result<JobReceipt, QueueError> {
        self.queue.enqueue(<J::Queue as QueueDef>::QUEUE_NAME, job, Some(delay)).await
    }

    pub async fn submit_all<J: QueuedJob>(
        &self,
        jobs: &[J],
    ) -> Result<Vec<JobReceipt>, QueueError> {
        self.queue.enqueue_batch(<J::Queue as QueueDef>::QUEUE_NAME, jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stream_queue::{MemoryBroker, StreamBroker};

    #[test]
    fn test_queue_names_are_distinct() {
        let queues = all_queues();
        let mut names: Vec<&str> = queues.iter().map(|q| q.queue.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 5);
        assert_eq!(SearchIndexQueue::dead_letter_queue(), "search-index-deadletter");
    }

    #[tokio::test]
    async fn test_submit_routes_by_type() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = JobProducer::new(JobQueue::new(broker.clone()));

        producer.submit(&EmailJob::to("a@b.com")).await.unwrap();
        producer
            .submit_after(
                &SearchIndexJob::Delete {
                    index: "products".into(),
                    id: "1".into(),
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(broker.len("email").await.unwrap(), 1);
        assert_eq!(broker.deferred_len("search-index").await.unwrap(), 1);
    }
}
