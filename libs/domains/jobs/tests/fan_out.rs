//! Notification to realtime flow over the in-memory broker.

use async_trait::async_trait;
use coordination::{AdaptiveRouter, DistributedLock, MemoryLockStore};
use domain_jobs::adapters::{LoggingPaymentGateway, StaticRecipientDirectory};
use domain_jobs::collaborators::{CacheStore, PushChannel};
use domain_jobs::{
    DomainResult, JobProducer, NotificationHandler, NotificationJob, NotificationQueue,
    PaymentHandler, PaymentJob, PaymentQueue, PushMessage, RealtimeHandler, RealtimeJob,
    RealtimeQueue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_queue::{JobQueue, MemoryBroker, QueueDef, StreamBroker, StreamWorker, WorkerConfig};

#[derive(Default)]
struct MapCache {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CacheStore for MapCache {
    async fn get(&self, key: &str) -> DomainResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> DomainResult<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> DomainResult<bool> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> DomainResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Default)]
struct RecordingChannel {
    pushed: Mutex<Vec<(String, PushMessage)>>,
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn publish(&self, user_id: &str, message: &PushMessage) -> DomainResult<u64> {
        self.pushed.lock().unwrap().push((user_id.to_string(), message.clone()));
        Ok(1)
    }
}

async fn broker_with_groups() -> Arc<MemoryBroker> {
    let broker = Arc::new(MemoryBroker::new());
    broker
        .ensure_group(NotificationQueue::QUEUE_NAME, NotificationQueue::CONSUMER_GROUP)
        .await
        .unwrap();
    broker
        .ensure_group(RealtimeQueue::QUEUE_NAME, RealtimeQueue::CONSUMER_GROUP)
        .await
        .unwrap();
    broker
        .ensure_group(PaymentQueue::QUEUE_NAME, PaymentQueue::CONSUMER_GROUP)
        .await
        .unwrap();
    broker
}

#[tokio::test]
async fn broadcast_fans_out_one_push_per_recipient() {
    let broker = broker_with_groups().await;
    let producer = JobProducer::new(JobQueue::new(broker.clone()));
    let cache = Arc::new(MapCache::default());
    let channel = Arc::new(RecordingChannel::default());

    let notifications = StreamWorker::<NotificationJob, _>::new(
        broker.clone(),
        NotificationHandler::new(
            cache.clone(),
            Arc::new(StaticRecipientDirectory::new().with_audience("beta", ["u1", "u2", "u3"])),
            Arc::new(AdaptiveRouter::default()),
            producer.clone(),
        ),
        WorkerConfig::for_queue::<NotificationQueue>(),
    );
    let realtime = StreamWorker::<RealtimeJob, _>::new(
        broker.clone(),
        RealtimeHandler::new(channel.clone()),
        WorkerConfig::for_queue::<RealtimeQueue>(),
    );

    let receipt = producer
        .submit(&NotificationJob::Broadcast {
            audience: "beta".into(),
            title: "Launch".into(),
            message: "We are live".into(),
        })
        .await
        .unwrap();

    assert_eq!(notifications.poll_once().await.unwrap().completed, 1);
    assert_eq!(realtime.poll_once().await.unwrap().completed, 3);

    let pushed = channel.pushed.lock().unwrap().clone();
    let users: Vec<&str> = pushed.iter().map(|(u, _)| u.as_str()).collect();
    assert_eq!(users, vec!["u1", "u2", "u3"]);
    for (user_id, message) in &pushed {
        assert_eq!(message.event, "broadcast");
        assert_eq!(message.payload["title"], "Launch");
        assert_eq!(message.dedupe_key, Some(format!("{}:{}", receipt.job_key, user_id)));
    }

    // Directory answer was cached for the next broadcast.
    assert!(cache.get("recipients:audience:beta").await.unwrap().is_some());
    assert_eq!(broker.pending_count("realtime", "realtime-workers").await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_payment_is_dead_lettered_without_retry() {
    let broker = broker_with_groups().await;
    let producer = JobProducer::new(JobQueue::new(broker.clone()));
    let lock = DistributedLock::new(Arc::new(MemoryLockStore::new()));

    let payments = StreamWorker::<PaymentJob, _>::new(
        broker.clone(),
        PaymentHandler::new(Arc::new(LoggingPaymentGateway), lock),
        WorkerConfig::for_queue::<PaymentQueue>(),
    );

    producer
        .submit(&PaymentJob::Charge {
            order_id: "o1".into(),
            customer_id: "c1".into(),
            amount_cents: 0,
            currency: "USD".into(),
        })
        .await
        .unwrap();
    producer
        .submit(&PaymentJob::Charge {
            order_id: "o2".into(),
            customer_id: "c1".into(),
            amount_cents: 2500,
            currency: "EUR".into(),
        })
        .await
        .unwrap();

    let report = payments.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(payments.dead_letters().len().await.unwrap(), 1);
    assert_eq!(broker.pending_count("payments", "payment-workers").await.unwrap(), 0);
}
