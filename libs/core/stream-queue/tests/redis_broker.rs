//! Redis backend tests. Require Docker:
//! `cargo test -p stream-queue --test redis_broker -- --ignored`

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{DelayedJobPromoter, EntryField, JobQueue, QueueError, RedisBroker, StreamBroker};
use test_utils::{TestDataBuilder, TestRedis};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Email {
    to: String,
}

async fn setup() -> (TestRedis, Arc<RedisBroker>) {
    let redis = TestRedis::new().await;
    let broker = Arc::new(RedisBroker::new(redis.connection()));
    (redis, broker)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn enqueue_dequeue_acknowledge() {
    let (_redis, broker) = setup().await;
    let queue = JobQueue::new(broker.clone());
    let name = TestDataBuilder::from_test_name("enqueue_dequeue_acknowledge").queue("email");

    assert!(broker.ensure_group(&name, "g").await.unwrap());
    assert!(!broker.ensure_group(&name, "g").await.unwrap());

    let receipt = queue.enqueue(&name, &Email { to: "a@b.com".into() }, None).await.unwrap();
    let delivery = queue.dequeue::<Email>(&name, "g", "c1").await.unwrap().unwrap();
    assert_eq!(delivery.job_key, receipt.job_key);
    assert_eq!(delivery.delivery_count, 1);
    assert_eq!(broker.pending_count(&name, "g").await.unwrap(), 1);

    queue.acknowledge(&name, "g", &delivery.id).await;
    assert_eq!(broker.pending_count(&name, "g").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn idle_entry_is_claimed_with_delivery_count() {
    let (_redis, broker) = setup().await;
    let name = TestDataBuilder::from_test_name("idle_entry_is_claimed").queue("email");
    broker.ensure_group(&name, "g").await.unwrap();

    JobQueue::new(broker.clone())
        .enqueue(&name, &Email { to: "x".into() }, None)
        .await
        .unwrap();
    let first = broker.read_new(&name, "g", "a", 10, None).await.unwrap();
    assert_eq!(first.len(), 1);

    assert!(broker
        .claim_idle(&name, "g", "b", Duration::from_secs(60), 10)
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(120)).await;
    let claimed = broker
        .claim_idle(&name, "g", "b", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, first[0].id);
    assert_eq!(claimed[0].delivery_count, 2);

    let owned = broker.read_owned(&name, "g", "b", Duration::ZERO, 10).await.unwrap();
    assert_eq!(owned.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn delayed_job_is_promoted_atomically() {
    let (_redis, broker) = setup().await;
    let queue = JobQueue::new(broker.clone());
    let name = TestDataBuilder::from_test_name("delayed_job_is_promoted").queue("email");
    broker.ensure_group(&name, "g").await.unwrap();

    let receipt = queue
        .enqueue(&name, &Email { to: "later".into() }, Some(Duration::from_millis(300)))
        .await
        .unwrap();
    assert_eq!(broker.deferred_len(&name).await.unwrap(), 1);

    let promoter = DelayedJobPromoter::new(broker.clone(), [name.clone()]);
    assert_eq!(promoter.promote_once().await, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let racing = DelayedJobPromoter::new(broker.clone(), [name.clone()]);
    let (a, b) = tokio::join!(promoter.promote_once(), racing.promote_once());
    assert_eq!(a + b, 1);
    assert_eq!(broker.len(&name).await.unwrap(), 1);

    let entries = broker.range(&name, "-", 10).await.unwrap();
    assert_eq!(entries[0].job_key(), Some(receipt.job_key.as_str()));
    assert_eq!(entries[0].field(EntryField::Job), Some("{\"to\":\"later\"}"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reading_without_group_reports_no_group() {
    let (_redis, broker) = setup().await;
    let err = broker.read_new("never-created", "g", "c", 1, None).await.unwrap_err();
    assert!(matches!(err, QueueError::NoGroup { .. }));
    assert_eq!(broker.pending_count("never-created", "g").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn blocking_read_returns_empty_after_timeout() {
    let (_redis, broker) = setup().await;
    let name = TestDataBuilder::from_test_name("blocking_read").queue("email");
    broker.ensure_group(&name, "g").await.unwrap();

    let started = std::time::Instant::now();
    let entries = broker
        .read_new(&name, "g", "c", 1, Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(entries.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(90));
}
