//! Consumer-group worker runtime.
//!
//! A [`StreamWorker`] owns one queue and one [`JobHandler`]. Each cycle it
//! claims entries whose visibility timeout expired, tops the batch up with
//! new entries, and runs the handler per entry. Successful entries are
//! acknowledged immediately; failures stay pending and come back after the
//! visibility timeout. Entries past their delivery budget, undecodable
//! entries and permanent failures go to the dead-letter queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::StreamBroker;
use crate::config::WorkerConfig;
use crate::dlq::DeadLetterQueue;
use crate::entry::{Delivery, StreamEntry};
use crate::error::{ErrorCategory, JobError, QueueError};
use crate::metrics::{self, WorkerMetrics};

/// Delivery metadata passed to handlers alongside the decoded job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub queue: String,
    pub stream_id: String,
    /// Use as the idempotency key for side effects.
    pub job_key: String,
    /// 1 on first delivery.
    pub delivery_count: u64,
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Domain handlers implement this to process jobs of type `J`.
///
/// ```rust,ignore
/// #[async_trait]
/// impl JobHandler<EmailJob> for EmailHandler {
///     async fn handle(&self, job: &EmailJob, ctx: &JobContext) -> Result<(), JobError> {
///         self.sender.send(&job.to, job.subject.as_deref(), &ctx.job_key).await?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "EmailHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    async fn handle(&self, job: &J, ctx: &JobContext) -> Result<(), JobError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Handler succeeded.
    Completed,
    /// Left pending for redelivery.
    Failed,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub read: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Completed => self.completed += 1,
            EntryOutcome::Failed => self.failed += 1,
            EntryOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `true` when cancelled.
pub(crate) async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

struct EntryProcessor<J, H> {
    broker: Arc<dyn StreamBroker>,
    handler: Arc<H>,
    config: Arc<WorkerConfig>,
    dead_letters: DeadLetterQueue,
    metrics: WorkerMetrics,
    _job: PhantomData<fn() -> J>,
}

impl<J, H> Clone for EntryProcessor<J, H> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
            dead_letters: self.dead_letters.clone(),
            metrics: self.metrics.clone(),
            _job: PhantomData,
        }
    }
}

impl<J, H> EntryProcessor<J, H>
where
    J: DeserializeOwned + Send + Sync + 'static,
    H: JobHandler<J> + 'static,
{
    async fn process(&self, entry: StreamEntry) -> EntryOutcome {
        self.metrics.job_received();

        if let Some(max) = self.config.max_deliveries {
            if entry.delivery_count > u64::from(max) {
                let reason = format!("exceeded max deliveries ({})", max);
                return self.dead_letter(&entry, &reason, "max_deliveries").await;
            }
        }

        let delivery = match Delivery::<J>::decode(&self.config.queue, &entry) {
            Ok(delivery) => delivery,
            Err(e) => {
                let reason = format!("undecodable payload: {}", e);
                return self.dead_letter(&entry, &reason, "undecodable").await;
            }
        };

        let ctx = JobContext {
            queue: delivery.queue.clone(),
            stream_id: delivery.id.clone(),
            job_key: delivery.job_key.clone(),
            delivery_count: delivery.delivery_count,
            enqueued_at: delivery.enqueued_at,
        };

        debug!(
            queue = %ctx.queue,
            stream_id = %ctx.stream_id,
            job_key = %ctx.job_key,
            delivery_count = ctx.delivery_count,
            "Processing job"
        );

        let start = Instant::now();
        let result = AssertUnwindSafe(self.handler.handle(&delivery.payload, &ctx))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {
                self.metrics.job_processed(start.elapsed());
                self.ack(&entry.id).await;
                EntryOutcome::Completed
            }
            Ok(Err(e)) if e.category() == ErrorCategory::Permanent => {
                self.metrics.job_failed(ErrorCategory::Permanent);
                self.dead_letter(&entry, &e.to_string(), "permanent").await
            }
            Ok(Err(e)) => {
                let category = e.category();
                self.metrics.job_failed(category);
                warn!(
                    queue = %ctx.queue,
                    stream_id = %ctx.stream_id,
                    job_key = %ctx.job_key,
                    delivery_count = ctx.delivery_count,
                    handler = self.handler.name(),
                    error = %e,
                    error_category = category.as_str(),
                    "Job failed, leaving pending for redelivery"
                );
                EntryOutcome::Failed
            }
            Err(panic) => {
                self.metrics.job_failed(ErrorCategory::Transient);
                error!(
                    queue = %ctx.queue,
                    stream_id = %ctx.stream_id,
                    job_key = %ctx.job_key,
                    handler = self.handler.name(),
                    panic = %panic_message(&*panic),
                    "Handler panicked, leaving pending for redelivery"
                );
                EntryOutcome::Failed
            }
        }
    }

    async fn ack(&self, id: &str) {
        match self.broker.ack(&self.config.queue, &self.config.group, id).await {
            Ok(0) => warn!(
                queue = %self.config.queue,
                stream_id = %id,
                "Entry was no longer pending at ack time"
            ),
            Ok(_) => debug!(queue = %self.config.queue, stream_id = %id, "Acknowledged entry"),
            Err(e) => error!(
                queue = %self.config.queue,
                stream_id = %id,
                error = %e,
                "Failed to acknowledge entry"
            ),
        }
    }

    /// Copy to the dead-letter stream, then acknowledge. If the copy fails the
    /// entry stays pending and is retried on a later claim.
    async fn dead_letter(
        &self,
        entry: &StreamEntry,
        reason: &str,
        label: &'static str,
    ) -> EntryOutcome {
        match self.dead_letters.push(entry, reason).await {
            Ok(_) => {
                self.metrics.job_dead_lettered(label);
                self.ack(&entry.id).await;
                EntryOutcome::DeadLettered
            }
            Err(e) => {
                error!(
                    queue = %self.config.queue,
                    stream_id = %entry.id,
                    error = %e,
                    "Failed to dead-letter entry, leaving pending"
                );
                EntryOutcome::Failed
            }
        }
    }
}

/// Worker bound to one queue and handler.
pub struct StreamWorker<J, H> {
    processor: EntryProcessor<J, H>,
    semaphore: Arc<Semaphore>,
}

impl<J, H> StreamWorker<J, H>
where
    J: DeserializeOwned + Send + Sync + 'static,
    H: JobHandler<J> + 'static,
{
    pub fn new(broker: Arc<dyn StreamBroker>, handler: H, config: WorkerConfig) -> Self {
        Self::with_arc_handler(broker, Arc::new(handler), config)
    }

    pub fn with_arc_handler(
        broker: Arc<dyn StreamBroker>,
        handler: Arc<H>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let metrics = WorkerMetrics::new(&config.queue, handler.name());
        let dead_letters = DeadLetterQueue::new(Arc::clone(&broker), &config.queue);

        Self {
            processor: EntryProcessor {
                broker,
                handler,
                config: Arc::new(config),
                dead_letters,
                metrics,
                _job: PhantomData,
            },
            semaphore,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.processor.config
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.processor.dead_letters
    }

    /// Run until `cancel` fires. A batch that was already read is processed
    /// to completion before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        let config = self.config();
        info!(
            queue = %config.queue,
            group = %config.group,
            consumer = %config.consumer_id,
            handler = self.processor.handler.name(),
            batch_size = config.batch_size,
            max_concurrent_jobs = config.max_concurrent_jobs,
            blocking = config.is_blocking(),
            "Starting stream worker"
        );

        if !self.ensure_group(&cancel).await {
            info!(queue = %config.queue, "Stream worker stopped before start");
            return Ok(());
        }

        match self.recover_owned().await {
            Ok(report) if report.read > 0 => info!(
                queue = %config.queue,
                consumer = %config.consumer_id,
                recovered = report.read,
                "Recovered pending entries from a previous run"
            ),
            Ok(_) => {}
            Err(e) => warn!(
                queue = %config.queue,
                error = %e,
                "Failed to recover own pending entries"
            ),
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.read_batch(config.block, &cancel).await {
                Ok(entries) if entries.is_empty() => {
                    if !config.is_blocking()
                        && sleep_or_cancelled(config.idle_backoff, &cancel).await
                    {
                        break;
                    }
                }
                Ok(entries) => {
                    let report = self.process_entries(entries).await;
                    debug!(
                        queue = %config.queue,
                        read = report.read,
                        completed = report.completed,
                        failed = report.failed,
                        dead_lettered = report.dead_lettered,
                        "Processed batch"
                    );
                }
                Err(QueueError::NoGroup { .. }) => {
                    warn!(
                        queue = %config.queue,
                        group = %config.group,
                        "Consumer group missing, recreating"
                    );
                    if !self.ensure_group(&cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_poll_error(&config.queue);
                    error!(
                        queue = %config.queue,
                        error = %e,
                        backoff_ms = config.error_backoff.as_millis() as u64,
                        "Failed to read from queue, backing off"
                    );
                    if sleep_or_cancelled(config.error_backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!(queue = %config.queue, consumer = %config.consumer_id, "Stream worker stopped");
        Ok(())
    }

    /// One non-blocking read-and-process cycle.
    pub async fn poll_once(&self) -> Result<BatchReport, QueueError> {
        let entries = self.read_batch(None, &CancellationToken::new()).await?;
        Ok(self.process_entries(entries).await)
    }

    /// Reprocess entries still pending for this consumer id, e.g. after a restart.
    ///
    /// Only entries idle for the visibility timeout are taken, so a live
    /// process sharing the id keeps its in-flight work.
    pub async fn recover_owned(&self) -> Result<BatchReport, QueueError> {
        let config = self.config();
        let entries = self
            .processor
            .broker
            .read_owned(
                &config.queue,
                &config.group,
                &config.consumer_id,
                config.visibility_timeout,
                config.batch_size,
            )
            .await?;
        Ok(self.process_entries(entries).await)
    }

    /// Returns `false` if cancelled before the group could be ensured.
    async fn ensure_group(&self, cancel: &CancellationToken) -> bool {
        let config = self.config();
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.processor.broker.ensure_group(&config.queue, &config.group).await {
                Ok(_) => return true,
                Err(e) => {
                    error!(
                        queue = %config.queue,
                        group = %config.group,
                        error = %e,
                        "Failed to ensure consumer group, retrying"
                    );
                    if sleep_or_cancelled(config.error_backoff, cancel).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn read_batch(
        &self,
        block: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamEntry>, QueueError> {
        let config = self.config();
        let broker = &self.processor.broker;

        let mut entries = broker
            .claim_idle(
                &config.queue,
                &config.group,
                &config.consumer_id,
                config.visibility_timeout,
                config.batch_size,
            )
            .await?;

        if !entries.is_empty() {
            self.processor.metrics.jobs_claimed(entries.len());
            info!(
                queue = %config.queue,
                consumer = %config.consumer_id,
                claimed = entries.len(),
                "Claimed entries past their visibility timeout"
            );
        }

        let remaining = config.batch_size.saturating_sub(entries.len());
        if remaining == 0 {
            return Ok(entries);
        }

        let block = if entries.is_empty() { block } else { None };
        let fresh = match block {
            Some(block) => tokio::select! {
                biased;
                () = cancel.cancelled() => Vec::new(),
                read = broker.read_new(
                    &config.queue,
                    &config.group,
                    &config.consumer_id,
                    remaining,
                    Some(block),
                ) => read?,
            },
            None => {
                broker
                    .read_new(&config.queue, &config.group, &config.consumer_id, remaining, None)
                    .await?
            }
        };

        entries.extend(fresh);
        Ok(entries)
    }

    async fn process_entries(&self, entries: Vec<StreamEntry>) -> BatchReport {
        let mut report = BatchReport {
            read: entries.len(),
            ..BatchReport::default()
        };
        if entries.is_empty() {
            return report;
        }

        if self.config().max_concurrent_jobs <= 1 {
            for entry in entries {
                report.record(self.processor.process(entry).await);
            }
            return report;
        }

        let mut join_set = JoinSet::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        for entry in entries {
            let semaphore = Arc::clone(&self.semaphore);
            let processor = self.processor.clone();
            let in_flight = Arc::clone(&in_flight);

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;

                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                processor.metrics.in_flight(current);

                let outcome = processor.process(entry).await;

                let current = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                processor.metrics.in_flight(current);
                Some(outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(outcome)) => report.record(outcome),
                Ok(None) => report.failed += 1,
                Err(e) => {
                    error!(queue = %self.config().queue, error = %e, "Job task aborted");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::queue::JobQueue;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Job {
        n: u32,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailTransient,
        FailPermanent,
        PanicOn(u32),
        SlowSucceed(u64),
    }

    struct TestHandler {
        behavior: Behavior,
        seen: Mutex<Vec<(u32, u64)>>,
        started: AtomicBool,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl TestHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                seen: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }

        fn seen(&self) -> Vec<(u32, u64)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler<Job> for TestHandler {
        async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
            self.started.store(true, Ordering::SeqCst);
            self.seen.lock().unwrap().push((job.n, ctx.delivery_count));
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FailTransient => Err(JobError::transient("downstream unavailable")),
                Behavior::FailPermanent => Err(JobError::permanent("invalid recipient")),
                Behavior::PanicOn(n) if n == job.n => panic!("boom on {}", n),
                Behavior::PanicOn(_) => Ok(()),
                Behavior::SlowSucceed(ms) => {
                    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                    self.max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }

        fn name(&self) -> &'static str {
            "TestHandler"
        }
    }

    struct Fixture {
        broker: Arc<MemoryBroker>,
        queue: JobQueue,
    }

    impl Fixture {
        async fn new() -> Self {
            let broker = Arc::new(MemoryBroker::new());
            broker.ensure_group("jobs", "workers").await.unwrap();
            let queue = JobQueue::new(broker.clone());
            Self { broker, queue }
        }

        fn config(&self, consumer: &str) -> WorkerConfig {
            WorkerConfig::new("jobs", "workers")
                .with_consumer_id(consumer)
                .with_visibility_timeout(Duration::from_millis(50))
                .with_idle_backoff(Duration::from_millis(10))
                .with_error_backoff(Duration::from_millis(10))
        }

        fn worker(
            &self,
            handler: Arc<TestHandler>,
            config: WorkerConfig,
        ) -> StreamWorker<Job, TestHandler> {
            StreamWorker::with_arc_handler(self.broker.clone(), handler, config)
        }

        async fn enqueue(&self, n: u32) {
            self.queue.enqueue("jobs", &Job { n }, None).await.unwrap();
        }

        async fn pending(&self) -> u64 {
            self.broker.pending_count("jobs", "workers").await.unwrap()
        }

        async fn dead_letters(&self) -> u64 {
            self.broker.len("jobs-deadletter").await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_success_is_acknowledged() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::Succeed);
        let worker = fx.worker(handler.clone(), fx.config("a"));

        fx.enqueue(1).await;
        let report = worker.poll_once().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(handler.seen(), vec![(1, 1)]);
        assert_eq!(fx.pending().await, 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_redelivered_after_visibility_timeout() {
        let fx = Fixture::new().await;
        let failing = TestHandler::new(Behavior::FailTransient);
        let healthy = TestHandler::new(Behavior::Succeed);
        let worker_a = fx.worker(failing.clone(), fx.config("a"));
        let worker_b = fx.worker(healthy.clone(), fx.config("b"));

        fx.enqueue(7).await;
        assert_eq!(worker_a.poll_once().await.unwrap().failed, 1);
        assert_eq!(fx.pending().await, 1);

        // Not yet idle long enough.
        assert_eq!(worker_b.poll_once().await.unwrap().read, 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let report = worker_b.poll_once().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(healthy.seen(), vec![(7, 2)]);
        assert_eq!(fx.pending().await, 0);
    }

    #[tokio::test]
    async fn test_acknowledged_job_is_not_redelivered() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::Succeed);
        let worker_a = fx.worker(handler.clone(), fx.config("a"));
        let worker_b = fx.worker(handler.clone(), fx.config("b"));

        fx.enqueue(1).await;
        worker_a.poll_once().await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(worker_b.poll_once().await.unwrap().read, 0);
        assert_eq!(handler.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_deliveries() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::FailTransient);
        let config = fx
            .config("a")
            .with_visibility_timeout(Duration::from_millis(10))
            .with_max_deliveries(Some(2));
        let worker = fx.worker(handler.clone(), config);

        fx.enqueue(3).await;
        assert_eq!(worker.poll_once().await.unwrap().failed, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.poll_once().await.unwrap().failed, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.poll_once().await.unwrap().dead_lettered, 1);

        assert_eq!(handler.seen(), vec![(3, 1), (3, 2)]);
        assert_eq!(fx.pending().await, 0);
        assert_eq!(fx.dead_letters().await, 1);

        let letters = worker.dead_letters().list(10, None).await.unwrap();
        assert_eq!(letters[0].delivery_count, 3);
        assert!(letters[0].error.contains("max deliveries"));
    }

    #[tokio::test]
    async fn test_unlimited_deliveries_never_dead_letters() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::FailTransient);
        let config = fx
            .config("a")
            .with_visibility_timeout(Duration::ZERO)
            .with_max_deliveries(None);
        let worker = fx.worker(handler.clone(), config);

        fx.enqueue(1).await;
        for _ in 0..8 {
            worker.poll_once().await.unwrap();
        }
        assert_eq!(handler.seen().len(), 8);
        assert_eq!(fx.dead_letters().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let fx = Fixture::new().await;
        let worker = fx.worker(TestHandler::new(Behavior::FailPermanent), fx.config("a"));

        fx.enqueue(1).await;
        let report = worker.poll_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(fx.pending().await, 0);
        assert_eq!(fx.dead_letters().await, 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_does_not_abort_batch() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::Succeed);
        let worker = fx.worker(handler.clone(), fx.config("a"));

        fx.queue.enqueue_raw("jobs", "{\"unexpected\":true}".into(), None).await.unwrap();
        fx.enqueue(2).await;

        let report = worker.poll_once().await.unwrap();
        assert_eq!(report.read, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(handler.seen(), vec![(2, 1)]);
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::PanicOn(1));
        let worker = fx.worker(handler.clone(), fx.config("a"));

        fx.enqueue(1).await;
        fx.enqueue(2).await;

        let report = worker.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(fx.pending().await, 1);
    }

    #[tokio::test]
    async fn test_restart_recovers_own_pending() {
        let fx = Fixture::new().await;
        let first = fx.worker(TestHandler::new(Behavior::FailTransient), fx.config("host-jobs"));
        fx.enqueue(5).await;
        first.poll_once().await.unwrap();
        drop(first);

        let handler = TestHandler::new(Behavior::Succeed);
        let restarted = fx.worker(handler.clone(), fx.config("host-jobs"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        let report = restarted.recover_owned().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(handler.seen(), vec![(5, 2)]);
        assert_eq!(fx.pending().await, 0);
    }

    #[tokio::test]
    async fn test_recovery_leaves_in_flight_entries_of_shared_id() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::SlowSucceed(200));
        let config = fx.config("shared").with_visibility_timeout(Duration::from_secs(5));
        let running = fx.worker(handler.clone(), config.clone());
        let starting = fx.worker(handler.clone(), config);

        fx.enqueue(4).await;
        let in_flight = tokio::spawn(async move { running.poll_once().await.unwrap() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let recovered = starting.recover_owned().await.unwrap();
        assert_eq!(recovered.read, 0);

        assert_eq!(in_flight.await.unwrap().completed, 1);
        assert_eq!(handler.seen(), vec![(4, 1)]);
        assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(fx.pending().await, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::SlowSucceed(40));
        let config = fx.config("a").with_batch_size(8).with_max_concurrent_jobs(3);
        let worker = fx.worker(handler.clone(), config);

        for n in 0..8 {
            fx.enqueue(n).await;
        }
        let report = worker.poll_once().await.unwrap();

        assert_eq!(report.completed, 8);
        let max = handler.max_active.load(Ordering::SeqCst);
        assert!(max > 1 && max <= 3, "max concurrent was {}", max);
    }

    #[tokio::test]
    async fn test_run_stops_promptly_on_cancel() {
        let fx = Fixture::new().await;
        let config = fx.config("a").with_idle_backoff(Duration::from_secs(30));
        let worker = Arc::new(fx.worker(TestHandler::new(Behavior::Succeed), config));
        let cancel = CancellationToken::new();

        let task = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_in_flight_batch_completes_before_exit() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::SlowSucceed(100));
        let worker = Arc::new(fx.worker(handler.clone(), fx.config("a")));
        let cancel = CancellationToken::new();

        fx.enqueue(1).await;
        let task = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        while !handler.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(handler.seen(), vec![(1, 1)]);
        assert_eq!(fx.pending().await, 0);
    }

    #[tokio::test]
    async fn test_blocking_mode_wakes_on_new_job_and_cancels() {
        let fx = Fixture::new().await;
        let handler = TestHandler::new(Behavior::Succeed);
        let config = fx.config("a").with_block(Some(Duration::from_secs(10)));
        let worker = Arc::new(fx.worker(handler.clone(), config));
        let cancel = CancellationToken::new();

        let task = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.enqueue(9).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert_eq!(handler.seen(), vec![(9, 1)]);
    }

    #[tokio::test]
    async fn test_missing_group_is_created_on_run() {
        let broker = Arc::new(MemoryBroker::new());
        let handler = TestHandler::new(Behavior::Succeed);
        let worker = StreamWorker::<Job, _>::with_arc_handler(
            broker.clone(),
            handler,
            WorkerConfig::new("fresh", "workers").with_idle_backoff(Duration::from_millis(5)),
        );
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!broker.ensure_group("fresh", "workers").await.unwrap());
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*boxed), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "handler panicked");
    }
}
