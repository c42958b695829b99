//! Durable Job Queue
//!
//! Redis Streams backed job queue with consumer-group workers.
//!
//! ## Features
//!
//! - **Durable enqueue**: jobs are appended to a stream, or parked in a
//!   sorted set until due
//! - **Delayed jobs**: [`DelayedJobPromoter`] moves due jobs atomically
//! - **At-least-once delivery**: unacknowledged entries are claimed by
//!   another consumer after the visibility timeout
//! - **Dead-letter queue**: entries past their delivery budget or failing
//!   permanently go to `<queue>-deadletter`
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use stream_queue::{JobQueue, RedisBroker, StreamWorker, WorkerConfig};
//!
//! let broker = Arc::new(RedisBroker::new(redis));
//! let queue = JobQueue::new(broker.clone());
//! queue.enqueue("email", &EmailJob::to("a@b.com"), None).await?;
//!
//! let config = WorkerConfig::for_queue::<EmailQueue>();
//! let worker = StreamWorker::new(broker, EmailHandler::new(sender), config);
//! worker.run(cancel).await?;
//! ```

pub mod broker;
mod config;
mod dlq;
mod entry;
mod error;
mod health;
pub mod metrics;
mod promoter;
mod queue;
mod registry;
mod worker;

pub use broker::{MemoryBroker, RedisBroker, StreamBroker};
pub use config::{WorkerConfig, default_consumer_id};
pub use dlq::{DeadLetter, DeadLetterQueue};
pub use entry::{
    DeferredJob, Delivery, EntryField, Fields, JobReceipt, StreamEntry, dead_letter_name,
    delayed_key,
};
pub use error::{ErrorCategory, JobError, QueueError};
pub use health::{HealthResponse, HealthState, QueueBinding, QueueStats, health_router};
pub use metrics::init_metrics;
pub use promoter::DelayedJobPromoter;
pub use queue::JobQueue;
pub use registry::QueueDef;
pub use worker::{BatchReport, EntryOutcome, JobContext, JobHandler, StreamWorker};

pub use tokio_util::sync::CancellationToken;
