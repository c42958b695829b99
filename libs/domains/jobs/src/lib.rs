//! Jobs Domain
//!
//! Background work carried on the stream queue: transactional email,
//! payments, notification fan-out, realtime pushes and search indexing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   JobProducer   │  ← Typed submit, optional delay
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Redis Streams  │  ← One stream + delayed set per queue
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  StreamWorker   │  ← Consumer group per queue
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    Handlers     │  ← Payment lock, router-backed recipient lookup
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Collaborators  │  ← Cache, push channel, SMTP/SendGrid, HTTP providers
//! └─────────────────┘
//! ```
//!
//! Notifications do not push directly. Each recipient becomes its own
//! `realtime` job so one slow connection cannot hold up the rest.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_jobs::{EmailJob, JobProducer};
//!
//! let producer = JobProducer::new(JobQueue::new(broker));
//! producer.submit(&EmailJob::to("a@b.com").with_template("welcome")).await?;
//! ```

pub mod adapters;
pub mod collaborators;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queues;
pub mod templates;

pub use error::{DomainError, DomainResult};
pub use handlers::{
    EmailHandler, NotificationHandler, PaymentHandler, RealtimeHandler, SearchIndexHandler,
};
pub use models::{
    EmailJob, NotificationJob, PaymentJob, PushMessage, RealtimeJob, SearchIndexJob,
};
pub use queues::{
    EmailQueue, JobProducer, NotificationQueue, PaymentQueue, QueuedJob, RealtimeQueue,
    SearchIndexQueue, all_queues,
};
pub use templates::{EmailRenderer, OutgoingEmail};
