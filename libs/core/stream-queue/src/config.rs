//! Worker configuration.

use core_config::QueueSettings;
use std::time::Duration;
use uuid::Uuid;

use crate::registry::QueueDef;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    pub group: String,
    /// Unique per process by default. Set a stable id to recover this
    /// consumer's own pending entries after a restart.
    pub consumer_id: String,
    pub batch_size: usize,
    pub idle_backoff: Duration,
    pub error_backoff: Duration,
    pub visibility_timeout: Duration,
    /// Deliveries allowed before dead-lettering. `None` disables the limit.
    pub max_deliveries: Option<u32>,
    pub max_concurrent_jobs: usize,
    /// Broker-side blocking read. `None` polls with `idle_backoff`.
    pub block: Option<Duration>,
}

impl WorkerConfig {
    pub fn new(queue: impl Into<String>, group: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            consumer_id: default_consumer_id(&queue),
            queue,
            group: group.into(),
            batch_size: 10,
            idle_backoff: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(30),
            max_deliveries: Some(5),
            max_concurrent_jobs: 1,
            block: None,
        }
    }

    pub fn for_queue<Q: QueueDef>() -> Self {
        Self::new(Q::QUEUE_NAME, Q::CONSUMER_GROUP)
    }

    /// Apply environment-loaded settings on top of the defaults.
    pub fn with_settings(mut self, settings: &QueueSettings) -> Self {
        self.batch_size = settings.batch_size.max(1);
        self.idle_backoff = Duration::from_millis(settings.idle_backoff_ms);
        self.error_backoff = Duration::from_millis(settings.error_backoff_ms);
        self.visibility_timeout = Duration::from_millis(settings.visibility_timeout_ms);
        self.max_deliveries = settings.max_deliveries;
        self.max_concurrent_jobs = settings.max_concurrent_jobs.max(1);
        self.block = settings.block_ms.map(Duration::from_millis);
        self
    }

    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = consumer_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: Option<u32>) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_block(mut self, block: Option<Duration>) -> Self {
        self.block = block;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.block.is_some()
    }
}

/// `<host>-<queue>-<random>`, with `HOSTNAME` falling back to `localhost`.
pub fn default_consumer_id(queue: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, queue, &suffix[..12])
}
