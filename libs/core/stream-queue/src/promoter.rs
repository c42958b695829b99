//! Moves due delayed jobs from `<queue>:delayed` into their streams.

use core_config::QueueSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::StreamBroker;
use crate::entry::now_ms;
use crate::error::QueueError;
use crate::metrics;
use crate::worker::sleep_or_cancelled;

pub struct DelayedJobPromoter {
    broker: Arc<dyn StreamBroker>,
    queues: Vec<String>,
    interval: Duration,
    batch_size: usize,
}

impl DelayedJobPromoter {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        queues: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            broker,
            queues: queues.into_iter().map(Into::into).collect(),
            interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_settings(self, settings: &QueueSettings) -> Self {
        self.with_interval(Duration::from_millis(settings.promoter_interval_ms))
            .with_batch_size(settings.promoter_batch_size)
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Promote everything currently due on `queue`, one batch at a time.
    pub async fn promote_queue(&self, queue: &str) -> Result<usize, QueueError> {
        let mut total = 0;
        loop {
            let ids = self.broker.promote_due(queue, now_ms(), self.batch_size).await?;
            let moved = ids.len();
            total += moved;
            if moved < self.batch_size {
                break;
            }
        }

        if total > 0 {
            metrics::record_promoted(queue, total);
            debug!(queue = %queue, promoted = total, "Promoted delayed jobs");
        }
        Ok(total)
    }

    /// One pass over all queues. Failures are logged and the queue is retried
    /// on the next pass.
    pub async fn promote_once(&self) -> usize {
        let mut total = 0;
        for queue in &self.queues {
            match self.promote_queue(queue).await {
                Ok(n) => total += n,
                Err(e) => error!(queue = %queue, error = %e, "Failed to promote delayed jobs"),
            }
        }
        total
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            queues = ?self.queues,
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Starting delayed job promoter"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.promote_once().await;
            if sleep_or_cancelled(self.interval, &cancel).await {
                break;
            }
        }

        info!("Delayed job promoter stopped");
    }
}
