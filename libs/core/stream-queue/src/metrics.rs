//! Prometheus metrics for queues, workers and the promoter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

use crate::error::ErrorCategory;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format; empty before [`init_metrics`].
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

pub fn record_enqueued(queue: &str, delayed: bool) {
    counter!(
        "stream_queue_jobs_enqueued_total",
        "queue" => queue.to_string(),
        "delayed" => if delayed { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_promoted(queue: &str, count: usize) {
    counter!("stream_queue_jobs_promoted_total", "queue" => queue.to_string())
        .increment(count as u64);
}

pub fn record_poll_error(queue: &str) {
    counter!("stream_queue_poll_errors_total", "queue" => queue.to_string()).increment(1);
}

/// Per-worker metrics, labelled by queue and handler.
#[derive(Clone)]
pub struct WorkerMetrics {
    queue: String,
    handler: String,
}

impl WorkerMetrics {
    pub fn new(queue: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            handler: handler.into(),
        }
    }

    pub fn job_received(&self) {
        counter!(
            "stream_queue_jobs_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_processed(&self, duration: Duration) {
        counter!(
            "stream_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "stream_queue_job_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, category: ErrorCategory) {
        counter!(
            "stream_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "stream_queue_job_errors_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "category" => category.as_str()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(&self, reason: &'static str) {
        counter!(
            "stream_queue_jobs_dead_lettered_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "reason" => reason
        )
        .increment(1);
    }

    pub fn jobs_claimed(&self, count: usize) {
        counter!(
            "stream_queue_jobs_claimed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(count as u64);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "stream_queue_jobs_in_flight",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .set(count as f64);
    }
}
