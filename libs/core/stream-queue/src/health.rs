//! Health check handlers for queue workers.
//!
//! - `/health`: liveness
//! - `/ready`: broker PING
//! - `/metrics`: Prometheus text format
//! - `/queues`: depth, pending, deferred and dead-letter counts per queue

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::broker::StreamBroker;
use crate::entry::dead_letter_name;
use crate::error::QueueError;
use crate::metrics;

/// A queue and the consumer group whose backlog is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub group: String,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            group: group.into(),
        }
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub broker: Arc<dyn StreamBroker>,
    pub app_name: String,
    pub app_version: String,
    pub queues: Vec<QueueBinding>,
}

impl HealthState {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            app_name: app_name.into(),
            app_version: app_version.into(),
            queues: Vec::new(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>, group: impl Into<String>) -> Self {
        self.queues.push(QueueBinding::new(queue, group));
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queue: String,
    pub group: String,
    pub length: u64,
    pub pending: u64,
    pub deferred: u64,
    pub dead_letters: u64,
}

pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match state.broker.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "redis": "ok" }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("error: {}", e) }
            })),
        )),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        )
            .into_response(),
    }
}

async fn queue_stats(
    broker: &dyn StreamBroker,
    binding: &QueueBinding,
) -> Result<QueueStats, QueueError> {
    Ok(QueueStats {
        queue: binding.queue.clone(),
        group: binding.group.clone(),
        length: broker.len(&binding.queue).await?,
        pending: broker.pending_count(&binding.queue, &binding.group).await?,
        deferred: broker.deferred_len(&binding.queue).await?,
        dead_letters: broker.len(&dead_letter_name(&binding.queue)).await?,
    })
}

pub async fn queues_handler(
    State(state): State<HealthState>,
) -> Result<Json<Vec<QueueStats>>, (StatusCode, Json<Value>)> {
    let mut stats = Vec::with_capacity(state.queues.len());
    for binding in &state.queues {
        let entry = queue_stats(state.broker.as_ref(), binding).await.map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "queue": binding.queue,
                    "error": e.to_string()
                })),
            )
        })?;
        stats.push(entry);
    }
    Ok(Json(stats))
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/queues", get(queues_handler))
        .with_state(state)
}
