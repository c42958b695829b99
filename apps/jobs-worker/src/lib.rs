//! Jobs Worker Service
//!
//! Runs one stream worker per jobs-domain queue plus the delayed-job
//! promoter, all against the same Redis.
//!
//! ## Architecture
//!
//! ```text
//! DelayedJobPromoter
//!   ↓ (due members of <queue>:delayed)
//! Redis Streams (email, payments, notifications, realtime, search-index)
//!   ↓ (Consumer Group per queue)
//! StreamWorker<Job, Handler> × 5
//!   ↓
//! Providers / cache / push channel
//! ```
//!
//! ## Features
//!
//! - Consumer groups for horizontal scaling
//! - Idle entries reclaimed after the visibility timeout
//! - Dead letter queue per queue
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Health, readiness, metrics and queue stats endpoint

use axum::Router;
use coordination::{
    AdaptiveRouter, DistributedLock, LockSettings, RedisLockStore, RouterSettings,
};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{
    Environment, FromEnv, HealthServerConfig, ProviderSettings, QueueSettings, RedisConfig,
    app_info,
};
use database::redis::connect_from_config_with_retry;
use domain_jobs::adapters::{
    RedisCacheStore, RedisPushChannel, RedisRecipientDirectory, email_sender, payment_gateway,
    request_timeout, search_index,
};
use domain_jobs::collaborators::CacheStore;
use domain_jobs::{
    EmailHandler, EmailJob, EmailRenderer, JobProducer, NotificationHandler, NotificationJob,
    PaymentHandler, PaymentJob, QueuedJob, RealtimeHandler, RealtimeJob, SearchIndexHandler,
    SearchIndexJob, all_queues,
};
use eyre::{Result, WrapErr};
use std::future::Future;
use std::sync::Arc;
use stream_queue::{
    DelayedJobPromoter, HealthState, JobHandler, JobQueue, QueueError, RedisBroker, StreamBroker,
    StreamWorker, WorkerConfig, health_router, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Serve `/health`, `/ready`, `/metrics` and `/queues`.
async fn start_health_server(health_state: HealthState, config: HealthServerConfig) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app).await.wrap_err("Health server failed")?;

    Ok(())
}

fn spawn_worker<J, H>(
    workers: &mut JoinSet<Result<(), QueueError>>,
    broker: &Arc<dyn StreamBroker>,
    handler: H,
    settings: &QueueSettings,
    cancel: &CancellationToken,
) where
    J: QueuedJob,
    H: JobHandler<J> + 'static,
{
    let config = WorkerConfig::for_queue::<J::Queue>().with_settings(settings);
    info!(
        queue = %config.queue,
        group = %config.group,
        consumer_id = %config.consumer_id,
        handler = handler.name(),
        batch_size = config.batch_size,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Starting worker"
    );

    let worker = StreamWorker::<J, H>::new(Arc::clone(broker), handler, config);
    let cancel = cancel.clone();
    workers.spawn(async move { worker.run(cancel).await });
}

/// Run the jobs worker until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, Redis is unreachable
/// after the connection retries, a log-only provider is selected in
/// production, or a signal handler cannot be installed.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let environment = Environment::from_env();
    init_tracing(&environment);

    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    info!(
        name = %app_info.name,
        version = %app_info.version,
        environment = ?environment,
        "Starting jobs worker"
    );

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let settings = QueueSettings::from_env().wrap_err("Failed to load queue settings")?;
    let lock_settings = LockSettings::from_env().wrap_err("Failed to load lock settings")?;
    let router_settings = RouterSettings::from_env().wrap_err("Failed to load router settings")?;
    let health_config = HealthServerConfig::from_env()
        .wrap_err("Failed to load health server configuration")?;
    let providers = ProviderSettings::from_env().wrap_err("Failed to load provider settings")?;
    providers
        .ensure_allowed(&environment)
        .wrap_err("Provider configuration not allowed")?;

    let redis = connect_from_config_with_retry(&redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let broker: Arc<dyn StreamBroker> =
        Arc::new(RedisBroker::new(redis.clone()).with_max_length(settings.stream_max_length));
    let producer = JobProducer::new(JobQueue::new(Arc::clone(&broker)));
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::new(redis.clone()));
    let lock = DistributedLock::with_settings(
        Arc::new(RedisLockStore::new(redis.clone())),
        lock_settings,
    );
    let router = Arc::new(AdaptiveRouter::new("recipients", router_settings));

    let sender = email_sender(&providers.email, request_timeout(&providers))
        .wrap_err("Failed to build email sender")?;
    let renderer = EmailRenderer::with_builtin_templates()
        .wrap_err("Failed to compile email templates")?;
    let gateway = payment_gateway(&providers).wrap_err("Failed to build payment gateway")?;
    let search = search_index(&providers).wrap_err("Failed to build search index client")?;

    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();

    spawn_worker::<EmailJob, _>(
        &mut workers,
        &broker,
        EmailHandler::new(sender, Arc::new(renderer)),
        &settings,
        &cancel,
    );
    spawn_worker::<PaymentJob, _>(
        &mut workers,
        &broker,
        PaymentHandler::new(gateway, lock).with_cancellation(cancel.clone()),
        &settings,
        &cancel,
    );
    spawn_worker::<NotificationJob, _>(
        &mut workers,
        &broker,
        NotificationHandler::new(
            Arc::clone(&cache),
            Arc::new(RedisRecipientDirectory::new(redis.clone())),
            Arc::clone(&router),
            producer.clone(),
        ),
        &settings,
        &cancel,
    );
    spawn_worker::<RealtimeJob, _>(
        &mut workers,
        &broker,
        RealtimeHandler::new(Arc::new(RedisPushChannel::new(redis.clone()))),
        &settings,
        &cancel,
    );
    spawn_worker::<SearchIndexJob, _>(
        &mut workers,
        &broker,
        SearchIndexHandler::new(search, Arc::clone(&cache)),
        &settings,
        &cancel,
    );

    let queues = all_queues();
    let promoter =
        DelayedJobPromoter::new(Arc::clone(&broker), queues.iter().map(|q| q.queue.clone()))
            .with_settings(&settings);
    let promoter_cancel = cancel.clone();
    let promoter_task = tokio::spawn(async move { promoter.run(promoter_cancel).await });

    let health_state = queues.into_iter().fold(
        HealthState::new(Arc::clone(&broker), app_info.name, app_info.version),
        |state, binding| state.with_queue(binding.queue, binding.group),
    );
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    supervise(shutdown_signal(), cancel, workers, promoter_task).await?;
    info!("Jobs worker stopped");
    Ok(())
}

/// Wait for `stop` or the first worker exit, then cancel and drain every
/// task. An error from `stop` is returned only after the drain.
async fn supervise<S>(
    stop: S,
    cancel: CancellationToken,
    mut workers: JoinSet<Result<(), QueueError>>,
    promoter_task: JoinHandle<()>,
) -> Result<()>
where
    S: Future<Output = Result<()>>,
{
    let outcome = tokio::select! {
        result = stop => result,
        Some(joined) = workers.join_next() => {
            error!(result = ?joined, "Worker exited before shutdown was requested");
            Ok(())
        }
    };

    info!("Stopping workers");
    cancel.cancel();

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Worker stopped with error"),
            Err(e) => error!(error = %e, "Worker task panicked"),
        }
    }
    if let Err(e) = promoter_task.await {
        error!(error = %e, "Promoter task panicked");
    }

    outcome
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn waiting_tasks(
        cancel: &CancellationToken,
        stopped: &Arc<AtomicUsize>,
    ) -> (JoinSet<Result<(), QueueError>>, JoinHandle<()>) {
        let mut workers = JoinSet::new();
        for _ in 0..3 {
            let cancel = cancel.clone();
            let stopped = Arc::clone(stopped);
            workers.spawn(async move {
                cancel.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let promoter_cancel = cancel.clone();
        let promoter_stopped = Arc::clone(stopped);
        let promoter = tokio::spawn(async move {
            promoter_cancel.cancelled().await;
            promoter_stopped.fetch_add(1, Ordering::SeqCst);
        });
        (workers, promoter)
    }

    #[tokio::test]
    async fn test_signal_error_still_drains_tasks() {
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let (workers, promoter) = waiting_tasks(&cancel, &stopped);

        let stop = async { Err(eyre::eyre!("Failed to install SIGTERM handler")) };
        let result = supervise(stop, cancel.clone(), workers, promoter).await;

        assert!(result.unwrap_err().to_string().contains("SIGTERM"));
        assert!(cancel.is_cancelled());
        assert_eq!(stopped.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_early_worker_exit_stops_the_rest() {
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let (mut workers, promoter) = waiting_tasks(&cancel, &stopped);
        workers.spawn(async { Err(QueueError::Unavailable("connection reset".to_string())) });

        let result = supervise(std::future::pending(), cancel.clone(), workers, promoter).await;

        assert!(result.is_ok());
        assert_eq!(stopped.load(Ordering::SeqCst), 4);
    }
}
