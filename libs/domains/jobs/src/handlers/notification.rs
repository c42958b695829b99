use async_trait::async_trait;
use coordination::AdaptiveRouter;
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{JobContext, JobError, JobHandler};
use tracing::{debug, info, warn};

use crate::collaborators::{CacheStore, RecipientDirectory};
use crate::error::{DomainError, DomainResult};
use crate::models::{NotificationJob, RealtimeJob};
use crate::queues::JobProducer;

/// Resolves recipients and fans the notification out as realtime jobs.
///
/// Recipient lists are read from the cache when the router picks the fast
/// path; a miss or cache failure falls back to the directory, whose answer
/// is written back to the cache.
pub struct NotificationHandler {
    cache: Arc<dyn CacheStore>,
    directory: Arc<dyn RecipientDirectory>,
    router: Arc<AdaptiveRouter>,
    producer: JobProducer,
    cache_ttl: Duration,
}

impl NotificationHandler {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        directory: Arc<dyn RecipientDirectory>,
        router: Arc<AdaptiveRouter>,
        producer: JobProducer,
    ) -> Self {
        Self {
            cache,
            directory,
            router,
            producer,
            cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn recipients(&self, audience: &str) -> DomainResult<Vec<String>> {
        let key = format!("recipients:{}", audience);
        let key = key.as_str();
        let cache = &self.cache;
        let directory = &self.directory;
        let ttl = self.cache_ttl;

        self.router
            .route(
                move || async move {
                    match cache.get(key).await? {
                        Some(raw) => Ok(serde_json::from_str::<Vec<String>>(&raw)?),
                        None => Err(DomainError::Cache(format!("miss for {}", key))),
                    }
                },
                move || async move {
                    let ids = directory.resolve(audience).await?;
                    let raw = serde_json::to_string(&ids)?;
                    if let Err(e) = cache.set(key, &raw, ttl).await {
                        warn!(key = %key, error = %e, "Failed to cache recipients");
                    }
                    Ok::<_, DomainError>(ids)
                },
            )
            .await
    }
}

#[async_trait]
impl JobHandler<NotificationJob> for NotificationHandler {
    async fn handle(&self, job: &NotificationJob, ctx: &JobContext) -> Result<(), JobError> {
        let audience = job.audience();
        let recipients = self.recipients(&audience).await?;

        if recipients.is_empty() {
            debug!(job_key = %ctx.job_key, audience = %audience, "No recipients");
            return Ok(());
        }

        let payload = job.payload();
        let jobs: Vec<RealtimeJob> = recipients
            .iter()
            .map(|user_id| RealtimeJob::Publish {
                user_id: user_id.clone(),
                event: job.event().to_string(),
                payload: payload.clone(),
                dedupe_key: Some(format!("{}:{}", ctx.job_key, user_id)),
            })
            .collect();

        self.producer.submit_all(&jobs).await?;

        info!(
            job_key = %ctx.job_key,
            event = job.event(),
            audience = %audience,
            recipients = jobs.len(),
            "Fanned out notification"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NotificationHandler"
    }
}
