use async_trait::async_trait;
use std::sync::Arc;
use stream_queue::{JobContext, JobError, JobHandler};
use tracing::info;

use crate::collaborators::{CacheStore, SearchIndex};
use crate::models::SearchIndexJob;

/// Applies index changes and invalidates cached results for the index.
pub struct SearchIndexHandler {
    index: Arc<dyn SearchIndex>,
    cache: Arc<dyn CacheStore>,
}

impl SearchIndexHandler {
    pub fn new(index: Arc<dyn SearchIndex>, cache: Arc<dyn CacheStore>) -> Self {
        Self { index, cache }
    }
}

#[async_trait]
impl JobHandler<SearchIndexJob> for SearchIndexHandler {
    async fn handle(&self, job: &SearchIndexJob, ctx: &JobContext) -> Result<(), JobError> {
        let id = match job {
            SearchIndexJob::Upsert { index, id, document } => {
                self.index.upsert(index, id, document).await?;
                id
            }
            SearchIndexJob::Delete { index, id } => {
                self.index.delete(index, id).await?;
                id
            }
        };

        // A failed invalidation retries the whole job; both writes are idempotent.
        let invalidated = self.cache.remove_by_prefix(&job.cache_prefix()).await?;

        info!(
            job_key = %ctx.job_key,
            index = %job.index(),
            id = %id,
            invalidated,
            "Search index updated"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SearchIndexHandler"
    }
}
