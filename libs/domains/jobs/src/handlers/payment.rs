use async_trait::async_trait;
use coordination::{DistributedLock, LockError};
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{JobContext, JobError, JobHandler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collaborators::PaymentGateway;
use crate::error::DomainError;
use crate::models::PaymentJob;

/// Executes payments one at a time per order or account.
pub struct PaymentHandler {
    gateway: Arc<dyn PaymentGateway>,
    lock: DistributedLock,
    lock_ttl: Duration,
    cancel: CancellationToken,
}

impl PaymentHandler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, lock: DistributedLock) -> Self {
        Self {
            gateway,
            lock,
            lock_ttl: Duration::from_secs(30),
            cancel: CancellationToken::new(),
        }
    }

    /// Must exceed the slowest expected gateway call.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Abort lock waits when the worker shuts down.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl JobHandler<PaymentJob> for PaymentHandler {
    async fn handle(&self, job: &PaymentJob, ctx: &JobContext) -> Result<(), JobError> {
        job.validate()?;

        let resource = job.lock_resource();
        let guard = match self.lock.acquire(&resource, self.lock_ttl, &self.cancel).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return Err(DomainError::Busy(resource).into()),
            Err(LockError::Cancelled) => {
                return Err(JobError::transient("shutting down before lock was acquired"));
            }
            Err(e) => return Err(JobError::transient(e.to_string())),
        };

        let result = self.gateway.execute(job, &ctx.job_key).await;

        if !guard.release().await {
            warn!(
                resource = %resource,
                job_key = %ctx.job_key,
                "Payment lock expired before release"
            );
        }

        let transaction_id = result?;
        info!(
            job_key = %ctx.job_key,
            kind = job.kind(),
            resource = %resource,
            amount_cents = job.amount_cents(),
            transaction_id = %transaction_id,
            "Payment executed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PaymentHandler"
    }
}
