use async_trait::async_trait;
use std::sync::Arc;
use stream_queue::{JobContext, JobError, JobHandler};
use tracing::info;

use crate::collaborators::EmailSender;
use crate::models::EmailJob;
use crate::templates::EmailRenderer;

/// Renders the job's template (or inline subject and body) and hands the
/// message to the configured sender.
pub struct EmailHandler {
    sender: Arc<dyn EmailSender>,
    renderer: Arc<EmailRenderer>,
}

impl EmailHandler {
    pub fn new(sender: Arc<dyn EmailSender>, renderer: Arc<EmailRenderer>) -> Self {
        Self { sender, renderer }
    }
}

#[async_trait]
impl JobHandler<EmailJob> for EmailHandler {
    async fn handle(&self, job: &EmailJob, ctx: &JobContext) -> Result<(), JobError> {
        job.validate()?;
        let email = self.renderer.render(job)?;

        let message_id = self.sender.send(&email, &ctx.job_key).await?;

        info!(
            job_key = %ctx.job_key,
            to = %email.to,
            template = ?job.template,
            message_id = %message_id,
            "Sent email"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EmailHandler"
    }
}
