use async_trait::async_trait;
use std::sync::Arc;
use stream_queue::{JobContext, JobError, JobHandler};
use tracing::debug;

use crate::collaborators::PushChannel;
use crate::models::{PushMessage, RealtimeJob};

pub struct RealtimeHandler {
    channel: Arc<dyn PushChannel>,
}

impl RealtimeHandler {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl JobHandler<RealtimeJob> for RealtimeHandler {
    async fn handle(&self, job: &RealtimeJob, ctx: &JobContext) -> Result<(), JobError> {
        let RealtimeJob::Publish {
            user_id,
            event,
            payload,
            dedupe_key,
        } = job;

        let message = PushMessage {
            event: event.clone(),
            payload: payload.clone(),
            dedupe_key: dedupe_key.clone(),
        };
        let receivers = self.channel.publish(user_id, &message).await?;

        // Offline users simply miss live pushes.
        if receivers == 0 {
            debug!(
                job_key = %ctx.job_key,
                user_id = %user_id,
                event = %event,
                "User offline, push dropped"
            );
        } else {
            debug!(job_key = %ctx.job_key, user_id = %user_id, event = %event, receivers, "Pushed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RealtimeHandler"
    }
}
