//! One [`JobHandler`](stream_queue::JobHandler) per queue.

mod email;
mod notification;
mod payment;
mod realtime;
mod search;

pub use email::EmailHandler;
pub use notification::NotificationHandler;
pub use payment::PaymentHandler;
pub use realtime::RealtimeHandler;
pub use search::SearchIndexHandler;

#[cfg(test)]
pub(crate) fn test_context(queue: &str, job_key: &str) -> stream_queue::JobContext {
    stream_queue::JobContext {
        queue: queue.to_string(),
        stream_id: "1-0".to_string(),
        job_key: job_key.to_string(),
        delivery_count: 1,
        enqueued_at: None,
    }
}
