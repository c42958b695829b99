//! Queue definitions.

use crate::entry::{dead_letter_name, delayed_key};

/// Binds a job type's queue and consumer group at compile time.
///
/// ```rust,ignore
/// pub struct EmailQueue;
///
/// impl QueueDef for EmailQueue {
///     const QUEUE_NAME: &'static str = "email";
///     const CONSUMER_GROUP: &'static str = "email-workers";
/// }
/// ```
pub trait QueueDef: Send + Sync {
    const QUEUE_NAME: &'static str;

    const CONSUMER_GROUP: &'static str;

    fn dead_letter_queue() -> String {
        dead_letter_name(Self::QUEUE_NAME)
    }

    fn delayed_set() -> String {
        delayed_key(Self::QUEUE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Payments;

    impl QueueDef for Payments {
        const QUEUE_NAME: &'static str = "payments";
        const CONSUMER_GROUP: &'static str = "payment-workers";
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(Payments::dead_letter_queue(), "payments-deadletter");
        assert_eq!(Payments::delayed_set(), "payments:delayed");
    }
}
