use crate::config::Config;
use crate::message::Envelope;

/// What `unreceive` does with a message the application failed to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No dead-lettering configured: nothing is resent, acknowledgment follows
    /// the caller's ack mode.
    Accept,
    /// Resend to the original destination with the retry count incremented.
    Retry,
    /// Retry budget spent: park the message on the dead-letter queue.
    RouteToDlq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryTracker {
    retry_max: u32,
    dead_letter_enabled: bool,
}

impl RedeliveryTracker {
    pub fn new(retry_max: u32, dead_letter_enabled: bool) -> Self {
        Self {
            retry_max,
            dead_letter_enabled,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_max, config.supports_dlq())
    }

    pub fn decide(&self, envelope: &Envelope) -> Decision {
        if !self.dead_letter_enabled {
            Decision::Accept
        } else if envelope.retry_count() < self.retry_max {
            Decision::Retry
        } else {
            Decision::RouteToDlq
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RawMessage, RETRY_COUNT_HEADER};

    fn envelope_with_retries(count: Option<u32>) -> Envelope {
        let mut raw = RawMessage::new("/queue/myqueue", "payload");
        if let Some(count) = count {
            raw = raw.header(RETRY_COUNT_HEADER, count.to_string());
        }
        Envelope::from_raw(raw)
    }

    #[test]
    fn test_without_dlq_always_accepts() {
        let tracker = RedeliveryTracker::new(4, false);
        for count in [None, Some(0), Some(3), Some(4), Some(100)] {
            assert_eq!(tracker.decide(&envelope_with_retries(count)), Decision::Accept);
        }
    }

    #[test]
    fn test_retries_until_budget_spent() {
        let tracker = RedeliveryTracker::new(4, true);

        assert_eq!(tracker.decide(&envelope_with_retries(None)), Decision::Retry);
        assert_eq!(tracker.decide(&envelope_with_retries(Some(3))), Decision::Retry);
        assert_eq!(
            tracker.decide(&envelope_with_retries(Some(4))),
            Decision::RouteToDlq
        );
        assert_eq!(
            tracker.decide(&envelope_with_retries(Some(5))),
            Decision::RouteToDlq
        );
    }

    #[test]
    fn test_zero_retry_max_routes_on_first_failure() {
        let tracker = RedeliveryTracker::new(0, true);
        assert_eq!(
            tracker.decide(&envelope_with_retries(None)),
            Decision::RouteToDlq
        );
    }

    #[test]
    fn test_from_config() {
        let config = crate::ConfigBuilder::new()
            .retry_max(2)
            .dead_letter_queue_prefix("DLQ.")
            .build();
        assert_eq!(
            RedeliveryTracker::from_config(&config),
            RedeliveryTracker::new(2, true)
        );

        let config = crate::ConfigBuilder::new().retry_max(2).build();
        assert_eq!(
            RedeliveryTracker::from_config(&config),
            RedeliveryTracker::new(2, false)
        );
    }
}
