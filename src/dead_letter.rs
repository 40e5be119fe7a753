use crate::config::Config;
use crate::message::{Envelope, Headers};

/// Prepends `prefix` to the last path segment of `destination`.
///
/// ```
/// use mq_client::dead_letter::add_dlq_prefix;
///
/// assert_eq!(add_dlq_prefix("DLQ.", "/queue/something/myqueue"), "/queue/something/DLQ.myqueue");
/// assert_eq!(add_dlq_prefix("DLQ.", "myqueue"), "DLQ.myqueue");
/// ```
pub fn add_dlq_prefix(prefix: &str, destination: &str) -> String {
    match destination.rfind('/') {
        Some(idx) => {
            let (path, name) = destination.split_at(idx + 1);
            format!("{path}{prefix}{name}")
        }
        None => format!("{prefix}{destination}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Fixed(String),
    Prefix(String),
}

/// Chooses where poison messages go and how they are labelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRouter {
    target: Target,
}

impl DeadLetterRouter {
    pub fn fixed(queue: impl Into<String>) -> Self {
        Self {
            target: Target::Fixed(queue.into()),
        }
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            target: Target::Prefix(prefix.into()),
        }
    }

    /// `None` when the config names no DLQ. An explicit queue wins over a prefix.
    pub fn from_config(config: &Config) -> Option<Self> {
        match (&config.dead_letter_queue, &config.dead_letter_queue_prefix) {
            (Some(queue), _) => Some(Self::fixed(queue.clone())),
            (None, Some(prefix)) => Some(Self::prefixed(prefix.clone())),
            (None, None) => None,
        }
    }

    pub fn destination_for(&self, original: &str) -> String {
        match &self.target {
            Target::Fixed(queue) => queue.clone(),
            Target::Prefix(prefix) => add_dlq_prefix(prefix, original),
        }
    }

    /// Destination and headers for parking `envelope`, which was consumed from `original`.
    pub fn route(&self, envelope: &Envelope, original: &str) -> (String, Headers) {
        (
            self.destination_for(original),
            envelope.dead_letter_headers(original),
        )
    }
}
