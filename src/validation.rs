//! Local checks run before any outbound I/O. Failures here are caller errors and
//! are never retried.

use crate::error::{MqError, Result};

/// Byte ceiling for outbound message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    max: Option<usize>,
}

impl SizePolicy {
    pub fn new(max: Option<usize>) -> Self {
        Self { max }
    }

    pub fn unbounded() -> Self {
        Self { max: None }
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn validate(&self, body: &str) -> Result<()> {
        match self.max {
            Some(max) if body.len() > max => Err(MqError::SizeExceeded {
                size: body.len(),
                max,
            }),
            _ => Ok(()),
        }
    }
}

/// Naming rules for queue and topic identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRule {
    /// Anything that fits in a frame header line (STOMP paths like `/queue/a.b`).
    FrameSafe,
    /// Letters, digits, `_` and `-` only, for backends that look queues up by name.
    QueueName,
}

impl DestinationRule {
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(MqError::invalid_destination(name, "name is empty"));
        }

        let rejected = match self {
            DestinationRule::FrameSafe => name.chars().find(|c| matches!(c, '\n' | '\r' | '\0')),
            DestinationRule::QueueName => name
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')),
        };

        match rejected {
            Some(c) => Err(MqError::invalid_destination(
                name,
                format!("unsupported character {c:?}"),
            )),
            None => Ok(()),
        }
    }
}
