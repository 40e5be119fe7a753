//! Backend capability interface.
//!
//! A [`Transport`] does the actual network I/O for one queue protocol. The
//! [`Connection`](crate::Connection) facade layers validation, redelivery,
//! dead-lettering and reconnects on top of it, so implementations stay thin:
//! report broken links as [`MqError::Connection`](crate::MqError::Connection)
//! or `Io`, and an expired receive as [`MqError::Timeout`](crate::MqError::Timeout).

pub mod memory;
pub mod stomp;

use crate::error::Result;
use crate::message::{Headers, RawMessage};
use crate::validation::DestinationRule;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::{Fault, InMemoryTransport, Operation};
pub use stomp::StompTransport;

/// Queue-service message ceiling in bytes.
pub const QUEUE_SERVICE_MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// The family of broker a transport talks to, and the constraints that come with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// STOMP broker. Path-style destinations, no body ceiling.
    Stomp,
    /// SQS-style HTTP queue service. Named queues, 8 KiB bodies.
    QueueService,
}

impl Backend {
    pub fn default_max_message_size(&self) -> Option<usize> {
        match self {
            Backend::Stomp => None,
            Backend::QueueService => Some(QUEUE_SERVICE_MAX_MESSAGE_SIZE),
        }
    }

    pub fn destination_rule(&self) -> DestinationRule {
        match self {
            Backend::Stomp => DestinationRule::FrameSafe,
            Backend::QueueService => DestinationRule::QueueName,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Whether the consumer has to acknowledge explicitly.
    pub fn requires_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub ack: AckMode,
    /// Backend-specific extras (e.g. `visibility-timeout`, `selector`).
    pub headers: Headers,
}

impl SubscribeOptions {
    pub fn ack(mut self, ack: AckMode) -> Self {
        self.ack = ack;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait Transport: Send {
    fn backend(&self) -> Backend;

    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    async fn subscribe(&mut self, destination: &str, options: &SubscribeOptions) -> Result<()>;

    async fn unsubscribe(&mut self, destination: &str, options: &SubscribeOptions) -> Result<()>;

    async fn send(&mut self, destination: &str, body: &str, headers: &Headers) -> Result<()>;

    /// Waits for the next message. `None` waits indefinitely.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<RawMessage>;

    async fn acknowledge(&mut self, receipt: &str, headers: &Headers) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_constraints() {
        assert_eq!(Backend::Stomp.default_max_message_size(), None);
        assert_eq!(
            Backend::QueueService.default_max_message_size(),
            Some(8 * 1024)
        );
        assert_eq!(Backend::Stomp.destination_rule(), DestinationRule::FrameSafe);
        assert_eq!(
            Backend::QueueService.destination_rule(),
            DestinationRule::QueueName
        );
    }

    #[test]
    fn test_ack_mode() {
        assert_eq!(AckMode::default(), AckMode::Auto);
        assert!(!AckMode::Auto.requires_ack());
        assert!(AckMode::Client.requires_ack());
        assert!(AckMode::ClientIndividual.requires_ack());
        assert_eq!(AckMode::ClientIndividual.as_str(), "client-individual");
    }
}
