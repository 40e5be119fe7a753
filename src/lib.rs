//! # mq-client
//!
//! One connection interface over heterogeneous message-queue backends (a STOMP
//! broker, an SQS-style queue service), with the reliability layer that sits above
//! them: bounded redelivery, dead-letter routing, reconnects and backend-specific
//! validation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mq_client::{Connection, ConfigBuilder, SubscribeOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new()
//!         .host("localhost")
//!         .port(61613)
//!         .retry_max(4)
//!         .dead_letter_queue_prefix("DLQ.")
//!         .build();
//!     let mut connection = Connection::stomp(config).await?;
//!
//!     connection.subscribe("/queue/orders", SubscribeOptions::default()).await?;
//!     connection.send("/queue/orders", "Hello!", Default::default()).await?;
//!
//!     let envelope = connection.receive(Some(Duration::from_secs(5))).await?;
//!     println!("{} (delivery #{})", envelope.body, envelope.retry_count() + 1);
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Pluggable transports** - anything implementing [`Transport`]; STOMP and an
//!   in-memory loopback ship with the crate
//! - **Redelivery** - [`Connection::unreceive`] resends a failed message with an
//!   incremented retry count until `retry_max`
//! - **Dead-letter queues** - a fixed DLQ or a per-queue prefix (`/queue/DLQ.orders`)
//! - **Reconnects** - fixed delay, bounded attempts, subscriptions replayed
//! - **Validation** - destination names and message sizes checked before any I/O
//! - **Timeouts** - reported apart from connection errors, never trigger a reconnect
//!
//! ## Configuration
//!
//! [`Config`] can be built with [`ConfigBuilder`] or read from JSON using the
//! camelCase option names:
//!
//! ```
//! use mq_client::Config;
//!
//! let config = Config::from_json(r#"{"retryMax": 4, "deadLetterQueue": "/queue/dlq", "reconnectDelay": 1}"#)?;
//! assert!(config.supports_dlq());
//! # Ok::<(), mq_client::MqError>(())
//! ```

pub mod config;
pub mod connection;
pub mod dead_letter;
pub mod error;
pub mod message;
pub mod reconnect;
pub mod redelivery;
pub mod transport;
pub mod validation;

pub use config::{Config, ConfigBuilder};
pub use connection::{Connection, UnreceiveOptions};
pub use dead_letter::{add_dlq_prefix, DeadLetterRouter};
pub use error::{MqError, Result};
pub use message::{Envelope, Headers, RawMessage, RETRY_COUNT_HEADER};
pub use reconnect::{LinkState, ReconnectSupervisor};
pub use redelivery::{Decision, RedeliveryTracker};
pub use transport::{
    AckMode, Backend, Fault, InMemoryTransport, Operation, StompTransport, SubscribeOptions,
    Transport,
};
pub use validation::{DestinationRule, SizePolicy};
