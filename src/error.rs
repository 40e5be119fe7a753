use crate::reconnect::LinkState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("Invalid destination '{destination}': {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("Message too large: {size} bytes (max: {max})")]
    SizeExceeded { size: usize, max: usize },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error after {0}ms")]
    Timeout(u64),

    #[error("Dead-letter routing to '{destination}' failed: {reason}")]
    DlqRoutingFailed { destination: String, reason: String },

    #[error("Reconnect attempts exhausted ({attempts}): {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    #[error("Connection is {0}")]
    NotConnected(LinkState),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MqError {
    /// Errors that mean the link to the backend is broken and a reconnect may help.
    ///
    /// Timeouts are deliberately excluded: an empty queue is not a broken link.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, MqError::Connection(_) | MqError::Io(_))
    }

    /// Caller-input errors detected before any I/O.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            MqError::InvalidDestination { .. }
                | MqError::SizeExceeded { .. }
                | MqError::Configuration(_)
        )
    }

    pub(crate) fn invalid_destination(destination: &str, reason: impl Into<String>) -> Self {
        MqError::InvalidDestination {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MqError>;
