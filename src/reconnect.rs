use crate::error::{MqError, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: reconnects were exhausted or the connection is unreliable.
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounded, fixed-delay reconnect bookkeeping for one connection.
///
/// The caller drives the loop: report a failure, then call [`next_attempt`]
/// before each reopen. Attempts accumulate across reconnects and only reset once
/// an operation succeeds, so a backend that accepts connections but fails every
/// request still runs out of attempts.
///
/// Waiting goes through `tokio::time`, so tests can pause the clock instead of
/// sleeping for real.
///
/// [`next_attempt`]: ReconnectSupervisor::next_attempt
#[derive(Debug)]
pub struct ReconnectSupervisor {
    delay: Duration,
    max_attempts: u32,
    state: LinkState,
    attempts: u32,
    last_failure: Option<Instant>,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            state: LinkState::Disconnected,
            attempts: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn connecting(&mut self) {
        self.state = LinkState::Connecting;
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
    }

    pub fn disconnected(&mut self) {
        self.state = LinkState::Disconnected;
    }

    pub fn fail(&mut self) {
        self.state = LinkState::Failed;
    }

    pub fn record_failure(&mut self) {
        self.state = LinkState::Disconnected;
        self.last_failure = Some(Instant::now());
    }

    pub fn operation_succeeded(&mut self) {
        self.attempts = 0;
    }

    /// Waits out the reconnect delay and returns the attempt number, or fails
    /// with [`MqError::ReconnectExhausted`] once the bound is reached.
    pub async fn next_attempt(&mut self, last_error: &MqError) -> Result<u32> {
        if self.attempts >= self.max_attempts {
            self.state = LinkState::Failed;
            return Err(MqError::ReconnectExhausted {
                attempts: self.attempts,
                last_error: last_error.to_string(),
            });
        }

        self.attempts += 1;
        self.state = LinkState::Connecting;
        sleep(self.delay).await;
        Ok(self.attempts)
    }
}
