use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dead_letter::DeadLetterRouter;
use crate::error::{MqError, Result};
use crate::message::{Envelope, Headers};
use crate::reconnect::{LinkState, ReconnectSupervisor};
use crate::redelivery::{Decision, RedeliveryTracker};
use crate::transport::{AckMode, StompTransport, SubscribeOptions, Transport};
use crate::validation::{DestinationRule, SizePolicy};

/// How `unreceive` finishes with a failed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreceiveOptions {
    /// Ack mode of the subscription the message arrived on.
    pub ack: AckMode,
    /// Overrides the envelope's destination as the retry target and the base of
    /// a prefixed DLQ name.
    pub destination: Option<String>,
}

impl UnreceiveOptions {
    pub fn ack(mut self, ack: AckMode) -> Self {
        self.ack = ack;
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// One client connection to a queue backend.
///
/// `Connection` is the single entry point for application code. It validates
/// outbound messages against the backend's constraints, records subscriptions so
/// they survive reconnects, and runs the redelivery / dead-letter protocol when
/// the application gives a message back with [`unreceive`](Connection::unreceive).
///
/// Every operation takes `&mut self`: a connection belongs to one worker. When the
/// transport fails and the connection is reliable, the failing call reconnects
/// inline (sleeping `reconnect_delay` between attempts) and then retries itself.
///
/// # Examples
///
/// ```no_run
/// use mq_client::{AckMode, Connection, ConfigBuilder, SubscribeOptions, UnreceiveOptions};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), mq_client::MqError> {
///     let config = ConfigBuilder::new()
///         .host("localhost")
///         .port(61613)
///         .retry_max(4)
///         .dead_letter_queue("/queue/dlq")
///         .build();
///     let mut connection = Connection::stomp(config).await?;
///
///     connection
///         .subscribe("/queue/orders", SubscribeOptions::default().ack(AckMode::Client))
///         .await?;
///     connection.send("/queue/orders", "order 42", Default::default()).await?;
///
///     let envelope = connection.receive(Some(Duration::from_secs(5))).await?;
///     if envelope.body.is_empty() {
///         connection
///             .unreceive(&envelope, UnreceiveOptions::default().ack(AckMode::Client))
///             .await?;
///     } else {
///         connection.acknowledge(&envelope, AckMode::Client).await?;
///     }
///
///     connection.disconnect().await
/// }
/// ```
pub struct Connection<T: Transport> {
    config: Config,
    transport: T,
    supervisor: ReconnectSupervisor,
    tracker: RedeliveryTracker,
    dead_letter: Option<DeadLetterRouter>,
    size_policy: SizePolicy,
    destination_rule: DestinationRule,
    subscriptions: BTreeMap<String, SubscribeOptions>,
}

impl Connection<StompTransport> {
    /// Connects to the STOMP broker named by `config`.
    pub async fn stomp(config: Config) -> Result<Self> {
        let transport = StompTransport::from_config(&config);
        Self::connect(config, transport).await
    }
}

impl<T: Transport> Connection<T> {
    pub async fn connect(config: Config, transport: T) -> Result<Self> {
        config.validate()?;

        let backend = transport.backend();
        let dead_letter_target = config
            .dead_letter_queue
            .as_deref()
            .or(config.dead_letter_queue_prefix.as_deref());
        if let Some(target) = dead_letter_target {
            backend.destination_rule().validate(target).map_err(|err| {
                MqError::Configuration(format!("dead-letter queue unusable on {backend:?}: {err}"))
            })?;
        }
        let mut connection = Self {
            supervisor: ReconnectSupervisor::new(
                config.reconnect_delay,
                config.max_reconnect_attempts,
            ),
            tracker: RedeliveryTracker::from_config(&config),
            dead_letter: DeadLetterRouter::from_config(&config),
            size_policy: SizePolicy::new(
                config.max_message_size.or(backend.default_max_message_size()),
            ),
            destination_rule: backend.destination_rule(),
            subscriptions: BTreeMap::new(),
            config,
            transport,
        };

        connection.supervisor.connecting();
        if let Err(err) = connection.transport.open().await {
            connection.recover(err).await?;
        }
        connection.supervisor.connected();
        connection.supervisor.operation_succeeded();
        info!(?backend, "connected");

        Ok(connection)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.supervisor.state()
    }

    pub fn supports_dlq(&self) -> bool {
        self.dead_letter.is_some()
    }

    pub fn max_message_size(&self) -> Option<usize> {
        self.size_policy.max()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn subscribe(&mut self, destination: &str, options: SubscribeOptions) -> Result<()> {
        self.ensure_connected()?;
        self.destination_rule.validate(destination)?;

        loop {
            match self.transport.subscribe(destination, &options).await {
                Ok(()) => break,
                Err(err) => self.recover(err).await?,
            }
        }
        self.supervisor.operation_succeeded();
        self.subscriptions.insert(destination.to_string(), options);
        debug!("subscribed");
        Ok(())
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn unsubscribe(&mut self, destination: &str, options: SubscribeOptions) -> Result<()> {
        self.ensure_connected()?;
        // Dropped first so a reconnect below does not resurrect it
        self.subscriptions.remove(destination);

        loop {
            match self.transport.unsubscribe(destination, &options).await {
                Ok(()) => break,
                Err(err) => self.recover(err).await?,
            }
        }
        self.supervisor.operation_succeeded();
        debug!("unsubscribed");
        Ok(())
    }

    /// Sends `body` to `destination`. The name and size checks run before any I/O.
    #[tracing::instrument(skip(self, body, headers))]
    pub async fn send(
        &mut self,
        destination: &str,
        body: impl Into<String>,
        headers: Headers,
    ) -> Result<()> {
        let body = body.into();
        self.ensure_connected()?;
        self.destination_rule.validate(destination)?;
        self.size_policy.validate(&body)?;

        self.deliver(destination, &body, &headers).await
    }

    /// Waits for the next message. `None` waits indefinitely.
    ///
    /// An expired `timeout` is reported as [`MqError::Timeout`] and leaves the
    /// link alone; only transport failures start a reconnect.
    #[tracing::instrument(skip(self))]
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<Envelope> {
        self.ensure_connected()?;

        loop {
            match self.transport.receive(timeout).await {
                Ok(raw) => {
                    self.supervisor.operation_succeeded();
                    let envelope = Envelope::from_raw(raw);
                    debug!(
                        destination = %envelope.destination,
                        retry_count = envelope.retry_count(),
                        "received"
                    );
                    return Ok(envelope);
                }
                Err(err) => self.recover(err).await?,
            }
        }
    }

    /// Confirms successful processing. A no-op for `AckMode::Auto`.
    #[tracing::instrument(skip_all, fields(receipt = ?envelope.receipt))]
    pub async fn acknowledge(&mut self, envelope: &Envelope, ack: AckMode) -> Result<()> {
        self.ensure_connected()?;
        if !ack.requires_ack() {
            return Ok(());
        }
        let Some(receipt) = envelope.receipt.as_deref() else {
            debug!("no receipt to acknowledge");
            return Ok(());
        };

        match self.transport.acknowledge(receipt, &envelope.ack_headers()).await {
            Ok(()) => {
                self.supervisor.operation_succeeded();
                Ok(())
            }
            Err(err) => {
                // Receipts belong to the broker session, so the ack is not replayed
                // on a new one. The broker redelivers the message instead.
                let reason = err.to_string();
                self.recover(err).await?;
                Err(MqError::Connection(format!(
                    "acknowledgment lost to reconnect: {reason}"
                )))
            }
        }
    }

    /// Hands back a message the application failed to process.
    ///
    /// With a DLQ configured, the message is resent to its destination with the
    /// retry count incremented until `retry_max` is reached, then parked on the
    /// DLQ. Without one, nothing is resent. In every case the original delivery is
    /// then acknowledged according to `options.ack`, except when the DLQ resend
    /// fails: the original is left unacknowledged and
    /// [`MqError::DlqRoutingFailed`] is returned.
    #[tracing::instrument(
        skip_all,
        fields(destination = %envelope.destination, retry_count = envelope.retry_count())
    )]
    pub async fn unreceive(
        &mut self,
        envelope: &Envelope,
        options: UnreceiveOptions,
    ) -> Result<Decision> {
        self.ensure_connected()?;
        let original = options
            .destination
            .clone()
            .unwrap_or_else(|| envelope.destination.clone());

        let decision = self.tracker.decide(envelope);
        match decision {
            Decision::Accept => debug!("no dead-letter queue configured, not resending"),
            Decision::Retry => {
                let headers = envelope.retry_headers();
                self.deliver(&original, &envelope.body, &headers).await?;
                info!(
                    attempt = envelope.retry_count() + 1,
                    retry_max = self.config.retry_max,
                    "message returned for redelivery"
                );
            }
            Decision::RouteToDlq => self.route_to_dlq(envelope, &original).await?,
        }

        self.acknowledge(envelope, options.ack).await?;
        Ok(decision)
    }

    /// Closes the transport. Calling it again is harmless.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.state() {
            LinkState::Disconnected => return Ok(()),
            LinkState::Failed => {}
            _ => info!("disconnecting"),
        }
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, "transport close failed");
        }
        self.subscriptions.clear();
        if self.state() != LinkState::Failed {
            self.supervisor.disconnected();
        }
        Ok(())
    }

    async fn route_to_dlq(&mut self, envelope: &Envelope, original: &str) -> Result<()> {
        let Some(router) = &self.dead_letter else {
            return Ok(());
        };
        let (destination, headers) = router.route(envelope, original);

        let delivered = match self.destination_rule.validate(&destination) {
            Ok(()) => self.deliver(&destination, &envelope.body, &headers).await,
            Err(err) => Err(err),
        };
        match delivered {
            Ok(()) => {
                warn!(
                    dlq = %destination,
                    retry_count = envelope.retry_count(),
                    "message moved to dead-letter queue"
                );
                Ok(())
            }
            Err(err) => {
                error!(dlq = %destination, error = %err, "dead-letter routing failed");
                Err(MqError::DlqRoutingFailed {
                    destination,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn deliver(&mut self, destination: &str, body: &str, headers: &Headers) -> Result<()> {
        loop {
            match self.transport.send(destination, body, headers).await {
                Ok(()) => {
                    self.supervisor.operation_succeeded();
                    return Ok(());
                }
                Err(err) => self.recover(err).await?,
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            LinkState::Connected => Ok(()),
            state => Err(MqError::NotConnected(state)),
        }
    }

    /// Gets the link back after `err`, or returns the error to surface.
    ///
    /// Anything but a transport failure is returned untouched. On an unreliable
    /// connection a transport failure is fatal. Otherwise the transport is
    /// reopened and every recorded subscription replayed, within the
    /// supervisor's attempt budget.
    async fn recover(&mut self, err: MqError) -> Result<()> {
        if !err.is_transport_failure() {
            return Err(err);
        }

        self.supervisor.record_failure();
        if !self.config.reliable {
            self.supervisor.fail();
            error!(error = %err, "transport failure on unreliable connection");
            return Err(err);
        }

        warn!(error = %err, "transport failure, reconnecting");
        let mut last_error = err;
        loop {
            if let Err(err) = self.transport.close().await {
                debug!(error = %err, "close before reconnect failed");
            }

            let attempt = match self.supervisor.next_attempt(&last_error).await {
                Ok(attempt) => attempt,
                Err(exhausted) => {
                    error!(error = %exhausted, "giving up on reconnect");
                    return Err(exhausted);
                }
            };

            match self.reopen().await {
                Ok(()) => {
                    self.supervisor.connected();
                    info!(
                        attempt,
                        subscriptions = self.subscriptions.len(),
                        "reconnected"
                    );
                    return Ok(());
                }
                Err(err) if err.is_transport_failure() => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    last_error = err;
                }
                Err(err) => {
                    self.supervisor.fail();
                    error!(error = %err, "reconnect failed");
                    return Err(err);
                }
            }
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        self.transport.open().await?;
        for (destination, options) in &self.subscriptions {
            self.transport.subscribe(destination, options).await?;
        }
        Ok(())
    }
}
