use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{MqError, Result};
use crate::message::{Headers, RawMessage};
use crate::transport::{Backend, SubscribeOptions, Transport};

/// Transport operations that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Subscribe,
    Unsubscribe,
    Send,
    Receive,
    Acknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The link drops: the operation fails with a connection error and the
    /// transport stays down until reopened.
    Disconnect,
    /// The operation reports an expired deadline.
    Timeout,
}

#[derive(Default)]
struct State {
    connected: bool,
    subscriptions: BTreeMap<String, SubscribeOptions>,
    inbound: VecDeque<RawMessage>,
    sent: Vec<RawMessage>,
    acknowledged: Vec<String>,
    faults: Vec<(Operation, Fault)>,
    opens: u32,
    closes: u32,
}

impl State {
    fn check(&mut self, operation: Operation, timeout: Option<Duration>) -> Result<()> {
        if let Some(idx) = self.faults.iter().position(|(op, _)| *op == operation) {
            let (_, fault) = self.faults.remove(idx);
            return Err(match fault {
                Fault::Disconnect => {
                    self.drop_link();
                    MqError::Connection(format!("link dropped during {operation:?}"))
                }
                Fault::Timeout => {
                    MqError::Timeout(timeout.map(|t| t.as_millis() as u64).unwrap_or(0))
                }
            });
        }
        if operation != Operation::Open && !self.connected {
            return Err(MqError::Connection("transport is not open".to_string()));
        }
        Ok(())
    }

    fn drop_link(&mut self) {
        self.connected = false;
        self.subscriptions.clear();
    }

    fn deliver(&mut self, mut message: RawMessage) {
        if message.receipt.is_none() {
            let id = Uuid::now_v7().to_string();
            message.headers.insert("message-id".to_string(), id.clone());
            message.receipt = Some(id);
        }
        message
            .headers
            .insert("destination".to_string(), message.destination.clone());
        self.inbound.push_back(message);
    }
}

struct Shared {
    state: Mutex<State>,
    arrivals: Notify,
}

/// Loopback transport for tests and local pipelines.
///
/// Messages sent to a subscribed destination are delivered back to `receive`.
/// Every send and acknowledgment is recorded. Clones share state, so a test can
/// keep a handle while a [`Connection`](crate::Connection) owns another, and
/// inject faults into upcoming operations.
///
/// Closing the transport forgets broker-side subscriptions, the way a real
/// broker does when a session ends.
#[derive(Clone)]
pub struct InMemoryTransport {
    backend: Backend,
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    /// Queues a message as if the broker had delivered it.
    pub async fn push(&self, message: RawMessage) {
        self.shared.state.lock().await.deliver(message);
        self.shared.arrivals.notify_waiters();
    }

    /// Makes the next `times` calls of `operation` fail with `fault`.
    pub async fn inject(&self, operation: Operation, fault: Fault, times: usize) {
        let mut state = self.shared.state.lock().await;
        state
            .faults
            .extend(std::iter::repeat((operation, fault)).take(times));
    }

    /// Drops the link without a fault on any particular operation.
    pub async fn sever(&self) {
        self.shared.state.lock().await.drop_link();
    }

    pub async fn sent(&self) -> Vec<RawMessage> {
        self.shared.state.lock().await.sent.clone()
    }

    pub async fn sent_to(&self, destination: &str) -> Vec<RawMessage> {
        self.shared
            .state
            .lock()
            .await
            .sent
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }

    pub async fn acknowledged(&self) -> Vec<String> {
        self.shared.state.lock().await.acknowledged.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .await
            .subscriptions
            .keys()
            .cloned()
            .collect()
    }

    pub async fn pending(&self) -> usize {
        self.shared.state.lock().await.inbound.len()
    }

    pub async fn is_open(&self) -> bool {
        self.shared.state.lock().await.connected
    }

    pub async fn opens(&self) -> u32 {
        self.shared.state.lock().await.opens
    }

    pub async fn closes(&self) -> u32 {
        self.shared.state.lock().await.closes
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(Backend::Stomp)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn open(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.check(Operation::Open, None)?;
        state.connected = true;
        state.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.drop_link();
        state.closes += 1;
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str, options: &SubscribeOptions) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.check(Operation::Subscribe, None)?;
        state
            .subscriptions
            .insert(destination.to_string(), options.clone());
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str, _options: &SubscribeOptions) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.check(Operation::Unsubscribe, None)?;
        state.subscriptions.remove(destination);
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(destination = %destination))]
    async fn send(&mut self, destination: &str, body: &str, headers: &Headers) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.check(Operation::Send, None)?;

        let message = RawMessage {
            destination: destination.to_string(),
            body: body.to_string(),
            headers: headers.clone(),
            receipt: None,
        };
        state.sent.push(message.clone());
        tracing::debug!(bytes = body.len(), "message sent to in-memory queue");

        if state.subscriptions.contains_key(destination) {
            state.deliver(message);
            drop(state);
            self.shared.arrivals.notify_waiters();
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Option<Duration>) -> Result<RawMessage> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Registered before checking so a push between the check and the
            // wait is not missed.
            let arrival = self.shared.arrivals.notified();
            {
                let mut state = self.shared.state.lock().await;
                state.check(Operation::Receive, timeout)?;
                if let Some(message) = state.inbound.pop_front() {
                    return Ok(message);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                        let waited = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
                        return Err(MqError::Timeout(waited));
                    }
                }
                None => arrival.await,
            }
        }
    }

    async fn acknowledge(&mut self, receipt: &str, _headers: &Headers) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.check(Operation::Acknowledge, None)?;
        state.acknowledged.push(receipt.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_transport() -> InMemoryTransport {
        let mut transport = InMemoryTransport::default();
        transport.open().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_send_records_and_loops_back_to_subscribers() {
        let mut transport = open_transport().await;
        transport
            .subscribe("/queue/a", &SubscribeOptions::default())
            .await
            .unwrap();

        transport
            .send("/queue/a", "hello", &Headers::new())
            .await
            .unwrap();
        transport
            .send("/queue/unsubscribed", "ignored", &Headers::new())
            .await
            .unwrap();

        assert_eq!(transport.sent().await.len(), 2);
        assert_eq!(transport.pending().await, 1);

        let message = transport
            .receive(Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(message.body, "hello");
        assert_eq!(message.destination, "/queue/a");
        assert!(message.receipt.is_some());
        assert_eq!(
            message.headers.get("message-id"),
            message.receipt.as_ref()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_when_empty() {
        let mut transport = open_transport().await;

        let result = transport.receive(Some(Duration::from_millis(250))).await;
        assert!(matches!(result, Err(MqError::Timeout(250))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_on_push() {
        let transport = open_transport().await;
        let mut receiver = transport.clone();

        let pending = tokio::spawn(async move { receiver.receive(None).await });
        tokio::task::yield_now().await;
        transport.push(RawMessage::new("/queue/a", "late")).await;

        let message = pending.await.unwrap().unwrap();
        assert_eq!(message.body, "late");
    }

    #[tokio::test]
    async fn test_injected_disconnect_drops_link() {
        let mut transport = open_transport().await;
        transport
            .subscribe("/queue/a", &SubscribeOptions::default())
            .await
            .unwrap();
        transport.inject(Operation::Send, Fault::Disconnect, 1).await;

        let result = transport.send("/queue/a", "x", &Headers::new()).await;
        assert!(matches!(result, Err(MqError::Connection(_))));
        assert!(!transport.is_open().await);
        assert!(transport.subscriptions().await.is_empty());

        // Still down until reopened
        let result = transport.send("/queue/a", "x", &Headers::new()).await;
        assert!(matches!(result, Err(MqError::Connection(_))));

        transport.open().await.unwrap();
        transport.send("/queue/a", "x", &Headers::new()).await.unwrap();
        assert_eq!(transport.opens().await, 2);
    }

    #[tokio::test]
    async fn test_injected_open_failures_are_consumed_in_order() {
        let mut transport = InMemoryTransport::default();
        transport.inject(Operation::Open, Fault::Disconnect, 2).await;

        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert!(transport.is_open().await);
    }

    #[tokio::test]
    async fn test_acknowledge_records_receipt() {
        let mut transport = open_transport().await;
        transport.acknowledge("receipt-1", &Headers::new()).await.unwrap();
        assert_eq!(transport.acknowledged().await, vec!["receipt-1".to_string()]);
    }
}
