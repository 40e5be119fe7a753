use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message headers. Ordered so frames are written deterministically.
pub type Headers = BTreeMap<String, String>;

/// Reserved header carrying the redelivery count on the wire.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
pub const ORIGINAL_MESSAGE_ID_HEADER: &str = "x-original-message-id";
pub const ORIGINAL_TIMESTAMP_HEADER: &str = "x-original-timestamp";
pub const ORIGINAL_DESTINATION_HEADER: &str = "x-original-destination";
pub const TRANSACTION_HEADER: &str = "transaction";

/// Headers owned by the transport; never forwarded on a resend.
const TRANSPORT_HEADERS: &[&str] = &[
    "content-length",
    "content-type",
    "message-id",
    "timestamp",
    "destination",
    "subscription",
    "ack",
    TRANSACTION_HEADER,
];

/// A message exactly as a transport delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub destination: String,
    pub body: String,
    pub headers: Headers,
    /// Backend handle used to acknowledge the delivery (STOMP `message-id`,
    /// SQS receipt handle).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

impl RawMessage {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            headers: Headers::new(),
            receipt: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }
}

/// A received message, normalized independently of the transport it came from.
///
/// The redelivery count is lifted out of the headers into a typed field when the
/// envelope is built, so application code never parses it. Only the redelivery
/// path produces an envelope with a higher count.
///
/// Envelopes serialize with their count so parked messages can be saved and
/// reloaded. Deserializing restores whatever count was stored; treat the JSON
/// as trusted input.
///
/// # Examples
///
/// ```
/// use mq_client::{Envelope, RawMessage};
///
/// let raw = RawMessage::new("/queue/orders", "order 42").header("x-retry-count", "2");
/// let envelope = Envelope::from_raw(raw);
/// assert_eq!(envelope.retry_count(), 2);
/// assert!(!envelope.headers.contains_key("x-retry-count"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub destination: String,
    pub body: String,
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    retry_count: u32,
}

impl Envelope {
    /// Normalizes a transport message. A missing or unreadable retry header counts as 0.
    pub fn from_raw(raw: RawMessage) -> Self {
        let RawMessage {
            destination,
            body,
            mut headers,
            receipt,
        } = raw;

        let retry_count = match headers.remove(RETRY_COUNT_HEADER) {
            None => 0,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    %destination,
                    value = %value,
                    "unreadable retry count header, treating as first delivery"
                );
                0
            }),
        };

        Self {
            destination,
            body,
            headers,
            receipt,
            retry_count,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id").map(String::as_str)
    }

    /// Attaches acknowledgment metadata, e.g. a `transaction` id.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Headers for sending this message back to its queue for another attempt.
    pub(crate) fn retry_headers(&self) -> Headers {
        let mut headers = self.forwardable_headers();
        if let Some(id) = self.headers.get("message-id") {
            headers
                .entry(ORIGINAL_MESSAGE_ID_HEADER.to_string())
                .or_insert_with(|| id.clone());
        }
        if let Some(timestamp) = self.headers.get("timestamp") {
            headers
                .entry(ORIGINAL_TIMESTAMP_HEADER.to_string())
                .or_insert_with(|| timestamp.clone());
        }
        headers.insert(
            RETRY_COUNT_HEADER.to_string(),
            self.retry_count.saturating_add(1).to_string(),
        );
        headers
    }

    /// Headers for parking this message on a dead-letter queue.
    pub(crate) fn dead_letter_headers(&self, original_destination: &str) -> Headers {
        let mut headers = self.forwardable_headers();
        headers.insert(
            ORIGINAL_DESTINATION_HEADER.to_string(),
            original_destination.to_string(),
        );
        headers.insert(RETRY_COUNT_HEADER.to_string(), self.retry_count.to_string());
        headers
    }

    /// Headers to send along with an acknowledgment.
    pub(crate) fn ack_headers(&self) -> Headers {
        self.headers
            .get(TRANSACTION_HEADER)
            .map(|tx| Headers::from([(TRANSACTION_HEADER.to_string(), tx.clone())]))
            .unwrap_or_default()
    }

    fn forwardable_headers(&self) -> Headers {
        self.headers
            .iter()
            .filter(|(key, _)| !TRANSPORT_HEADERS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered(body: &str) -> RawMessage {
        RawMessage::new("/queue/stomp/destination/1", body)
            .header("message-id", "testmessage1")
            .header("content-length", body.len().to_string())
            .header("destination", "/queue/stomp/destination/1")
            .receipt("testmessage1")
    }

    #[test]
    fn test_from_raw_without_retry_header() {
        let envelope = Envelope::from_raw(delivered("mary had a little lamb"));

        assert_eq!(envelope.body, "mary had a little lamb");
        assert_eq!(envelope.destination, "/queue/stomp/destination/1");
        assert_eq!(envelope.retry_count(), 0);
        assert_eq!(envelope.message_id(), Some("testmessage1"));
        assert_eq!(envelope.receipt.as_deref(), Some("testmessage1"));
    }

    #[test]
    fn test_from_raw_lifts_retry_header() {
        let raw = delivered("body").header(RETRY_COUNT_HEADER, "5");
        let envelope = Envelope::from_raw(raw);

        assert_eq!(envelope.retry_count(), 5);
        assert!(!envelope.headers.contains_key(RETRY_COUNT_HEADER));
    }

    #[test]
    fn test_from_raw_unreadable_retry_header() {
        let envelope = Envelope::from_raw(delivered("body").header(RETRY_COUNT_HEADER, "lots"));
        assert_eq!(envelope.retry_count(), 0);

        let envelope = Envelope::from_raw(delivered("body").header(RETRY_COUNT_HEADER, " 3 "));
        assert_eq!(envelope.retry_count(), 3);
    }

    #[test]
    fn test_retry_headers() {
        let raw = delivered("body")
            .header("timestamp", "1700000000")
            .header("priority", "4")
            .header(RETRY_COUNT_HEADER, "1");
        let headers = Envelope::from_raw(raw).retry_headers();

        assert_eq!(headers.get(RETRY_COUNT_HEADER).map(String::as_str), Some("2"));
        assert_eq!(
            headers.get(ORIGINAL_MESSAGE_ID_HEADER).map(String::as_str),
            Some("testmessage1")
        );
        assert_eq!(
            headers.get(ORIGINAL_TIMESTAMP_HEADER).map(String::as_str),
            Some("1700000000")
        );
        assert_eq!(headers.get("priority").map(String::as_str), Some("4"));
        // Transport-managed headers are not forwarded
        assert!(!headers.contains_key("message-id"));
        assert!(!headers.contains_key("timestamp"));
        assert!(!headers.contains_key("content-length"));
        assert!(!headers.contains_key("destination"));
    }

    #[test]
    fn test_retry_headers_keep_first_original_id() {
        let raw = delivered("body")
            .header(ORIGINAL_MESSAGE_ID_HEADER, "first-delivery")
            .header(RETRY_COUNT_HEADER, "2");
        let headers = Envelope::from_raw(raw).retry_headers();

        assert_eq!(
            headers.get(ORIGINAL_MESSAGE_ID_HEADER).map(String::as_str),
            Some("first-delivery")
        );
        assert_eq!(headers.get(RETRY_COUNT_HEADER).map(String::as_str), Some("3"));
    }

    #[test]
    fn test_dead_letter_headers() {
        let raw = delivered("body").header(RETRY_COUNT_HEADER, "5");
        let headers = Envelope::from_raw(raw).dead_letter_headers("/queue/myqueue");

        assert_eq!(
            headers.get(ORIGINAL_DESTINATION_HEADER).map(String::as_str),
            Some("/queue/myqueue")
        );
        assert_eq!(headers.get(RETRY_COUNT_HEADER).map(String::as_str), Some("5"));
        assert!(!headers.contains_key("destination"));
    }

    #[test]
    fn test_annotate_and_ack_headers() {
        let mut envelope = Envelope::from_raw(delivered("body"));
        assert!(envelope.ack_headers().is_empty());

        envelope.annotate(TRANSACTION_HEADER, "test-transaction");
        let ack = envelope.ack_headers();
        assert_eq!(ack.len(), 1);
        assert_eq!(
            ack.get(TRANSACTION_HEADER).map(String::as_str),
            Some("test-transaction")
        );
        // Never forwarded on resend
        assert!(!envelope.retry_headers().contains_key(TRANSACTION_HEADER));
    }

    #[test]
    fn test_envelope_serialization_keeps_retry_count() {
        let envelope = Envelope::from_raw(delivered("poison").header(RETRY_COUNT_HEADER, "7"));

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"retry_count\":7"));
        assert!(json.contains("\"body\":\"poison\""));

        let restored: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, envelope);
    }
}
