use crate::error::{MqError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings shared by every backend.
///
/// Keys use the camelCase names recognised by [`Config::from_json`]
/// (`retryMax`, `deadLetterQueue`, `deadLetterQueuePrefix`, `reconnectDelay`, ...).
/// Durations are expressed in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    /// Redeliveries allowed before a failed message is dead-lettered.
    pub retry_max: u32,
    /// Single shared DLQ. Wins over `dead_letter_queue_prefix`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_queue_prefix: Option<String>,
    #[serde(with = "seconds")]
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Byte ceiling for outbound bodies; `None` falls back to the backend default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    pub reliable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            login: None,
            passcode: None,
            client_id: None,
            connect_timeout: Duration::from_secs(30),
            retry_max: 0,
            dead_letter_queue: None,
            dead_letter_queue_prefix: None,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            max_message_size: None,
            reliable: true,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn supports_dlq(&self) -> bool {
        self.dead_letter_queue.is_some() || self.dead_letter_queue_prefix.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(MqError::Configuration("host must not be empty".to_string()));
        }
        if self.dead_letter_queue.as_deref() == Some("") {
            return Err(MqError::Configuration(
                "deadLetterQueue must not be empty".to_string(),
            ));
        }
        if self.dead_letter_queue_prefix.as_deref() == Some("") {
            return Err(MqError::Configuration(
                "deadLetterQueuePrefix must not be empty".to_string(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(MqError::Configuration(
                "maxMessageSize must be greater than 0".to_string(),
            ));
        }
        if let (Some(queue), Some(prefix)) = (&self.dead_letter_queue, &self.dead_letter_queue_prefix)
        {
            tracing::warn!(
                dead_letter_queue = %queue,
                dead_letter_queue_prefix = %prefix,
                "both deadLetterQueue and deadLetterQueuePrefix are set; using deadLetterQueue"
            );
        }
        Ok(())
    }
}

mod seconds {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|err| {
            de::Error::custom(format!("invalid number of seconds {secs}: {err}"))
        })
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.config.login = Some(login.into());
        self.config.passcode = Some(passcode.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn retry_max(mut self, retry_max: u32) -> Self {
        self.config.retry_max = retry_max;
        self
    }

    pub fn dead_letter_queue(mut self, queue: impl Into<String>) -> Self {
        self.config.dead_letter_queue = Some(queue.into());
        self
    }

    pub fn dead_letter_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.dead_letter_queue_prefix = Some(prefix.into());
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay = Duration::from_millis(ms);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = Some(bytes);
        self
    }

    pub fn reliable(mut self, reliable: bool) -> Self {
        self.config.reliable = reliable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 61613);
        assert_eq!(config.retry_max, 0);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert!(config.reliable);
        assert!(config.max_message_size.is_none());
        assert!(!config.supports_dlq());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .host("broker.example.com")
            .port(61614)
            .credentials("guest", "secret")
            .client_id("cid")
            .retry_max(4)
            .dead_letter_queue("/queue/dlq")
            .reconnect_delay(Duration::from_secs(1))
            .max_message_size(10 * 1024)
            .reliable(false)
            .build();

        assert_eq!(config.host, "broker.example.com");
        assert_eq!(config.port, 61614);
        assert_eq!(config.login.as_deref(), Some("guest"));
        assert_eq!(config.passcode.as_deref(), Some("secret"));
        assert_eq!(config.client_id.as_deref(), Some("cid"));
        assert_eq!(config.retry_max, 4);
        assert_eq!(config.dead_letter_queue.as_deref(), Some("/queue/dlq"));
        assert_eq!(config.max_message_size, Some(10 * 1024));
        assert!(!config.reliable);
        assert!(config.supports_dlq());
    }

    #[test]
    fn test_config_from_json_uses_camel_case_options() {
        let config = Config::from_json(
            r#"{
                "retryMax": 4,
                "deadLetterQueue": "/queue/dlq",
                "deadLetterQueuePrefix": "DLQ.",
                "login": "",
                "passcode": "",
                "host": "localhost",
                "port": 61613,
                "reliable": false,
                "reconnectDelay": 5,
                "clientId": "cid"
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry_max, 4);
        assert_eq!(config.dead_letter_queue.as_deref(), Some("/queue/dlq"));
        assert_eq!(config.dead_letter_queue_prefix.as_deref(), Some("DLQ."));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.client_id.as_deref(), Some("cid"));
        assert!(!config.reliable);
        assert!(config.supports_dlq());
        // Unspecified keys keep their defaults
        assert_eq!(config.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_config_from_json_fractional_delay() {
        let config = Config::from_json(r#"{"reconnectDelay": 0.25}"#).unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_config_from_json_rejects_negative_delay() {
        let result = Config::from_json(r#"{"reconnectDelay": -1}"#);
        assert!(matches!(result, Err(MqError::Serialization(_))));

        // Too large for a Duration
        let result = Config::from_json(r#"{"reconnectDelay": 1e30}"#);
        assert!(matches!(result, Err(MqError::Serialization(_))));
        let result = Config::from_json(r#"{"connectTimeout": 1e30}"#);
        assert!(matches!(result, Err(MqError::Serialization(_))));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let both = ConfigBuilder::new()
            .dead_letter_queue("/queue/dlq")
            .dead_letter_queue_prefix("DLQ.")
            .build();
        assert!(both.validate().is_ok());

        let empty_dlq = ConfigBuilder::new().dead_letter_queue("").build();
        assert!(matches!(
            empty_dlq.validate(),
            Err(MqError::Configuration(_))
        ));

        let zero_size = ConfigBuilder::new().max_message_size(0).build();
        assert!(matches!(
            zero_size.validate(),
            Err(MqError::Configuration(_))
        ));

        let no_host = ConfigBuilder::new().host("").build();
        assert!(matches!(no_host.validate(), Err(MqError::Configuration(_))));
    }
}
