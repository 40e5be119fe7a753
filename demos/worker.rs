use std::time::Duration;

use mq_client::{
    AckMode, ConfigBuilder, Connection, MqError, SubscribeOptions, UnreceiveOptions,
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ConfigBuilder::new()
        .host("localhost")
        .port(61613)
        .retry_max(3)
        .dead_letter_queue_prefix("DLQ.")
        .reconnect_delay(Duration::from_secs(2))
        .build();

    let mut connection = Connection::stomp(config).await?;
    connection
        .subscribe("/queue/work", SubscribeOptions::default().ack(AckMode::Client))
        .await?;

    tracing::info!("worker started, polling /queue/work");

    loop {
        match connection.receive(Some(Duration::from_secs(5))).await {
            Ok(envelope) => match process_message(&envelope.body).await {
                Ok(()) => {
                    tracing::info!(body = %envelope.body, "processed");
                    connection.acknowledge(&envelope, AckMode::Client).await?;
                }
                Err(reason) => {
                    tracing::warn!(
                        %reason,
                        attempt = envelope.retry_count() + 1,
                        "processing failed"
                    );
                    let decision = connection
                        .unreceive(&envelope, UnreceiveOptions::default().ack(AckMode::Client))
                        .await?;
                    tracing::info!(?decision, "message handed back");
                }
            },
            Err(MqError::Timeout(_)) => {
                tracing::debug!("no messages available");
            }
            Err(err) => {
                tracing::error!(error = %err, "worker stopping");
                return Err(err.into());
            }
        }
    }
}

async fn process_message(body: &str) -> Result<(), String> {
    sleep(Duration::from_millis(100)).await;

    if body.contains("error") {
        Err("message contains 'error'".to_string())
    } else {
        Ok(())
    }
}
