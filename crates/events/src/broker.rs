//! HTTP broker channel.
//!
//! [`HttpBroker`] POSTs each message to `{base_url}/topics/{topic}`. It makes
//! exactly one attempt per call; the saga layer owns the retry policy.
//! [`BrokerForwarder`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and mirrors every message onto the broker for external consumers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::Message;
use crate::channel::{ChannelError, MessageChannel};

/// HTTP request timeout for a single publish attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpBroker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBroker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{topic}", self.base_url)
    }
}

#[async_trait]
impl MessageChannel for HttpBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.topic_url(topic))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChannelError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Background service that mirrors bus traffic onto a broker.
pub struct BrokerForwarder;

impl BrokerForwarder {
    /// Forward every received message until the bus closes or `cancel`
    /// fires. Failed forwards are logged and dropped.
    pub async fn run(
        broker: HttpBroker,
        mut receiver: broadcast::Receiver<Message>,
        cancel: CancellationToken,
    ) {
        tracing::info!(base_url = %broker.base_url, "Broker forwarder started");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match received {
                Ok(message) => {
                    if let Err(e) = broker.publish(&message.topic, message.payload).await {
                        tracing::error!(
                            error = %e,
                            topic = %message.topic,
                            "Failed to forward message to broker"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Broker forwarder lagged, some messages were not forwarded");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed");
                    break;
                }
            }
        }
        tracing::info!("Broker forwarder stopped");
    }
}
