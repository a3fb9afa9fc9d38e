//! The message channel seam.

use async_trait::async_trait;

use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Network, DNS or timeout failure talking to the broker.
    #[error("Broker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Broker returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    /// Worth another publish attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::HttpStatus(code) => *code == 429 || *code >= 500,
            Self::Encode(_) | Self::Closed => false,
        }
    }
}

/// Fire-and-forget publish of raw bytes onto a topic.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ChannelError>;
}

/// Encode `event` and publish it on `topic`.
pub async fn publish_event(channel: &dyn MessageChannel, topic: &str, event: &Event) -> Result<(), ChannelError> {
    let bytes = event.to_bytes()?;
    channel.publish(topic, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(ChannelError::HttpStatus(503).is_transient());
        assert!(ChannelError::HttpStatus(429).is_transient());
        assert!(!ChannelError::HttpStatus(400).is_transient());
        assert!(!ChannelError::Closed.is_transient());
    }

    #[test]
    fn http_status_display() {
        assert_eq!(ChannelError::HttpStatus(502).to_string(), "Broker returned HTTP 502");
    }
}
