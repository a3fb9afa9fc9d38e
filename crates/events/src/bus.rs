//! In-process message bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries every topic on one channel; subscribers filter by
//! [`Message::topic`]. It is designed to be shared via `Arc<EventBus>`.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::channel::{ChannelError, MessageChannel};

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus.
pub struct EventBus {
    sender: broadcast::Sender<Message>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`. Sagas whose
    /// messages were dropped are picked up again by the stalled-saga sweep.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently when nobody is
    /// subscribed.
    pub fn send(&self, message: Message) {
        let _ = self.sender.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageChannel for EventBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        self.send(Message {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gdc_core::saga::EventOutcome;

    use super::*;
    use crate::channel::publish_event;
    use crate::event::{topics, Event};

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = Event::reply(uuid::Uuid::nil(), EventOutcome::StudentNotFound, serde_json::Value::Null);
        publish_event(&bus, topics::SAGA_REPLY, &event).await.unwrap();

        let received = rx.recv().await.expect("should receive the message");
        assert_eq!(received.topic, topics::SAGA_REPLY);
        assert_eq!(Event::from_bytes(&received.payload).unwrap(), event);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(topics::VALIDATE_STUDENT, b"{}".to_vec()).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().topic, topics::VALIDATE_STUDENT);
        assert_eq!(rx2.recv().await.unwrap().topic, topics::VALIDATE_STUDENT);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_ok() {
        let bus = EventBus::default();
        assert!(bus.publish("orphan", Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn slow_receiver_observes_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..3 {
            bus.send(Message {
                topic: "t".into(),
                payload: Vec::new(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
