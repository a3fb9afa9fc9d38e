//! Saga messaging for GRAD data collection.
//!
//! - [`Event`] is the envelope every saga message travels in.
//! - [`MessageChannel`] is the `publish(topic, bytes)` seam the pipeline
//!   talks to.
//! - [`EventBus`] is the in-process broadcast implementation.
//! - [`HttpBroker`] publishes to an external broker over HTTP, and
//!   [`BrokerForwarder`] mirrors bus traffic onto it.

pub mod broker;
pub mod bus;
pub mod channel;
pub mod event;

pub use broker::{BrokerForwarder, HttpBroker};
pub use bus::{EventBus, Message};
pub use channel::{publish_event, ChannelError, MessageChannel};
pub use event::{topics, Event};
