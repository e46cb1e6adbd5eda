//! Broker abstraction layer for Peril.
//!
//! Provides the [`Connection`], [`Channel`], and [`Delivery`] traits that
//! the pub/sub layer is written against. They follow the AMQP 0-9-1 model:
//! a connection opens channels, a channel declares and binds queues,
//! publishes, and consumes, and every consumed delivery is settled with
//! exactly one ack or nack.
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryBroker`], an in-process broker with topic,
//!   direct, and fanout exchanges, manual acknowledgement, requeue, and
//!   dead-letter routing.
//! - `amqp`: [`AmqpConnection`], a network backend for RabbitMQ and other
//!   AMQP 0-9-1 brokers, built on `lapin`.

#[cfg(feature = "amqp")]
mod amqp;
mod error;
#[cfg(feature = "memory")]
mod memory;
mod pattern;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection, AmqpConsumer, AmqpDelivery};
pub use error::BrokerError;
#[cfg(feature = "memory")]
pub use memory::{
    AckRecord, Disposition, MemoryBroker, MemoryChannel, MemoryConnection, MemoryConsumer,
    MemoryDelivery, QueueSnapshot,
};
pub use pattern::topic_matches;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use futures_util::Stream;

/// Queue argument naming the exchange that receives rejected messages.
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// How an exchange picks queues for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Binding key must equal the routing key.
    Direct,
    /// Binding key is a `.`-segmented pattern; see [`topic_matches`].
    Topic,
    /// Every bound queue gets every message.
    Fanout,
}

impl ExchangeKind {
    /// Returns `true` if a queue bound with `binding_key` should receive a
    /// message published with `routing_key`.
    pub fn routes(self, binding_key: &str, routing_key: &str) -> bool {
        match self {
            Self::Direct => binding_key == routing_key,
            Self::Topic => topic_matches(binding_key, routing_key),
            Self::Fanout => true,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        })
    }
}

/// A value in an AMQP field table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Queue arguments (`x-dead-letter-exchange`, ...).
pub type FieldTable = BTreeMap<String, FieldValue>;

/// The three flags that decide a queue's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    /// Usable only by the declaring connection; deleted when it closes.
    pub exclusive: bool,
}

/// What the broker reports back from a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Message properties carried alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub content_type: Option<String>,
}

impl Properties {
    pub fn with_content_type(content_type: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
        }
    }
}

/// Opaque identifier for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Creates a new `ChannelId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// An open connection to a broker. Owned by the application; the pub/sub
/// layer only borrows it to open channels.
pub trait Connection: Send + Sync + 'static {
    /// The channel type this connection opens.
    type Channel: Channel;

    /// Opens a new channel.
    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;
}

/// A channel on a connection.
///
/// All methods return `Send` futures so generic code can drive them from
/// a spawned task.
pub trait Channel: Send + Sync + 'static {
    /// The delivery type produced by this channel's consumers.
    type Delivery: Delivery;
    /// The stream of deliveries for one consumer. Ends when the channel or
    /// connection closes.
    type Consumer: Stream<Item = Self::Delivery> + Send + Unpin + 'static;

    /// Returns the unique identifier for this channel.
    fn id(&self) -> ChannelId;

    /// Declares a queue, or checks an existing one has the same options and
    /// arguments. An empty name asks the broker to generate one.
    fn queue_declare(
        &self,
        queue: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<QueueInfo, BrokerError>> + Send;

    /// Binds a queue to an exchange. Binding twice with the same key is a
    /// no-op.
    fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Starts a manual-ack consumer on a queue.
    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = Result<Self::Consumer, BrokerError>> + Send;

    /// Publishes a message. Unroutable messages are dropped.
    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Closes the channel. Unacknowledged deliveries return to their queues.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A message handed to a consumer.
///
/// `ack` and `nack` take `self`, so a delivery can be settled at most
/// once.
pub trait Delivery: Send + 'static {
    fn delivery_tag(&self) -> u64;

    fn body(&self) -> &[u8];

    fn properties(&self) -> &Properties;

    fn exchange(&self) -> &str;

    fn routing_key(&self) -> &str;

    /// `true` if this message was delivered before and returned to the
    /// queue.
    fn redelivered(&self) -> bool;

    /// Positive acknowledgement for this delivery only.
    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Negative acknowledgement for this delivery only. With
    /// `requeue = false` the broker dead-letters or drops the message.
    fn nack(self, requeue: bool) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_new_and_into_inner() {
        let id = ChannelId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_channel_id_display() {
        assert_eq!(ChannelId::new(7).to_string(), "ch-7");
    }

    #[test]
    fn test_direct_routes_exact_key_only() {
        assert!(ExchangeKind::Direct.routes("pause", "pause"));
        assert!(!ExchangeKind::Direct.routes("pause", "pause.ada"));
        assert!(!ExchangeKind::Direct.routes("*", "pause"));
    }

    #[test]
    fn test_fanout_ignores_keys() {
        assert!(ExchangeKind::Fanout.routes("", "army_moves.ada"));
    }

    #[test]
    fn test_exchange_kind_display() {
        assert_eq!(ExchangeKind::Topic.to_string(), "topic");
    }

    #[test]
    fn test_default_queue_options_are_all_false() {
        let opts = QueueOptions::default();
        assert!(!opts.durable && !opts.auto_delete && !opts.exclusive);
    }
}
