//! Typed publish/subscribe for Peril.
//!
//! Three operations sit on top of a broker [`Connection`]:
//!
//! - [`declare_and_bind`] declares a queue with a [`QueuePolicy`] and the
//!   shared dead-letter argument, then binds it.
//! - [`publish`] encodes a value with a [`Codec`] and publishes it.
//! - [`subscribe`] / [`Subscription`] consume a queue on a background task,
//!   decode each delivery and settle it according to the [`AckType`] the
//!   handler returns.
//!
//! ```ignore
//! let handle = subscribe_json(
//!     &conn,
//!     routing::EXCHANGE_PERIL_DIRECT,
//!     &routing::pause_queue("ada"),
//!     routing::PAUSE_KEY,
//!     QueuePolicy::Transient,
//!     |state: PlayingState| async move {
//!         println!("paused: {}", state.is_paused);
//!         AckType::Ack
//!     },
//! )
//! .await?;
//! ```
//!
//! [`Connection`]: peril_broker::Connection
//! [`Codec`]: peril_protocol::Codec

mod ack;
mod error;
mod publisher;
mod resubscribe;
mod subscriber;
mod topology;

pub use ack::AckType;
pub use error::{PubSubError, TopologyStage};
pub use publisher::{publish, publish_bincode, publish_json};
pub use resubscribe::ResubscribeConfig;
pub use subscriber::{
    DecodeFailure, Handler, Subscription, SubscriptionHandle, subscribe, subscribe_bincode,
    subscribe_json,
};
pub use topology::{
    DEAD_LETTER_EXCHANGE, QueuePolicy, declare_and_bind, declare_dead_letter_queue,
    queue_arguments,
};
