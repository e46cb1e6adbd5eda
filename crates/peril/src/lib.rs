//! # Peril
//!
//! Messaging for the Peril strategy game.
//!
//! Game clients and the server never talk to each other directly: they
//! publish typed messages to broker exchanges and consume them from
//! queues. This crate ties the layers together:
//!
//! - [`peril_protocol`]: message types, codecs, routing names;
//! - [`peril_broker`]: broker traits, the in-process broker, and (with the
//!   `amqp` feature) a RabbitMQ backend;
//! - [`peril_pubsub`]: topology, typed publish, typed subscribe;
//! - this crate: the standard game subscriptions, configuration, and
//!   logging setup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peril::prelude::*;
//! # async fn run<G: GameRules>(conn: MemoryConnection, rules: G) -> Result<(), PerilError> {
//! let config = PerilConfig::load()?;
//! peril::telemetry::init(&config.log_filter);
//!
//! let rules = Arc::new(tokio::sync::Mutex::new(rules));
//! let client = register_client(&conn, rules, &config.subscription).await?;
//! // ... publish moves with client.publish_move(&army_move) ...
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod rules;
pub mod server;
pub mod telemetry;

pub use client::{GameClient, register_client};
pub use config::{PerilConfig, SubscriptionConfig};
pub use error::PerilError;
pub use handler::{
    SharedRules, log_handler, move_handler, pause_handler, publish_game_log, war_handler,
};
pub use rules::{GameRules, LogSink, MoveOutcome, TracingLogSink, WarOutcome, WarResolution};
pub use server::{GameServer, register_server};

pub use peril_broker;
pub use peril_protocol;
pub use peril_pubsub;

/// Common imports for Peril applications.
pub mod prelude {
    pub use crate::client::{GameClient, register_client};
    pub use crate::config::{PerilConfig, SubscriptionConfig};
    pub use crate::error::PerilError;
    pub use crate::rules::{
        GameRules, LogSink, MoveOutcome, TracingLogSink, WarOutcome, WarResolution,
    };
    pub use crate::server::{GameServer, register_server};

    #[cfg(feature = "amqp")]
    pub use peril_broker::AmqpConnection;
    pub use peril_broker::{
        Channel, Connection, Delivery, ExchangeKind, MemoryBroker, MemoryConnection,
    };
    pub use peril_protocol::routing;
    pub use peril_protocol::{
        ArmyMove, BincodeCodec, Codec, GameLog, JsonCodec, Location, Player, PlayingState,
        RecognitionOfWar, Unit, UnitRank,
    };
    pub use peril_pubsub::{
        AckType, DecodeFailure, PubSubError, QueuePolicy, ResubscribeConfig, Subscription,
        SubscriptionHandle, publish, publish_bincode, publish_json, subscribe,
        subscribe_bincode, subscribe_json,
    };
}
