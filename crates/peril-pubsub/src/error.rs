//! Error types for the pub/sub layer.

use std::fmt;

use peril_broker::BrokerError;
use peril_protocol::CodecError;

/// Which step of topology setup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStage {
    Declare,
    Bind,
}

impl fmt::Display for TopologyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Declare => "declare",
            Self::Bind => "bind",
        })
    }
}

/// Errors returned by registration and publish calls.
///
/// Decode failures are not here: they happen inside a running
/// subscription and are logged there, never returned.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// A channel could not be opened on the connection.
    #[error("could not create channel: {0}")]
    Connection(#[source] BrokerError),

    /// The queue could not be declared or bound. Includes redeclaring an
    /// existing queue with different parameters.
    #[error("could not {stage} queue '{queue}': {source}")]
    Topology {
        queue: String,
        stage: TopologyStage,
        #[source]
        source: BrokerError,
    },

    /// The broker refused to start a consumer on the queue.
    #[error("could not consume from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// The value could not be encoded with the chosen codec.
    #[error("could not encode message: {0}")]
    Encode(#[source] CodecError),

    /// The broker rejected the publish or the channel is gone.
    #[error("could not publish to '{exchange}' with key '{routing_key}': {source}")]
    Publish {
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}

impl PubSubError {
    /// `true` for errors that mean the subscription was never set up.
    /// By convention callers abort startup on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Topology { .. } | Self::Consume { .. }
        )
    }
}
