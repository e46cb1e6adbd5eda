//! Unified error type for the Peril crates.

use peril_broker::BrokerError;
use peril_protocol::CodecError;
use peril_pubsub::PubSubError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors, so applications built on `peril` deal with this one type.
#[derive(Debug, thiserror::Error)]
pub enum PerilError {
    /// Broker-level failure outside the pub/sub layer (opening a channel
    /// for publishing, declaring exchanges).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Encode or decode failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Topology, subscribe, or publish failure.
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
