//! Wire vocabulary for Peril.
//!
//! This crate defines what the game server and clients put on the
//! broker:
//!
//! - **Types** ([`ArmyMove`], [`RecognitionOfWar`], [`PlayingState`],
//!   [`GameLog`], ...): the payloads.
//! - **Codecs** ([`Codec`] trait, [`JsonCodec`], [`BincodeCodec`]): how
//!   payloads become message bodies and which content type they carry.
//! - **Routing** ([`routing`]): exchange names, routing keys, queue names.
//! - **Errors** ([`CodecError`]).
//!
//! It knows nothing about brokers or channels; `peril-pubsub` combines
//! these pieces with a broker connection.

mod codec;
mod error;
pub mod routing;
mod types;

pub use codec::{CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON, Codec};
#[cfg(feature = "binary")]
pub use codec::BincodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::CodecError;
pub use types::{
    ArmyMove, GameLog, Location, Player, PlayingState, RecognitionOfWar, Unit, UnitRank,
};
