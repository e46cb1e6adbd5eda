//! Codec trait and implementations for payload bytes.
//!
//! A codec converts between Rust values and the raw body of a broker
//! message, and names the content type that goes on the message's
//! properties. Publishers and subscribers only talk to the [`Codec`]
//! trait, so a message kind can move from one wire format to another
//! without touching the pub/sub layer.
//!
//! Two codecs ship with this crate:
//!
//! - [`JsonCodec`]: structured text, used for game events (moves, wars,
//!   pause state). Easy to inspect in the broker's management UI.
//! - [`BincodeCodec`]: a compact binary envelope, used for game logs.

use serde::{Serialize, de::DeserializeOwned};

use crate::CodecError;

/// Content type set on messages encoded with [`JsonCodec`].
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type set on messages encoded with [`BincodeCodec`].
pub const CONTENT_TYPE_BINARY: &str = "application/x-bincode";

/// A codec that can encode Rust values to bytes and decode them back.
///
/// ## Trait bounds
///
/// - `Send + Sync` because a codec is moved into the subscription task
///   and may be polled from any worker thread.
/// - `'static` because that task outlives the registration call.
///
/// `encode` and `decode` are generic over the payload type, which is what
/// gives publisher and subscriber compile-time agreement on the message
/// shape: `publish(.., &ArmyMove)` and `subscribe::<ArmyMove, _>(..)`
/// must name the same type.
pub trait Codec: Send + Sync + 'static {
    /// The MIME-style tag written to the message's `content_type`
    /// property.
    fn content_type(&self) -> &'static str;

    /// Serializes a value into a payload.
    ///
    /// # Errors
    /// Returns an encode variant of [`CodecError`] if the value can't be
    /// represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserializes a payload back into a value.
    ///
    /// # Errors
    /// Returns a decode variant of [`CodecError`] if the bytes are
    /// malformed, truncated, or describe a different type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Field names follow the serde attributes on each type, so the payloads
/// stay readable by non-Rust clients on the same exchange.
///
/// ## Example
///
/// ```rust
/// use peril_protocol::{Codec, JsonCodec, PlayingState};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&PlayingState { is_paused: true }).unwrap();
/// assert_eq!(bytes, br#"{"IsPaused":true}"#);
///
/// let decoded: PlayingState = codec.decode(&bytes).unwrap();
/// assert!(decoded.is_paused);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::JsonEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(CodecError::JsonDecode)
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `bincode`.
///
/// The encoding is positional: field names are not on the wire, so both
/// sides must agree on the exact Rust type. That is fine for game logs,
/// which only the Peril server reads.
#[cfg(feature = "binary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "binary")]
impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_BINARY
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(CodecError::BinaryEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(data).map_err(CodecError::BinaryDecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GameLog, PlayingState};
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_json_content_type() {
        assert_eq!(JsonCodec.content_type(), "application/json");
    }

    #[test]
    fn test_binary_content_type_differs_from_json() {
        assert_ne!(BincodeCodec.content_type(), JsonCodec.content_type());
    }

    #[test]
    fn test_json_decode_garbage_is_decode_error() {
        let err = JsonCodec.decode::<PlayingState>(b"{not json").unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("json decode failed"));
    }

    #[test]
    fn test_binary_decode_truncated_is_decode_error() {
        let log = GameLog {
            current_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            message: "washington won a war against cornwallis".into(),
            username: "washington".into(),
        };
        let bytes = BincodeCodec.encode(&log).unwrap();
        let err = BincodeCodec
            .decode::<GameLog>(&bytes[..bytes.len() / 2])
            .unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_json_payload_is_not_a_binary_envelope() {
        // `{` is not a valid bincode bool byte.
        let bytes = JsonCodec.encode(&PlayingState { is_paused: true }).unwrap();
        assert!(BincodeCodec.decode::<PlayingState>(&bytes).is_err());
    }
}
