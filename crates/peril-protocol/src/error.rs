//! Error types for the codec layer.
//!
//! Each Peril crate defines its own error enum. A `CodecError` always
//! means the problem is in turning values into payload bytes or back,
//! never in the broker or the topology.

/// Errors that can occur while encoding or decoding a payload.
///
/// Variants are split by codec so a log line tells you which wire format
/// was involved without having to look at the content type.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization failed.
    ///
    /// Rare in practice: it needs a value serde_json can't represent,
    /// such as a map with non-string keys.
    #[cfg(feature = "json")]
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// The payload is not valid JSON for the expected type.
    ///
    /// Common causes: truncated body, missing fields, a message that was
    /// published with the binary codec to a JSON queue.
    #[cfg(feature = "json")]
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// Binary envelope serialization failed.
    #[cfg(feature = "binary")]
    #[error("binary encode failed: {0}")]
    BinaryEncode(#[source] bincode::Error),

    /// The payload is not a valid binary envelope for the expected type.
    #[cfg(feature = "binary")]
    #[error("binary decode failed: {0}")]
    BinaryDecode(#[source] bincode::Error),
}

impl CodecError {
    /// Returns `true` for the decode-side variants.
    ///
    /// The subscriber uses this to tell a malformed delivery apart from a
    /// local bug when it logs.
    pub fn is_decode(&self) -> bool {
        match self {
            #[cfg(feature = "json")]
            Self::JsonDecode(_) => true,
            #[cfg(feature = "binary")]
            Self::BinaryDecode(_) => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}
