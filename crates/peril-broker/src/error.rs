/// Errors that can occur while talking to the broker.
///
/// The variants mirror the AMQP reply codes a real broker answers with,
/// so an adapter for a network client can map onto them one-to-one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The connection was closed, by the owner or by the broker.
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was closed; deliveries it handed out can no longer be
    /// acknowledged through it.
    #[error("channel {0} closed")]
    ChannelClosed(u64),

    /// An exchange or queue named in the request does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with existing broker state, e.g. redeclaring
    /// a queue with different flags or acking an unknown delivery tag.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An exclusive queue is owned by another connection.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// Any other failure reported by a network client (I/O, framing,
    /// authentication).
    #[error("broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Maps an error reported by an AMQP client on `channel` onto a
    /// variant.
    ///
    /// Brokers put the reply name in the close reason
    /// (`"NOT_FOUND - no exchange 'peril_topic' in vhost '/'"`), which is
    /// the only part every client passes through unchanged.
    pub fn from_reply_text(channel: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        let lower = text.to_ascii_lowercase();
        if text.contains("NOT_FOUND") {
            Self::NotFound(text)
        } else if text.contains("PRECONDITION_FAILED") {
            Self::PreconditionFailed(text)
        } else if text.contains("RESOURCE_LOCKED") {
            Self::ResourceLocked(text)
        } else if lower.contains("invalid channel") {
            Self::ChannelClosed(channel)
        } else if lower.contains("invalid connection state") {
            Self::ConnectionClosed
        } else {
            Self::Other(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_names_map_to_variants() {
        assert!(matches!(
            BrokerError::from_reply_text(1, "NOT_FOUND - no exchange 'peril_topic' in vhost '/'"),
            BrokerError::NotFound(_)
        ));
        assert!(matches!(
            BrokerError::from_reply_text(1, "PRECONDITION_FAILED - inequivalent arg 'durable'"),
            BrokerError::PreconditionFailed(_)
        ));
        assert!(matches!(
            BrokerError::from_reply_text(1, "RESOURCE_LOCKED - cannot obtain exclusive access"),
            BrokerError::ResourceLocked(_)
        ));
    }

    #[test]
    fn test_client_state_errors_map_to_closed() {
        assert_eq!(
            BrokerError::from_reply_text(4, "invalid channel state: Closed"),
            BrokerError::ChannelClosed(4)
        );
        assert_eq!(
            BrokerError::from_reply_text(0, "invalid connection state: Closed"),
            BrokerError::ConnectionClosed
        );
    }

    #[test]
    fn test_unknown_text_is_kept() {
        let err = BrokerError::from_reply_text(0, "IO error: connection refused");
        assert_eq!(err, BrokerError::Other("IO error: connection refused".into()));
        assert_eq!(err.to_string(), "broker error: IO error: connection refused");
    }
}
