//! The acknowledgement decision a handler returns.

use std::fmt;

use peril_broker::{BrokerError, Delivery};

/// What should happen to a delivery once its handler is done.
///
/// This is the only way handler code influences acknowledgement; the
/// subscription loop turns it into exactly one broker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckType {
    /// Processed; remove it from the queue.
    Ack,
    /// Not processed; put it back for another attempt.
    NackRequeue,
    /// Not processable; dead-letter it.
    NackDiscard,
}

impl AckType {
    /// Integer code used by non-Rust peers (`0`, `1`, `2`).
    pub fn code(self) -> u8 {
        match self {
            Self::Ack => 0,
            Self::NackRequeue => 1,
            Self::NackDiscard => 2,
        }
    }

    /// Maps an integer code back to a decision. Codes outside the known
    /// range become [`AckType::NackDiscard`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ack,
            1 => Self::NackRequeue,
            2 => Self::NackDiscard,
            other => {
                tracing::warn!(code = other, "unknown ack decision, discarding message");
                Self::NackDiscard
            }
        }
    }

    /// Issues the single broker call for this decision.
    pub(crate) async fn settle<D: Delivery>(self, delivery: D) -> Result<(), BrokerError> {
        match self {
            Self::Ack => delivery.ack().await,
            Self::NackRequeue => delivery.nack(true).await,
            Self::NackDiscard => delivery.nack(false).await,
        }
    }
}

impl fmt::Display for AckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ack => "ack",
            Self::NackRequeue => "nack-requeue",
            Self::NackDiscard => "nack-discard",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for ack in [AckType::Ack, AckType::NackRequeue, AckType::NackDiscard] {
            assert_eq!(AckType::from_code(ack.code()), ack);
        }
    }

    #[test]
    fn test_unknown_code_discards() {
        assert_eq!(AckType::from_code(7), AckType::NackDiscard);
        assert_eq!(AckType::from_code(u8::MAX), AckType::NackDiscard);
    }

    #[test]
    fn test_display() {
        assert_eq!(AckType::NackRequeue.to_string(), "nack-requeue");
    }
}
