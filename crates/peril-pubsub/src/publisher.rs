//! Typed publishing.

use peril_broker::{Channel, Properties};
use peril_protocol::{BincodeCodec, Codec, JsonCodec};
use serde::Serialize;

use crate::error::PubSubError;

/// Encodes `value` with `codec` and publishes it to `exchange` with
/// `routing_key`. The message carries the codec's content type.
///
/// Fire-and-forget: returns once the channel has accepted the message.
/// Routing and delivery are not confirmed.
pub async fn publish<Ch, K, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    codec: &K,
    value: &T,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    K: Codec,
    T: Serialize + Sync,
{
    let body = codec.encode(value).map_err(PubSubError::Encode)?;
    let size = body.len();
    channel
        .basic_publish(
            exchange,
            routing_key,
            Properties::with_content_type(codec.content_type()),
            body,
        )
        .await
        .map_err(|source| PubSubError::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            source,
        })?;
    tracing::trace!(exchange, routing_key, bytes = size, "message published");
    Ok(())
}

/// [`publish`] with [`JsonCodec`] (`application/json`).
pub async fn publish_json<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    T: Serialize + Sync,
{
    publish(channel, exchange, routing_key, &JsonCodec, value).await
}

/// [`publish`] with [`BincodeCodec`] (`application/x-bincode`).
pub async fn publish_bincode<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    T: Serialize + Sync,
{
    publish(channel, exchange, routing_key, &BincodeCodec, value).await
}
