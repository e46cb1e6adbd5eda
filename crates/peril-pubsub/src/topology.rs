//! Queue declaration and binding.
//!
//! Every queue Peril declares carries the same dead-letter argument, so a
//! message rejected without requeue ends up on [`DEAD_LETTER_EXCHANGE`]
//! instead of vanishing. The only difference between queues is the
//! [`QueuePolicy`].

use peril_broker::{
    ARG_DEAD_LETTER_EXCHANGE, Channel, Connection, FieldTable, QueueInfo, QueueOptions,
};
use peril_protocol::routing;
use serde::{Deserialize, Serialize};

use crate::error::{PubSubError, TopologyStage};

/// Exchange that receives rejected messages.
pub const DEAD_LETTER_EXCHANGE: &str = routing::EXCHANGE_PERIL_DLX;

/// Lifetime policy for a declared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Survives broker restarts and outlives its consumers. For shared work
    /// queues such as `war` and `game_logs`.
    Durable,
    /// Private to the declaring connection and deleted with its last
    /// consumer. For per-client queues such as `pause.<username>`.
    Transient,
}

impl QueuePolicy {
    /// The declare flags for this policy.
    pub fn options(self) -> QueueOptions {
        let durable = matches!(self, Self::Durable);
        QueueOptions {
            durable,
            auto_delete: !durable,
            exclusive: !durable,
        }
    }
}

/// Declare arguments shared by every Peril queue.
pub fn queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::new();
    arguments.insert(
        ARG_DEAD_LETTER_EXCHANGE.to_string(),
        DEAD_LETTER_EXCHANGE.into(),
    );
    arguments
}

/// Opens a channel, declares `queue` with `policy` and binds it to
/// `exchange` with `routing_key`.
///
/// Returns the channel and what the broker reported for the queue. The
/// queue name in the result is the broker's; it differs from `queue` only
/// when `queue` is empty. If declare or bind fails the channel is closed
/// before the error is returned.
pub async fn declare_and_bind<C: Connection>(
    conn: &C,
    exchange: &str,
    queue: &str,
    routing_key: &str,
    policy: QueuePolicy,
) -> Result<(C::Channel, QueueInfo), PubSubError> {
    let channel = conn.create_channel().await.map_err(PubSubError::Connection)?;

    let info = match channel
        .queue_declare(queue, policy.options(), queue_arguments())
        .await
    {
        Ok(info) => info,
        Err(source) => {
            close_quietly(&channel).await;
            return Err(PubSubError::Topology {
                queue: queue.to_string(),
                stage: TopologyStage::Declare,
                source,
            });
        }
    };

    if let Err(source) = channel.queue_bind(&info.name, exchange, routing_key).await {
        close_quietly(&channel).await;
        return Err(PubSubError::Topology {
            queue: info.name,
            stage: TopologyStage::Bind,
            source,
        });
    }

    tracing::debug!(
        queue = %info.name,
        exchange,
        routing_key,
        ?policy,
        channel = %channel.id(),
        "queue declared and bound"
    );
    Ok((channel, info))
}

/// Declares the durable dead-letter queue and binds it to
/// [`DEAD_LETTER_EXCHANGE`].
///
/// This queue is declared without a dead-letter argument of its own, so a
/// message rejected from it is dropped rather than looping back.
pub async fn declare_dead_letter_queue<C: Connection>(
    conn: &C,
    queue: &str,
) -> Result<QueueInfo, PubSubError> {
    let channel = conn.create_channel().await.map_err(PubSubError::Connection)?;
    let result = async {
        let info = channel
            .queue_declare(queue, QueuePolicy::Durable.options(), FieldTable::new())
            .await
            .map_err(|source| PubSubError::Topology {
                queue: queue.to_string(),
                stage: TopologyStage::Declare,
                source,
            })?;
        channel
            .queue_bind(&info.name, DEAD_LETTER_EXCHANGE, "")
            .await
            .map_err(|source| PubSubError::Topology {
                queue: info.name.clone(),
                stage: TopologyStage::Bind,
                source,
            })?;
        Ok(info)
    }
    .await;
    close_quietly(&channel).await;
    result
}

pub(crate) async fn close_quietly<Ch: Channel>(channel: &Ch) {
    if let Err(e) = channel.close().await {
        tracing::debug!(channel = %channel.id(), error = %e, "channel close failed");
    }
}
