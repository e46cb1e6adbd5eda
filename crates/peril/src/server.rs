//! Server-side registration: the game-log subscription and pause
//! broadcasts.

use std::sync::Arc;

use peril_broker::{Channel, Connection};
use peril_protocol::routing::{
    self, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY, QUEUE_PERIL_DLQ,
};
use peril_protocol::{BincodeCodec, PlayingState};
use peril_pubsub::{
    PubSubError, QueuePolicy, SubscriptionHandle, declare_dead_letter_queue, publish_json,
};
use tracing::{debug, info};

use crate::config::SubscriptionConfig;
use crate::handler::log_handler;
use crate::rules::LogSink;

/// A registered game server.
pub struct GameServer<C: Connection> {
    channel: C::Channel,
    game_logs: SubscriptionHandle,
}

impl<C: Connection> std::fmt::Debug for GameServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameServer")
            .field("channel", &self.channel.id())
            .field("game_logs", &self.game_logs)
            .finish()
    }
}

/// Declares the dead-letter queue and subscribes to every player's game
/// logs (`game_logs` bound to `game_logs.*`, durable, binary payloads).
pub async fn register_server<C, S>(
    conn: &C,
    sink: Arc<S>,
    config: &SubscriptionConfig,
) -> Result<GameServer<C>, PubSubError>
where
    C: Connection + Clone,
    S: LogSink,
{
    declare_dead_letter_queue(conn, QUEUE_PERIL_DLQ).await?;

    let game_logs = config
        .subscription(
            EXCHANGE_PERIL_TOPIC,
            GAME_LOG_SLUG,
            &routing::all_players(GAME_LOG_SLUG),
            QueuePolicy::Durable,
        )
        .start(conn, BincodeCodec, log_handler(sink))
        .await?;

    let channel = match conn.create_channel().await {
        Ok(channel) => channel,
        Err(e) => {
            game_logs.shutdown().await;
            return Err(PubSubError::Connection(e));
        }
    };

    info!("server registered");
    Ok(GameServer { channel, game_logs })
}

impl<C: Connection> GameServer<C> {
    /// Broadcasts a pause (`true`) or resume (`false`) to every client.
    pub async fn publish_pause(&self, paused: bool) -> Result<(), PubSubError> {
        publish_json(
            &self.channel,
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused: paused },
        )
        .await?;
        info!(paused, "playing state broadcast");
        Ok(())
    }

    pub async fn shutdown(self) {
        self.game_logs.shutdown().await;
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "publish channel already closed");
        }
        info!("server stopped");
    }
}
