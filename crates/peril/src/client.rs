//! Client-side registration: the three subscriptions every player runs,
//! plus the channel it publishes on.

use std::sync::Arc;

use peril_broker::{Channel, Connection};
use peril_protocol::routing::{
    self, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, PAUSE_KEY,
    WAR_RECOGNITIONS_PREFIX,
};
use peril_protocol::{ArmyMove, JsonCodec};
use peril_pubsub::{AckType, PubSubError, QueuePolicy, SubscriptionHandle, publish_json};
use tracing::{debug, info};

use crate::config::SubscriptionConfig;
use crate::handler::{
    SharedRules, move_handler, pause_handler, publish_game_log, war_handler,
};
use crate::rules::GameRules;

/// A registered game client.
///
/// Owns the publish channel and the handles of its subscriptions. Dropping
/// it leaves the subscriptions running; call [`shutdown`](Self::shutdown)
/// to stop them.
pub struct GameClient<C: Connection> {
    username: String,
    channel: Arc<C::Channel>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl<C: Connection> std::fmt::Debug for GameClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("username", &self.username)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Subscribes a client to army moves, war recognitions, and pause
/// broadcasts:
///
/// | queue                   | exchange       | binding        | policy    |
/// |-------------------------|----------------|----------------|-----------|
/// | `army_moves.<username>` | `peril_topic`  | `army_moves.*` | transient |
/// | `war`                   | `peril_topic`  | `war.*`        | durable   |
/// | `pause.<username>`      | `peril_direct` | `pause`        | transient |
///
/// Any setup error aborts registration; subscriptions already started are
/// shut down first.
pub async fn register_client<C, G>(
    conn: &C,
    rules: SharedRules<G>,
    config: &SubscriptionConfig,
) -> Result<GameClient<C>, PubSubError>
where
    C: Connection + Clone,
    G: GameRules,
{
    let username = rules.lock().await.username().to_string();
    let channel = Arc::new(conn.create_channel().await.map_err(PubSubError::Connection)?);
    let mut subscriptions = Vec::with_capacity(3);

    let result = async {
        subscriptions.push(
            config
                .subscription(
                    EXCHANGE_PERIL_TOPIC,
                    &routing::army_moves_key(&username),
                    &routing::all_players(ARMY_MOVES_PREFIX),
                    QueuePolicy::Transient,
                )
                .start(
                    conn,
                    JsonCodec,
                    move_handler(Arc::clone(&rules), Arc::clone(&channel)),
                )
                .await?,
        );
        subscriptions.push(
            config
                .subscription(
                    EXCHANGE_PERIL_TOPIC,
                    WAR_RECOGNITIONS_PREFIX,
                    &routing::all_players(WAR_RECOGNITIONS_PREFIX),
                    QueuePolicy::Durable,
                )
                .start(
                    conn,
                    JsonCodec,
                    war_handler(Arc::clone(&rules), Arc::clone(&channel)),
                )
                .await?,
        );
        subscriptions.push(
            config
                .subscription(
                    EXCHANGE_PERIL_DIRECT,
                    &routing::pause_queue(&username),
                    PAUSE_KEY,
                    QueuePolicy::Transient,
                )
                .start(conn, JsonCodec, pause_handler(Arc::clone(&rules)))
                .await?,
        );
        Ok::<(), PubSubError>(())
    }
    .await;

    if let Err(e) = result {
        for handle in subscriptions {
            handle.shutdown().await;
        }
        close_publish_channel(&*channel).await;
        return Err(e);
    }

    info!(%username, "client registered");
    Ok(GameClient {
        username,
        channel,
        subscriptions,
    })
}

impl<C: Connection> GameClient<C> {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The channel the client publishes on.
    pub fn channel(&self) -> &C::Channel {
        &self.channel
    }

    /// Publishes one of the player's own moves on `army_moves.<username>`.
    pub async fn publish_move(&self, army_move: &ArmyMove) -> Result<(), PubSubError> {
        publish_json(
            &*self.channel,
            EXCHANGE_PERIL_TOPIC,
            &routing::army_moves_key(&self.username),
            army_move,
        )
        .await
    }

    /// Publishes a free-form game log under this player's name.
    pub async fn publish_game_log(&self, message: impl Into<String>) -> AckType {
        publish_game_log(&*self.channel, &self.username, message).await
    }

    /// Stops every subscription, then closes the publish channel.
    pub async fn shutdown(self) {
        for handle in self.subscriptions {
            handle.shutdown().await;
        }
        close_publish_channel(&*self.channel).await;
        info!(username = %self.username, "client stopped");
    }
}

async fn close_publish_channel<Ch: Channel>(channel: &Ch) {
    if let Err(e) = channel.close().await {
        debug!(error = %e, "publish channel already closed");
    }
}
