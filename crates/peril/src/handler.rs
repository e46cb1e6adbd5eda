//! Message handlers for the standard Peril subscriptions.
//!
//! Each constructor returns a [`Handler`] ready to pass to a subscription.
//! Game state is shared with the rest of the client behind an
//! `Arc<tokio::sync::Mutex<_>>`; the lock is held only while the rules
//! run, never across a publish.

use std::sync::Arc;
use std::time::SystemTime;

use peril_broker::Channel;
use peril_protocol::routing::{self, EXCHANGE_PERIL_TOPIC};
use peril_protocol::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use peril_pubsub::{AckType, Handler, publish_bincode, publish_json};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::rules::{GameRules, LogSink, MoveOutcome, WarOutcome};

/// Game state shared between handlers and the owning client.
pub type SharedRules<G> = Arc<Mutex<G>>;

/// Applies a pause or resume. Always acks.
pub fn pause_handler<G: GameRules>(rules: SharedRules<G>) -> impl Handler<PlayingState> {
    move |state: PlayingState| {
        let rules = Arc::clone(&rules);
        async move {
            rules.lock().await.handle_pause(&state);
            AckType::Ack
        }
    }
}

/// Resolves another player's army move.
///
/// A move that starts a war is answered with a [`RecognitionOfWar`] on
/// `war.<username>`; if that publish fails the move is requeued so the
/// war is not lost. The local player's own moves are discarded.
pub fn move_handler<G, Ch>(rules: SharedRules<G>, channel: Arc<Ch>) -> impl Handler<ArmyMove>
where
    G: GameRules,
    Ch: Channel,
{
    move |army_move: ArmyMove| {
        let rules = Arc::clone(&rules);
        let channel = Arc::clone(&channel);
        async move {
            let (outcome, username, defender) = {
                let mut rules = rules.lock().await;
                let outcome = rules.handle_move(&army_move);
                (outcome, rules.username().to_string(), rules.player_snapshot())
            };
            debug!(
                from = %army_move.player.username,
                to = %army_move.to_location,
                ?outcome,
                "army move resolved"
            );

            match outcome {
                MoveOutcome::Safe => AckType::Ack,
                MoveOutcome::SamePlayer => AckType::NackDiscard,
                MoveOutcome::MakeWar => {
                    let war = RecognitionOfWar {
                        attacker: army_move.player,
                        defender,
                    };
                    let key = routing::war_key(&username);
                    match publish_json(&*channel, EXCHANGE_PERIL_TOPIC, &key, &war).await {
                        Ok(()) => {
                            info!(
                                attacker = %war.attacker.username,
                                defender = %war.defender.username,
                                "war declared"
                            );
                            AckType::Ack
                        }
                        Err(e) => {
                            error!(error = %e, "could not publish war recognition");
                            AckType::NackRequeue
                        }
                    }
                }
            }
        }
    }
}

/// Resolves a war recognition and records the result as a game log.
///
/// Wars the local player is not part of are requeued for another client;
/// wars it cannot fight are discarded.
pub fn war_handler<G, Ch>(rules: SharedRules<G>, channel: Arc<Ch>) -> impl Handler<RecognitionOfWar>
where
    G: GameRules,
    Ch: Channel,
{
    move |war: RecognitionOfWar| {
        let rules = Arc::clone(&rules);
        let channel = Arc::clone(&channel);
        async move {
            let (resolution, username) = {
                let mut rules = rules.lock().await;
                let resolution = rules.handle_war(&war);
                (resolution, rules.username().to_string())
            };
            debug!(outcome = ?resolution.outcome, "war resolved");

            match resolution.outcome {
                WarOutcome::NotInvolved => AckType::NackRequeue,
                WarOutcome::NoUnits => AckType::NackDiscard,
                WarOutcome::OpponentWon | WarOutcome::YouWon | WarOutcome::Draw => {
                    match resolution.log_message() {
                        Some(message) => publish_game_log(&*channel, &username, message).await,
                        None => AckType::Ack,
                    }
                }
            }
        }
    }
}

/// Hands each game log to `sink`. A sink error requeues the log.
pub fn log_handler<S: LogSink>(sink: Arc<S>) -> impl Handler<GameLog> {
    move |log: GameLog| {
        let sink = Arc::clone(&sink);
        async move {
            match sink.write_log(&log) {
                Ok(()) => AckType::Ack,
                Err(e) => {
                    error!(username = %log.username, error = %e, "could not write game log");
                    AckType::NackRequeue
                }
            }
        }
    }
}

/// Publishes a [`GameLog`] stamped with the current time to
/// `game_logs.<username>` in binary form.
///
/// Returns the decision the calling handler should make: `Ack` once
/// published, `NackRequeue` if the publish failed.
pub async fn publish_game_log<Ch: Channel>(
    channel: &Ch,
    username: &str,
    message: impl Into<String>,
) -> AckType {
    let log = GameLog {
        current_time: SystemTime::now(),
        message: message.into(),
        username: username.to_string(),
    };
    let key = routing::game_log_key(username);
    match publish_bincode(channel, EXCHANGE_PERIL_TOPIC, &key, &log).await {
        Ok(()) => {
            debug!(username, message = %log.message, "game log published");
            AckType::Ack
        }
        Err(e) => {
            error!(username, error = %e, "could not publish game log");
            AckType::NackRequeue
        }
    }
}
