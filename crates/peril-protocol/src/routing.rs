//! Exchange names, routing keys, and queue names shared by every Peril
//! process.
//!
//! Routing keys are `.`-delimited. Per-player keys put the username in the
//! last segment so topic subscribers can bind with `<prefix>.*` and see
//! every player's events.

/// Topic exchange carrying moves, war recognitions, and game logs.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";

/// Direct exchange carrying the pause/resume broadcast.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";

/// Dead-letter exchange named on every declared queue.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

/// Durable queue bound to [`EXCHANGE_PERIL_DLX`].
pub const QUEUE_PERIL_DLQ: &str = "peril_dlq";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const PAUSE_KEY: &str = "pause";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `army_moves.<username>`: the routing key a client publishes moves on,
/// and also the name of its private move queue.
pub fn army_moves_key(username: &str) -> String {
    format!("{ARMY_MOVES_PREFIX}.{username}")
}

/// `war.<username>`
pub fn war_key(username: &str) -> String {
    format!("{WAR_RECOGNITIONS_PREFIX}.{username}")
}

/// `game_logs.<username>`
pub fn game_log_key(username: &str) -> String {
    format!("{GAME_LOG_SLUG}.{username}")
}

/// `pause.<username>`: each client's private queue for the pause
/// broadcast. The binding key is the bare [`PAUSE_KEY`].
pub fn pause_queue(username: &str) -> String {
    format!("{PAUSE_KEY}.{username}")
}

/// `<prefix>.*`: binds a topic queue to one event kind for all players.
pub fn all_players(prefix: &str) -> String {
    format!("{prefix}.*")
}
