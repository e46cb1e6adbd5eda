//! The seams between messaging and game logic.
//!
//! Peril's messaging layer never decides game outcomes. A client plugs in
//! its game state through [`GameRules`]; the server plugs in where game
//! logs go through [`LogSink`].

use peril_protocol::{ArmyMove, GameLog, Player, PlayingState, RecognitionOfWar};

/// What an incoming army move means for the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No overlap with the local player's units.
    Safe,
    /// The move lands on a location the local player holds.
    MakeWar,
    /// The local player's own move, echoed back by the topic exchange.
    SamePlayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOutcome {
    /// The local player is neither attacker nor defender.
    NotInvolved,
    /// The local player has no units left to fight with.
    NoUnits,
    OpponentWon,
    YouWon,
    Draw,
}

/// Result of resolving a war. For a draw, `winner` and `loser` are just
/// the two participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

impl WarResolution {
    /// Outcome with no participants, for `NotInvolved` and `NoUnits`.
    pub fn without_participants(outcome: WarOutcome) -> Self {
        Self {
            outcome,
            winner: String::new(),
            loser: String::new(),
        }
    }

    /// The game-log line for a resolved war, or `None` if nothing was
    /// fought.
    pub fn log_message(&self) -> Option<String> {
        match self.outcome {
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
            WarOutcome::OpponentWon | WarOutcome::YouWon => Some(format!(
                "{} won a war against {}",
                self.winner, self.loser
            )),
            WarOutcome::Draw => Some(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
        }
    }
}

/// Client-side game state as seen by the message handlers.
///
/// Handlers lock the state for the duration of one call, so
/// implementations only need `&mut self`.
pub trait GameRules: Send + 'static {
    fn username(&self) -> &str;

    /// Current view of the local player, sent as the defender in a war
    /// recognition.
    fn player_snapshot(&self) -> Player;

    fn handle_pause(&mut self, state: &PlayingState);

    fn handle_move(&mut self, army_move: &ArmyMove) -> MoveOutcome;

    fn handle_war(&mut self, war: &RecognitionOfWar) -> WarResolution;
}

/// Where the server writes game logs.
pub trait LogSink: Send + Sync + 'static {
    /// Persists one log entry. An error requeues the message.
    fn write_log(&self, log: &GameLog) -> std::io::Result<()>;
}

/// Writes each game log as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write_log(&self, log: &GameLog) -> std::io::Result<()> {
        tracing::info!(username = %log.username, message = %log.message, "game log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(outcome: WarOutcome) -> WarResolution {
        WarResolution {
            outcome,
            winner: "ada".into(),
            loser: "bob".into(),
        }
    }

    #[test]
    fn test_win_messages() {
        assert_eq!(
            resolution(WarOutcome::YouWon).log_message().as_deref(),
            Some("ada won a war against bob")
        );
        assert_eq!(
            resolution(WarOutcome::OpponentWon).log_message().as_deref(),
            Some("ada won a war against bob")
        );
    }

    #[test]
    fn test_draw_message() {
        assert_eq!(
            resolution(WarOutcome::Draw).log_message().as_deref(),
            Some("A war between ada and bob resulted in a draw")
        );
    }

    #[test]
    fn test_no_message_without_a_fight() {
        assert!(resolution(WarOutcome::NotInvolved).log_message().is_none());
        assert!(
            WarResolution::without_participants(WarOutcome::NoUnits)
                .log_message()
                .is_none()
        );
    }
}
