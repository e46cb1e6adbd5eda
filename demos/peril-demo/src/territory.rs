//! A small rule set: players hold units on continents, and moving onto a
//! continent someone else holds starts a war won by raw unit strength.

use peril::prelude::*;

fn strength(rank: UnitRank) -> u32 {
    match rank {
        UnitRank::Infantry => 1,
        UnitRank::Cavalry => 5,
        UnitRank::Artillery => 10,
    }
}

fn power_at(player: &Player, location: Location) -> u32 {
    player.units_at(location).map(|u| strength(u.rank)).sum()
}

/// First continent where both players have units.
fn battlefield(a: &Player, b: &Player) -> Option<Location> {
    a.units
        .values()
        .map(|u| u.location)
        .find(|&loc| b.units_at(loc).next().is_some())
}

#[derive(Debug)]
pub struct Territory {
    player: Player,
    paused: bool,
}

impl Territory {
    pub fn new(username: &str, units: &[(u32, UnitRank, Location)]) -> Self {
        let mut player = Player::new(username);
        for &(id, rank, location) in units {
            player.units.insert(id, Unit { id, rank, location });
        }
        Self {
            player,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn unit_count(&self) -> usize {
        self.player.units.len()
    }

    /// Moves the given units and returns the move to publish. Unknown ids
    /// are skipped.
    pub fn move_units(&mut self, to: Location, ids: &[u32]) -> ArmyMove {
        let mut moved = Vec::new();
        for id in ids {
            if let Some(unit) = self.player.units.get_mut(id) {
                unit.location = to;
                moved.push(unit.clone());
            }
        }
        ArmyMove {
            player: self.player.clone(),
            units: moved,
            to_location: to,
        }
    }
}

impl GameRules for Territory {
    fn username(&self) -> &str {
        &self.player.username
    }

    fn player_snapshot(&self) -> Player {
        self.player.clone()
    }

    fn handle_pause(&mut self, state: &PlayingState) {
        self.paused = state.is_paused;
        tracing::info!(player = %self.player.username, paused = self.paused, "game state changed");
    }

    fn handle_move(&mut self, army_move: &ArmyMove) -> MoveOutcome {
        if army_move.player.username == self.player.username {
            return MoveOutcome::SamePlayer;
        }
        if self.player.units_at(army_move.to_location).next().is_some() {
            MoveOutcome::MakeWar
        } else {
            MoveOutcome::Safe
        }
    }

    fn handle_war(&mut self, war: &RecognitionOfWar) -> WarResolution {
        let me = self.player.username.as_str();
        if war.attacker.username != me && war.defender.username != me {
            return WarResolution::without_participants(WarOutcome::NotInvolved);
        }
        let Some(location) = battlefield(&war.attacker, &war.defender) else {
            return WarResolution::without_participants(WarOutcome::NoUnits);
        };

        let attack = power_at(&war.attacker, location);
        let defense = power_at(&war.defender, location);
        let (winner, loser) = if attack >= defense {
            (&war.attacker.username, &war.defender.username)
        } else {
            (&war.defender.username, &war.attacker.username)
        };

        let outcome = if attack == defense {
            WarOutcome::Draw
        } else if winner == me {
            WarOutcome::YouWon
        } else {
            self.player.units.retain(|_, unit| unit.location != location);
            WarOutcome::OpponentWon
        };
        WarResolution {
            outcome,
            winner: winner.clone(),
            loser: loser.clone(),
        }
    }
}
