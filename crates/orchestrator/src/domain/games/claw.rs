//! Claw machine rules: one long round of prize grabs.
//!
//! The round starts with a field of prizes at 2-D percent coordinates. A
//! grab at `(x, y)` takes the nearest still-present prize within the grab
//! threshold and scores its value. Ties in the final ranking go to whoever
//! landed their last grab earliest, then to join order.

use crate::domain::Error;
use arena_core::Address;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ATTEMPTS_PER_PLAYER: u32 = 3;
pub const GRAB_THRESHOLD: f64 = 15.0;
const PRIZES_PER_PLAYER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Golden,
}

impl Rarity {
    pub fn value(&self) -> i64 {
        match self {
            Rarity::Common => 10,
            Rarity::Uncommon => 25,
            Rarity::Rare => 50,
            Rarity::Golden => 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prize {
    pub x: f64,
    pub y: f64,
    pub rarity: Rarity,
    pub grabbed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClawProgress {
    pub attempts_used: u32,
    /// Global move sequence of the latest successful grab; the ranking
    /// tie-break (earlier is better).
    pub last_grab_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClawRound {
    pub prizes: Vec<Prize>,
    pub attempts_per_player: u32,
    pub threshold: f64,
    pub progress: BTreeMap<Address, ClawProgress>,
}

pub fn build_round(players: &[Address], rng: &mut ChaCha20Rng) -> ClawRound {
    let count = players.len() * PRIZES_PER_PLAYER;
    let prizes = (0..count)
        .map(|_| {
            let x = rng.random_range(0.0..=100.0);
            let y = rng.random_range(0.0..=100.0);
            let roll: u32 = rng.random_range(0..100);
            let rarity = match roll {
                0..=59 => Rarity::Common,
                60..=84 => Rarity::Uncommon,
                85..=96 => Rarity::Rare,
                _ => Rarity::Golden,
            };
            Prize {
                x,
                y,
                rarity,
                grabbed: false,
            }
        })
        .collect();

    ClawRound {
        prizes,
        attempts_per_player: ATTEMPTS_PER_PLAYER,
        threshold: GRAB_THRESHOLD,
        progress: players
            .iter()
            .map(|p| (*p, ClawProgress::default()))
            .collect(),
    }
}

impl ClawRound {
    /// Spend one grab attempt at `(x, y)`. Returns the value of the grabbed
    /// prize, or 0 when nothing was in reach (the attempt is still spent).
    pub fn apply_grab(
        &mut self,
        player: &Address,
        x: f64,
        y: f64,
        seq: u64,
    ) -> Result<i64, Error> {
        if !(0.0..=100.0).contains(&x) || !(0.0..=100.0).contains(&y) {
            return Err(Error::InvalidMove(format!(
                "grab coordinates ({}, {}) outside the 0..100 field",
                x, y
            )));
        }
        let progress = self
            .progress
            .get_mut(player)
            .ok_or(Error::NotAParticipant(*player))?;
        if progress.attempts_used >= self.attempts_per_player {
            return Err(Error::InvalidMove(
                "no grab attempts remaining".to_string(),
            ));
        }
        progress.attempts_used += 1;

        let mut nearest: Option<(usize, f64)> = None;
        for (index, prize) in self.prizes.iter().enumerate() {
            if prize.grabbed {
                continue;
            }
            let distance = ((prize.x - x).powi(2) + (prize.y - y).powi(2)).sqrt();
            if distance <= self.threshold
                && nearest.map_or(true, |(_, best)| distance < best)
            {
                nearest = Some((index, distance));
            }
        }

        match nearest {
            Some((index, _)) => {
                self.prizes[index].grabbed = true;
                progress.last_grab_seq = Some(seq);
                Ok(self.prizes[index].rarity.value())
            }
            None => Ok(0),
        }
    }

    pub fn attempts_left(&self, player: &Address) -> u32 {
        self.progress
            .get(player)
            .map(|p| self.attempts_per_player.saturating_sub(p.attempts_used))
            .unwrap_or(0)
    }

    pub fn exhausted(&self) -> bool {
        self.progress
            .values()
            .all(|p| p.attempts_used >= self.attempts_per_player)
    }

    /// Deterministic fallback grab: aim straight at a random remaining prize
    /// so absent players still pull from the same field.
    pub fn auto_target(&self, rng: &mut ChaCha20Rng) -> (f64, f64) {
        let remaining: Vec<&Prize> = self.prizes.iter().filter(|p| !p.grabbed).collect();
        if remaining.is_empty() {
            return (
                rng.random_range(0.0..=100.0),
                rng.random_range(0.0..=100.0),
            );
        }
        let pick = remaining[rng.random_range(0..remaining.len())];
        (pick.x, pick.y)
    }
}
