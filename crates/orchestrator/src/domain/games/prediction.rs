//! Prediction rules: guess a hidden number, closest guess scores highest.

use crate::domain::Error;
use arena_core::Address;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const RANGE_MIN: i64 = 0;
const RANGE_MAX: i64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRound {
    pub prompt: String,
    pub min: i64,
    pub max: i64,
    /// Drawn at round start, revealed only at resolution.
    pub(crate) target: i64,
    pub answers: BTreeMap<Address, i64>,
}

pub fn build_round(round_number: u32, rng: &mut ChaCha20Rng) -> PredictionRound {
    let target = rng.random_range(RANGE_MIN..=RANGE_MAX);
    PredictionRound {
        prompt: format!(
            "Round {}: pick the hidden number between {} and {}",
            round_number, RANGE_MIN, RANGE_MAX
        ),
        min: RANGE_MIN,
        max: RANGE_MAX,
        target,
        answers: BTreeMap::new(),
    }
}

impl PredictionRound {
    /// `max(0, 100 - round(|guess - target| / range * 100))`.
    pub fn score_guess(&self, guess: i64) -> i64 {
        let range = (self.max - self.min) as f64;
        let miss = (guess as i128 - self.target as i128).unsigned_abs() as f64;
        let penalty = (miss / range * 100.0).round() as i64;
        (100 - penalty).max(0)
    }

    pub fn submit(&mut self, player: &Address, guess: i64) -> Result<i64, Error> {
        if self.answers.contains_key(player) {
            return Err(Error::MoveAlreadySubmitted);
        }
        self.answers.insert(*player, guess);
        Ok(self.score_guess(guess))
    }

    pub fn answered(&self, player: &Address) -> bool {
        self.answers.contains_key(player)
    }

    pub fn auto_guess(&self, rng: &mut ChaCha20Rng) -> i64 {
        rng.random_range(self.min..=self.max)
    }
}
