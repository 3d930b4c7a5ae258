//! Speed rules: answer fast. Rounds rotate through arithmetic, pattern
//! completion, and reaction tasks; score rewards correct answers on a
//! per-millisecond decay with a floor of 10.

use crate::domain::Error;
use arena_core::Address;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SpeedTask {
    Math { prompt: String, answer: i64 },
    Pattern { sequence: Vec<i64>, answer: i64 },
    Reaction { go_after_ms: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedRound {
    pub task: SpeedTask,
    pub time_limit_ms: u32,
    /// Scores of players who already answered this round.
    pub answers: BTreeMap<Address, i64>,
}

pub fn build_round(round_number: u32, time_limit_ms: u32, rng: &mut ChaCha20Rng) -> SpeedRound {
    let task = match (round_number.saturating_sub(1)) % 3 {
        0 => {
            let a: i64 = rng.random_range(2..50);
            let b: i64 = rng.random_range(2..50);
            match rng.random_range(0..3) {
                0 => SpeedTask::Math {
                    prompt: format!("{} + {}", a, b),
                    answer: a + b,
                },
                1 => SpeedTask::Math {
                    prompt: format!("{} - {}", a, b),
                    answer: a - b,
                },
                _ => SpeedTask::Math {
                    prompt: format!("{} * {}", a, b),
                    answer: a * b,
                },
            }
        }
        1 => {
            let start: i64 = rng.random_range(1..10);
            let step: i64 = rng.random_range(2..9);
            let sequence: Vec<i64> = (0..4).map(|i| start + step * i).collect();
            SpeedTask::Pattern {
                answer: start + step * 4,
                sequence,
            }
        }
        _ => SpeedTask::Reaction {
            go_after_ms: rng.random_range(1_000..4_000),
        },
    };

    SpeedRound {
        task,
        time_limit_ms,
        answers: BTreeMap::new(),
    }
}

impl SpeedRound {
    /// Correct answers score `max(10, 100 - floor(t / 50))`; wrong or
    /// timed-out answers score 0. Reaction rounds count time from the go
    /// signal, and answering before it scores 0 but still counts as answered.
    pub fn score_answer(&self, answer: &str, response_time_ms: u32) -> i64 {
        if response_time_ms > self.time_limit_ms {
            return 0;
        }
        match &self.task {
            SpeedTask::Math { answer: expected, .. }
            | SpeedTask::Pattern { answer: expected, .. } => {
                match answer.trim().parse::<i64>() {
                    Ok(parsed) if parsed == *expected => {
                        (100 - (response_time_ms / 50) as i64).max(10)
                    }
                    _ => 0,
                }
            }
            SpeedTask::Reaction { go_after_ms } => {
                if response_time_ms < *go_after_ms {
                    // Jumped the gun.
                    return 0;
                }
                let elapsed = response_time_ms - go_after_ms;
                (100 - (elapsed / 50) as i64).max(10)
            }
        }
    }

    pub fn submit(
        &mut self,
        player: &Address,
        answer: &str,
        response_time_ms: u32,
    ) -> Result<i64, Error> {
        if self.answers.contains_key(player) {
            return Err(Error::MoveAlreadySubmitted);
        }
        let score = self.score_answer(answer, response_time_ms);
        self.answers.insert(*player, score);
        Ok(score)
    }

    pub fn answered(&self, player: &Address) -> bool {
        self.answers.contains_key(player)
    }

    /// Fallback answer for absent players: usually right but slow, sometimes
    /// wrong, so unattended games still produce a spread.
    pub fn auto_answer(&self, rng: &mut ChaCha20Rng) -> (String, u32) {
        let correct = rng.random_range(0..100) < 80;
        match &self.task {
            SpeedTask::Math { answer, .. } | SpeedTask::Pattern { answer, .. } => {
                let reply = if correct { *answer } else { answer + 1 };
                (reply.to_string(), rng.random_range(1_500..8_000))
            }
            SpeedTask::Reaction { go_after_ms } => {
                let delay = if correct {
                    go_after_ms + rng.random_range(200..1_500)
                } else {
                    go_after_ms.saturating_sub(rng.random_range(1..500))
                };
                ("go".to_string(), delay)
            }
        }
    }
}
