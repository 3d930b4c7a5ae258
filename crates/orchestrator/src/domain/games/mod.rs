//! Game engine: a shared phase machine hosting four game protocols.
//!
//! A game is created when its arena closes, shows rules through a fixed
//! learning window, then runs rounds until the type's round count is played out.
//! All randomness comes from a per-game seed, so replaying the same arena
//! with the same join order and move stream reproduces scores exactly.

pub mod blackjack;
pub mod claw;
pub mod prediction;
pub mod speed;

use crate::{
    config::MOVE_TIMEOUT_DEFAULT_MS,
    domain::{arenas::GameType, Error},
};
use arena_core::Address;
use blackjack::{BlackjackAction, BlackjackRound};
use claw::ClawRound;
use itertools::Itertools;
use prediction::PredictionRound;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use speed::SpeedRound;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Waiting,
    Learning,
    Active,
    Finished,
}

/// The live round state, one variant per game type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "game")]
pub enum Challenge {
    Claw(ClawRound),
    Prediction(PredictionRound),
    Speed(SpeedRound),
    Blackjack(BlackjackRound),
}

/// A player's move, validated once at the engine boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "game")]
pub enum Move {
    Claw { x: f64, y: f64 },
    Prediction { guess: i64 },
    Speed { answer: String, response_time_ms: u32 },
    Blackjack { action: BlackjackAction },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayer {
    pub address: Address,
    pub score: i64,
    /// Secondary ranking key, lower is better. Claw writes its last-grab
    /// sequence here at game end; other games leave it at zero so join
    /// order decides.
    pub tiebreak: i64,
}

#[derive(Debug, Clone)]
pub struct MoveResult {
    pub player: Address,
    pub score_delta: i64,
    pub total_score: i64,
    pub round_number: u32,
    pub round_resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Advanced,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub arena: Address,
    pub game_type: GameType,
    pub phase: GamePhase,
    /// 1-based; 0 until the first round starts.
    pub round_number: u32,
    pub max_rounds: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub round_deadline: Option<OffsetDateTime>,
    pub challenge: Option<Challenge>,
    /// Join order preserved from the arena.
    pub players: Vec<GamePlayer>,
    /// Final rank order, filled when the game finishes.
    pub winners: Vec<Address>,
    /// Monotonic move counter, drives time-based tie-breaks.
    pub move_seq: u64,
    /// Arena creation instant in unix nanos; part of the seed derivation.
    pub seed_anchor_nanos: i128,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Seed derivation contract: `SHA-256(arena || anchor_be || round_be || context)`
/// feeding ChaCha20. Auto-play and replay both depend on this being stable.
fn derive_rng(arena: &Address, anchor_nanos: i128, round: u32, context: &[u8]) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(arena.as_bytes());
    hasher.update(anchor_nanos.to_be_bytes());
    hasher.update(round.to_be_bytes());
    hasher.update(context);
    ChaCha20Rng::from_seed(hasher.finalize().into())
}

impl Game {
    pub fn new(
        arena: Address,
        game_type: GameType,
        players: &[Address],
        seed_anchor: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            arena,
            game_type,
            phase: GamePhase::Learning,
            round_number: 0,
            max_rounds: game_type.max_rounds(),
            round_deadline: None,
            challenge: None,
            players: players
                .iter()
                .map(|address| GamePlayer {
                    address: *address,
                    score: 0,
                    tiebreak: 0,
                })
                .collect(),
            winners: Vec::new(),
            move_seq: 0,
            seed_anchor_nanos: seed_anchor.unix_timestamp_nanos(),
            created_at: now,
        }
    }

    pub fn rng(&self, round: u32, context: &[u8]) -> ChaCha20Rng {
        derive_rng(&self.arena, self.seed_anchor_nanos, round, context)
    }

    /// Learning window over: open round one.
    pub fn start_active(&mut self, now: OffsetDateTime) -> Result<(), Error> {
        if self.phase != GamePhase::Learning {
            return Err(Error::InvalidTransition(format!(
                "cannot activate a game in phase {:?}",
                self.phase
            )));
        }
        self.phase = GamePhase::Active;
        self.start_round(1, now);
        Ok(())
    }

    fn start_round(&mut self, round: u32, now: OffsetDateTime) {
        self.round_number = round;
        let addresses: Vec<Address> = self.players.iter().map(|p| p.address).collect();
        let mut rng = self.rng(round, b"challenge");
        let challenge = match self.game_type {
            GameType::Claw => Challenge::Claw(claw::build_round(&addresses, &mut rng)),
            GameType::Prediction => {
                Challenge::Prediction(prediction::build_round(round, &mut rng))
            }
            GameType::Speed => Challenge::Speed(speed::build_round(
                round,
                MOVE_TIMEOUT_DEFAULT_MS as u32,
                &mut rng,
            )),
            GameType::Blackjack => {
                let arena = self.arena;
                let anchor = self.seed_anchor_nanos;
                Challenge::Blackjack(blackjack::build_round(&addresses, round, |context| {
                    let mut tagged = b"deal:".to_vec();
                    tagged.extend_from_slice(context);
                    derive_rng(&arena, anchor, round, &tagged)
                }))
            }
        };
        self.challenge = Some(challenge);
        self.round_deadline = Some(now + self.game_type.round_duration());
    }

    fn player_index(&self, player: &Address) -> Option<usize> {
        self.players.iter().position(|p| p.address == *player)
    }

    /// Submit one move for the current round. Rejects anything outside an
    /// active round; whether repeat submissions are allowed is the game
    /// type's call (claw spends attempts, blackjack hits until it stands).
    pub fn submit_move(
        &mut self,
        player: &Address,
        mv: &Move,
        now: OffsetDateTime,
    ) -> Result<MoveResult, Error> {
        if self.phase != GamePhase::Active {
            return Err(Error::GameNotActive(format!(
                "game phase is {:?}",
                self.phase
            )));
        }
        let player_index = self
            .player_index(player)
            .ok_or(Error::NotAParticipant(*player))?;
        if let Some(deadline) = self.round_deadline {
            if now > deadline {
                return Err(Error::DeadlineExceeded);
            }
        }

        let seq = self.move_seq;
        self.move_seq += 1;

        let challenge = self
            .challenge
            .as_mut()
            .ok_or_else(|| Error::GameNotActive("no round is open".to_string()))?;
        let score_delta = match (challenge, mv) {
            (Challenge::Claw(round), Move::Claw { x, y }) => {
                round.apply_grab(player, *x, *y, seq)?
            }
            (Challenge::Prediction(round), Move::Prediction { guess }) => {
                round.submit(player, *guess)?
            }
            (Challenge::Speed(round), Move::Speed { answer, response_time_ms }) => {
                round.submit(player, answer, *response_time_ms)?
            }
            (Challenge::Blackjack(round), Move::Blackjack { action }) => {
                round.apply(player, *action)?;
                // Blackjack hands settle against the dealer at resolution.
                0
            }
            _ => {
                return Err(Error::InvalidMove(format!(
                    "move does not match a {} game",
                    self.game_type
                )))
            }
        };

        self.players[player_index].score += score_delta;

        Ok(MoveResult {
            player: *player,
            score_delta,
            total_score: self.players[player_index].score,
            round_number: self.round_number,
            round_resolved: self.round_complete(),
        })
    }

    /// Whether every player has nothing left to do this round.
    pub fn round_complete(&self) -> bool {
        match &self.challenge {
            Some(Challenge::Claw(round)) => round.exhausted(),
            Some(Challenge::Prediction(round)) => {
                self.players.iter().all(|p| round.answered(&p.address))
            }
            Some(Challenge::Speed(round)) => {
                self.players.iter().all(|p| round.answered(&p.address))
            }
            Some(Challenge::Blackjack(round)) => round.all_done(),
            None => false,
        }
    }

    /// Fill in moves for players who never acted, drawing from the
    /// pre-registered seed so the outcome is identical no matter when the
    /// deadline fires. Auto moves score through the same paths as live ones.
    fn apply_auto_moves(&mut self) {
        let arena = self.arena;
        let anchor = self.seed_anchor_nanos;
        let round_number = self.round_number;
        let addresses: Vec<Address> = self.players.iter().map(|p| p.address).collect();

        let Some(challenge) = self.challenge.as_mut() else {
            return;
        };
        let mut deltas: Vec<(usize, i64)> = Vec::new();

        match challenge {
            Challenge::Claw(round) => {
                for (index, address) in addresses.iter().enumerate() {
                    let mut rng = derive_rng(&arena, anchor, round_number, &auto_context(address));
                    while round.attempts_left(address) > 0 {
                        let (x, y) = round.auto_target(&mut rng);
                        let seq = self.move_seq;
                        self.move_seq += 1;
                        if let Ok(value) = round.apply_grab(address, x, y, seq) {
                            deltas.push((index, value));
                        }
                    }
                }
            }
            Challenge::Prediction(round) => {
                for (index, address) in addresses.iter().enumerate() {
                    if round.answered(address) {
                        continue;
                    }
                    let mut rng = derive_rng(&arena, anchor, round_number, &auto_context(address));
                    let guess = round.auto_guess(&mut rng);
                    if let Ok(score) = round.submit(address, guess) {
                        deltas.push((index, score));
                    }
                }
            }
            Challenge::Speed(round) => {
                for (index, address) in addresses.iter().enumerate() {
                    if round.answered(address) {
                        continue;
                    }
                    let mut rng = derive_rng(&arena, anchor, round_number, &auto_context(address));
                    let (answer, time) = round.auto_answer(&mut rng);
                    if let Ok(score) = round.submit(address, &answer, time) {
                        deltas.push((index, score));
                    }
                }
            }
            Challenge::Blackjack(round) => {
                for address in &addresses {
                    if !round.player_done(address) {
                        let _ = round.auto_play(address);
                    }
                }
            }
        }

        for (index, delta) in deltas {
            self.players[index].score += delta;
        }
    }

    /// Blackjack settles its hands against the dealer here; the other games
    /// already scored at submission.
    fn resolve_round(&mut self) {
        if let Some(Challenge::Blackjack(round)) = self.challenge.as_mut() {
            let deltas = round.resolve();
            for (address, delta) in deltas {
                if let Some(index) = self.players.iter().position(|p| p.address == address) {
                    self.players[index].score += delta;
                }
            }
        }
    }

    /// Close the current round (deadline fired or everyone moved): auto-play
    /// absentees, settle, and either open the next round or finish.
    pub fn advance(&mut self, now: OffsetDateTime) -> Result<RoundOutcome, Error> {
        if self.phase != GamePhase::Active {
            return Err(Error::GameNotActive(format!(
                "game phase is {:?}",
                self.phase
            )));
        }
        self.apply_auto_moves();
        self.resolve_round();

        if self.round_number < self.max_rounds {
            let next = self.round_number + 1;
            self.start_round(next, now);
            Ok(RoundOutcome::Advanced)
        } else {
            self.finish();
            Ok(RoundOutcome::Finished)
        }
    }

    fn finish(&mut self) {
        if let Some(Challenge::Claw(round)) = &self.challenge {
            for player in &mut self.players {
                player.tiebreak = round
                    .progress
                    .get(&player.address)
                    .and_then(|p| p.last_grab_seq)
                    .map(|seq| seq as i64)
                    .unwrap_or(i64::MAX);
            }
        }
        self.winners = self.compute_winners();
        self.phase = GamePhase::Finished;
        self.round_deadline = None;
    }

    /// All players in final rank order: score descending, then the game's
    /// tie-break, then join order.
    pub fn final_ranking(&self) -> Vec<Address> {
        self.players
            .iter()
            .enumerate()
            .sorted_by_key(|(join_index, p)| (-p.score, p.tiebreak, *join_index))
            .map(|(_, p)| p.address)
            .collect()
    }

    /// Winners are the players that actually scored, in rank order; a game
    /// where nobody scored still pays its top rank.
    fn compute_winners(&self) -> Vec<Address> {
        let ranking = self.final_ranking();
        let positive: Vec<Address> = ranking
            .iter()
            .filter(|address| self.score_of(address).unwrap_or(0) > 0)
            .copied()
            .collect();
        if positive.is_empty() {
            ranking.into_iter().take(1).collect()
        } else {
            positive
        }
    }

    pub fn score_of(&self, player: &Address) -> Option<i64> {
        self.players
            .iter()
            .find(|p| p.address == *player)
            .map(|p| p.score)
    }

    /// Final scores in rank order, for the arena document.
    pub fn ranked_scores(&self) -> Vec<(Address, i64)> {
        self.final_ranking()
            .into_iter()
            .map(|address| (address, self.score_of(&address).unwrap_or(0)))
            .collect()
    }
}

fn auto_context(player: &Address) -> Vec<u8> {
    let mut context = b"auto:".to_vec();
    context.extend_from_slice(player.as_bytes());
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn players(n: usize) -> Vec<Address> {
        (0..n)
            .map(|i| Address::synthesize("player", i as i128))
            .collect()
    }

    fn active_game(game_type: GameType, n: usize) -> (Game, Vec<Address>) {
        let players = players(n);
        let arena = Address::synthesize("arena", 42);
        let mut game = Game::new(arena, game_type, &players, T0, T0);
        game.start_active(T0 + time::Duration::seconds(60)).unwrap();
        (game, players)
    }

    #[test]
    fn learning_phase_accepts_no_moves() {
        let players = players(2);
        let mut game = Game::new(
            Address::synthesize("arena", 1),
            GameType::Prediction,
            &players,
            T0,
            T0,
        );
        assert_eq!(game.phase, GamePhase::Learning);
        let result = game.submit_move(&players[0], &Move::Prediction { guess: 1 }, T0);
        assert!(matches!(result, Err(Error::GameNotActive(_))));
    }

    #[test]
    fn prediction_round_flow() {
        let (mut game, players) = active_game(GameType::Prediction, 2);
        let now = T0 + time::Duration::seconds(61);

        let first = game
            .submit_move(&players[0], &Move::Prediction { guess: 500 }, now)
            .unwrap();
        assert!(!first.round_resolved);

        let second = game
            .submit_move(&players[1], &Move::Prediction { guess: 400 }, now)
            .unwrap();
        assert!(second.round_resolved);

        assert_eq!(game.advance(now).unwrap(), RoundOutcome::Advanced);
        assert_eq!(game.round_number, 2);
    }

    #[test]
    fn wrong_move_shape_rejected() {
        let (mut game, players) = active_game(GameType::Prediction, 2);
        let result = game.submit_move(
            &players[0],
            &Move::Claw { x: 1.0, y: 1.0 },
            T0 + time::Duration::seconds(61),
        );
        assert!(matches!(result, Err(Error::InvalidMove(_))));
    }

    #[test]
    fn outsider_rejected() {
        let (mut game, _) = active_game(GameType::Prediction, 2);
        let outsider = Address::synthesize("outsider", 99);
        let result = game.submit_move(
            &outsider,
            &Move::Prediction { guess: 1 },
            T0 + time::Duration::seconds(61),
        );
        assert!(matches!(result, Err(Error::NotAParticipant(_))));
    }

    #[test]
    fn late_move_rejected() {
        let (mut game, players) = active_game(GameType::Prediction, 2);
        let past_deadline = game.round_deadline.unwrap() + time::Duration::milliseconds(1);
        let result = game.submit_move(&players[0], &Move::Prediction { guess: 1 }, past_deadline);
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn game_runs_to_completion_on_auto_play() {
        for game_type in [
            GameType::Claw,
            GameType::Prediction,
            GameType::Speed,
            GameType::Blackjack,
        ] {
            let (mut game, _) = active_game(game_type, 3);
            let mut now = T0 + time::Duration::seconds(61);

            let mut rounds = 0;
            loop {
                rounds += 1;
                assert!(rounds <= game.max_rounds, "{} ran too many rounds", game_type);
                now += game_type.round_duration();
                match game.advance(now).unwrap() {
                    RoundOutcome::Advanced => continue,
                    RoundOutcome::Finished => break,
                }
            }

            assert_eq!(rounds, game.max_rounds);
            assert_eq!(game.phase, GamePhase::Finished);
            assert!(!game.winners.is_empty());
            assert!(game.advance(now).is_err());
        }
    }

    #[test]
    fn auto_play_is_deterministic() {
        let run = |game_type| {
            let (mut game, _) = active_game(game_type, 4);
            let mut now = T0 + time::Duration::seconds(61);
            loop {
                now += time::Duration::seconds(60);
                if game.advance(now).unwrap() == RoundOutcome::Finished {
                    break;
                }
            }
            (
                game.winners.clone(),
                game.players.iter().map(|p| p.score).collect::<Vec<_>>(),
            )
        };

        for game_type in [
            GameType::Claw,
            GameType::Prediction,
            GameType::Speed,
            GameType::Blackjack,
        ] {
            assert_eq!(run(game_type), run(game_type), "{} not deterministic", game_type);
        }
    }

    #[test]
    fn replaying_recorded_moves_reproduces_scores() {
        let (mut original, players) = active_game(GameType::Prediction, 2);
        let now = T0 + time::Duration::seconds(61);

        let mut recorded: Vec<(Address, Move)> = Vec::new();
        for round in 0..original.max_rounds {
            let time = now + time::Duration::seconds(5 * round as i64);
            for player in &players {
                let mv = Move::Prediction {
                    guess: 100 * (round as i64 + 1),
                };
                original.submit_move(player, &mv, time).unwrap();
                recorded.push((*player, mv));
            }
            original.advance(time).unwrap();
        }
        let original_scores: Vec<i64> = original.players.iter().map(|p| p.score).collect();

        let (mut replay, _) = active_game(GameType::Prediction, 2);
        let mut iter = recorded.into_iter();
        for round in 0..replay.max_rounds {
            let time = now + time::Duration::seconds(5 * round as i64);
            for _ in 0..players.len() {
                let (player, mv) = iter.next().unwrap();
                replay.submit_move(&player, &mv, time).unwrap();
            }
            replay.advance(time).unwrap();
        }
        let replay_scores: Vec<i64> = replay.players.iter().map(|p| p.score).collect();

        assert_eq!(original_scores, replay_scores);
    }

    #[test]
    fn ranking_breaks_ties_by_join_order() {
        let (mut game, players) = active_game(GameType::Prediction, 3);
        game.players[0].score = 50;
        game.players[1].score = 80;
        game.players[2].score = 50;

        let ranking = game.final_ranking();
        assert_eq!(ranking, vec![players[1], players[0], players[2]]);
    }

    #[test]
    fn claw_tiebreak_prefers_earlier_last_grab() {
        let (mut game, players) = active_game(GameType::Claw, 2);
        let now = T0 + time::Duration::seconds(61);

        // Seed a controlled field: two identical prizes.
        if let Some(Challenge::Claw(round)) = game.challenge.as_mut() {
            round.prizes = vec![
                claw::Prize { x: 10.0, y: 10.0, rarity: claw::Rarity::Common, grabbed: false },
                claw::Prize { x: 90.0, y: 90.0, rarity: claw::Rarity::Common, grabbed: false },
            ];
        }

        game.submit_move(&players[1], &Move::Claw { x: 10.0, y: 10.0 }, now)
            .unwrap();
        game.submit_move(&players[0], &Move::Claw { x: 90.0, y: 90.0 }, now)
            .unwrap();
        // Burn the remaining attempts away from any prize.
        for _ in 0..2 {
            game.submit_move(&players[0], &Move::Claw { x: 50.0, y: 0.0 }, now)
                .unwrap();
            game.submit_move(&players[1], &Move::Claw { x: 50.0, y: 0.0 }, now)
                .unwrap();
        }

        assert_eq!(game.advance(now).unwrap(), RoundOutcome::Finished);
        // Equal scores; the second joiner grabbed first and outranks.
        assert_eq!(game.winners, vec![players[1], players[0]]);
    }

    #[test]
    fn winners_need_a_positive_score() {
        let (mut game, players) = active_game(GameType::Prediction, 3);
        game.players[0].score = 40;
        game.players[1].score = 0;
        game.players[2].score = 12;
        game.finish();
        assert_eq!(game.winners, vec![players[0], players[2]]);

        let (mut game, players) = active_game(GameType::Prediction, 2);
        game.players[0].score = 0;
        game.players[1].score = 0;
        game.finish();
        assert_eq!(game.winners, vec![players[0]]);
    }
}
