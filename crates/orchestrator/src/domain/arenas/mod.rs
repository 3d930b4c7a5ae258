mod mailbox;
mod orchestrator;
pub mod states;

pub use mailbox::*;
pub use orchestrator::*;

use crate::domain::{agent::Tier, games::Game, Error};
use arena_core::{Address, PayoutScheme, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

pub const MIN_PLAYERS: u32 = 2;
pub const MAX_PLAYERS: u32 = 64;
pub const MAX_FEE_BPS: u16 = 1_000;

/// How many processing errors an arena keeps before dropping the oldest.
const ERROR_HISTORY_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Claw,
    Prediction,
    Speed,
    Blackjack,
}

impl GameType {
    pub fn max_rounds(&self) -> u32 {
        match self {
            GameType::Claw => 1,
            GameType::Prediction => 3,
            GameType::Speed => 10,
            GameType::Blackjack => 5,
        }
    }

    /// Deadline for a single round. Claw plays its whole game in one long
    /// round; the others get the default move timeout per round.
    pub fn round_duration(&self) -> time::Duration {
        match self {
            GameType::Claw => time::Duration::seconds(60),
            _ => time::Duration::milliseconds(crate::config::MOVE_TIMEOUT_DEFAULT_MS as i64),
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameType::Claw => "claw",
            GameType::Prediction => "prediction",
            GameType::Speed => "speed",
            GameType::Blackjack => "blackjack",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    /// EIP-712 `chainId` domain field.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Testnet => 10_143,
            Network::Mainnet => 143,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    Admin,
    Agent,
}

/// Game lifecycle as seen from the arena document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    None,
    Waiting,
    Learning,
    Active,
    Finished,
    Cancelled,
}

/// Immutable-after-creation arena parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub name: String,
    pub entry_fee: U256,
    pub max_players: u32,
    pub protocol_fee_bps: u16,
    pub treasury: Address,
    #[serde(with = "time::serde::rfc3339::option")]
    pub registration_deadline: Option<OffsetDateTime>,
    pub game_type: GameType,
    pub network: Network,
    pub created_by: CreatedBy,
    pub creation_reason: Option<String>,
    #[serde(default)]
    pub payout_scheme: PayoutScheme,
    /// Set when the autonomous agent created this arena; drives fill-rate
    /// statistics per tier.
    #[serde(default)]
    pub tier: Option<Tier>,
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("arena name is empty".to_string()));
        }
        if self.max_players < MIN_PLAYERS || self.max_players > MAX_PLAYERS {
            return Err(Error::InvalidConfig(format!(
                "max_players {} outside {}..={}",
                self.max_players, MIN_PLAYERS, MAX_PLAYERS
            )));
        }
        if self.protocol_fee_bps > MAX_FEE_BPS {
            return Err(Error::InvalidConfig(format!(
                "protocol_fee_bps {} exceeds {}",
                self.protocol_fee_bps, MAX_FEE_BPS
            )));
        }
        if self.entry_fee.is_zero() {
            return Err(Error::InvalidConfig("entry_fee is zero".to_string()));
        }
        Ok(())
    }
}

/// Non-fatal processing errors recorded on the arena, and the diagnostics
/// persisted when an arena freezes.
#[derive(thiserror::Error, Debug, Serialize, Clone, Deserialize)]
pub enum ArenaError {
    #[error("failed to obtain finalize signature: {0}")]
    FailedSigning(String),
    #[error("failed to compute payouts: {0}")]
    FailedPayout(String),
    #[error("failed to persist: {0}")]
    FailedStore(String),
    #[error("chain adapter failed: {0}")]
    FailedChainAdapter(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Final per-player scores kept on the arena after the game ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResults {
    pub rounds_played: u32,
    /// `(player, score)` in final-rank order.
    pub scores: Vec<(Address, i64)>,
}

/// Lifecycle state derived from the arena's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaState {
    Created,
    Closed,
    Learning,
    Active,
    Finished,
    Finalized,
    Cancelled,
}

impl fmt::Display for ArenaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArenaState::Created => "created",
            ArenaState::Closed => "closed",
            ArenaState::Learning => "learning",
            ArenaState::Active => "active",
            ArenaState::Finished => "finished",
            ArenaState::Finalized => "finalized",
            ArenaState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// The root aggregate: one tournament instance with its own escrow,
/// lifecycle, and result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arena {
    pub address: Address,
    pub config: ArenaConfig,

    /// First-join order preserved; used for deterministic tie-breaks.
    pub players: Vec<Address>,

    pub is_closed: bool,
    pub is_finalized: bool,
    /// Set when an invariant violation quarantines the arena.
    pub frozen: bool,
    pub game_status: GameStatus,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub learning_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub active_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finalized_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancel_reason: Option<String>,

    /// The active (or archived) game document.
    pub game: Option<Game>,

    /// Final rank order once the game finishes.
    pub winners: Vec<Address>,
    /// Same length and order as `winners`, in smallest units.
    pub payouts: Vec<U256>,
    pub game_results: Option<GameResults>,

    /// Last consumed finalize nonce; authorizations propose `used_nonce + 1`.
    pub used_nonce: u64,
    pub finalize_signature: Option<Vec<u8>>,

    pub errors: Vec<ArenaError>,
}

impl Arena {
    pub fn new(address: Address, config: ArenaConfig, now: OffsetDateTime) -> Self {
        Self {
            address,
            config,
            players: Vec::new(),
            is_closed: false,
            is_finalized: false,
            frozen: false,
            game_status: GameStatus::None,
            created_at: now,
            closed_at: None,
            learning_started_at: None,
            active_started_at: None,
            finished_at: None,
            finalized_at: None,
            cancelled_at: None,
            cancel_reason: None,
            game: None,
            winners: Vec::new(),
            payouts: Vec::new(),
            game_results: None,
            used_nonce: 0,
            finalize_signature: None,
            errors: Vec::new(),
        }
    }

    pub fn state(&self) -> ArenaState {
        if self.cancelled_at.is_some() || self.game_status == GameStatus::Cancelled {
            return ArenaState::Cancelled;
        }
        if self.is_finalized {
            return ArenaState::Finalized;
        }
        match self.game_status {
            GameStatus::Finished => ArenaState::Finished,
            GameStatus::Active => ArenaState::Active,
            GameStatus::Learning => ArenaState::Learning,
            _ if self.is_closed => ArenaState::Closed,
            _ => ArenaState::Created,
        }
    }

    pub fn game_id(&self) -> Option<Uuid> {
        self.game.as_ref().map(|game| game.id)
    }

    pub fn player_count(&self) -> u32 {
        self.players.len() as u32
    }

    pub fn is_full(&self) -> bool {
        self.player_count() >= self.config.max_players
    }

    pub fn has_player(&self, player: &Address) -> bool {
        self.players.contains(player)
    }

    /// Strict join guards. A join at exactly the registration deadline is
    /// accepted; one tick past is rejected.
    pub fn can_join(&self, player: &Address, now: OffsetDateTime) -> Result<(), Error> {
        if self.frozen {
            return Err(Error::Frozen(self.address));
        }
        if self.state() != ArenaState::Created {
            return Err(Error::RegistrationClosed(self.address));
        }
        if self.has_player(player) {
            return Err(Error::AlreadyJoined {
                arena: self.address,
                player: *player,
            });
        }
        if self.is_full() {
            return Err(Error::ArenaFull(self.address));
        }
        if let Some(deadline) = self.config.registration_deadline {
            if now > deadline {
                return Err(Error::DeadlinePassed(self.address));
            }
        }
        Ok(())
    }

    pub fn record_error(&mut self, error: ArenaError) {
        if self.errors.len() >= ERROR_HISTORY_CAP {
            self.errors.remove(0);
        }
        self.errors.push(error);
    }

    /// Quarantine the arena after an invariant violation. Frozen arenas
    /// accept no further mutations until an operator intervenes.
    pub fn freeze(&mut self, diagnostic: String) {
        self.frozen = true;
        self.record_error(ArenaError::InvariantViolation(diagnostic));
    }
}
