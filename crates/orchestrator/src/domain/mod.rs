pub mod agent;
pub mod arenas;
pub mod games;
pub mod scheduler;
pub mod signer;

pub use agent::{AgentSettings, HostAgent, Tier};
pub use arenas::*;
pub use games::{Challenge, Game, GamePhase, Move, MoveResult};
pub use scheduler::{Scheduler, TimerEvent, TimerKey, TimerKind};
pub use signer::FinalizeSigner;

use crate::infra::{chain::ChainError, signing::SigningError, store::StoreError};
use arena_core::{Address, CoreError};
use thiserror::Error;

/// Domain error taxonomy. Validation variants are caller mistakes and never
/// mutate state; infrastructure variants may have been retried before
/// surfacing; `InvariantViolation` freezes the affected arena.
#[derive(Error, Debug)]
pub enum Error {
    // -- validation -------------------------------------------------------
    #[error("arena not found: {0}")]
    NotFound(Address),

    #[error("arena {0} is full")]
    ArenaFull(Address),

    #[error("player {player} already joined arena {arena}")]
    AlreadyJoined { arena: Address, player: Address },

    #[error("registration is closed for arena {0}")]
    RegistrationClosed(Address),

    #[error("registration deadline has passed for arena {0}")]
    DeadlinePassed(Address),

    #[error("player {0} has not paid into the escrow")]
    NotPaidIn(Address),

    #[error("arena {0} is frozen pending operator review")]
    Frozen(Address),

    #[error("game is not accepting moves: {0}")]
    GameNotActive(String),

    #[error("player {0} is not a participant in this game")]
    NotAParticipant(Address),

    #[error("a move for this round was already submitted")]
    MoveAlreadySubmitted,

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("invalid arena configuration: {0}")]
    InvalidConfig(String),

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    // -- finalize authorization ------------------------------------------
    #[error("arena is not closed")]
    ArenaNotClosed,

    #[error("arena is already finalized")]
    AlreadyFinalized,

    #[error("winner {0} is not a player of this arena")]
    InvalidWinner(Address),

    #[error("payout total exceeds the escrowed pool")]
    PayoutExceedsEscrow,

    #[error("finalize nonce already consumed")]
    NonceReused,

    #[error("signing service unavailable: {0}")]
    SigningServiceUnavailable(String),

    // -- infrastructure ---------------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain adapter error: {0}")]
    Chain(#[from] ChainError),

    #[error("arithmetic error: {0}")]
    Core(#[from] CoreError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<SigningError> for Error {
    fn from(e: SigningError) -> Self {
        Error::SigningServiceUnavailable(e.to_string())
    }
}

impl Error {
    /// Internal bugs that must quarantine the arena rather than retry.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_) | Error::Core(_))
    }
}
