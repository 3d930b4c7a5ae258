//! Shared error types

use thiserror::Error;

/// Errors produced by the pure chain-facing primitives.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("winner list is empty")]
    NoWinners,

    #[error("winner count {winners} exceeds player count {players}")]
    TooManyWinners { winners: usize, players: u32 },

    #[error("protocol fee {0} bps exceeds the 1000 bps cap")]
    FeeOutOfRange(u16),

    #[error("pool arithmetic overflowed")]
    PoolOverflow,

    #[error("winners and amounts differ in length: {winners} vs {amounts}")]
    LengthMismatch { winners: usize, amounts: usize },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}
