//! arena-core: chain-facing types shared by the orchestrator and escrow tooling
//!
//! Everything in this crate is pure: addresses, token amounts, pool splitting,
//! and the typed-data digest the escrow contract verifies. No I/O, no async.

pub mod digest;
pub mod errors;
pub mod payout;
pub mod types;

pub use digest::*;
pub use errors::*;
pub use payout::*;
pub use types::*;
