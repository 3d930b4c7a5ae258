//! Typestate machine for the arena lifecycle.
//!
//! Each lifecycle state is a separate struct; transitions consume `self` and
//! return the next state, so illegal transitions don't compile. The wrapper
//! enum exists for the places that load an arena of unknown state from the
//! store and for logging.
//!
//! # State Flow
//!
//! ```text
//! Created
//!     ↓  (deadline / idle reap with enough players, or full fill)
//! Closed
//!     ↓  (start countdown fires)
//! Learning
//!     ↓  (learning window ends)
//! Active
//!     ↓  (last round resolves)
//! Finished
//!     ↓  (payouts computed, authorization signed)
//! Finalized
//!
//! (Created can transition to Cancelled; Cancelled and Finalized are terminal)
//! ```

mod active;
mod cancelled;
mod closed;
mod created;
mod finalized;
mod finished;
mod learning;

pub use active::*;
pub use cancelled::*;
pub use closed::*;
pub use created::*;
pub use finalized::*;
pub use finished::*;
pub use learning::*;

use super::{Arena, ArenaState};
use arena_core::Address;
use std::fmt;
use time::OffsetDateTime;

/// Wrapper enum for dynamic dispatch when the state isn't known at compile
/// time: store round-trips and the per-arena command loop.
#[derive(Debug, Clone)]
pub enum ArenaStatus {
    Created(Created),
    Closed(Closed),
    Learning(Learning),
    Active(Active),
    Finished(Finished),
    Finalized(Finalized),
    Cancelled(Cancelled),
}

impl ArenaStatus {
    pub fn arena_address(&self) -> Address {
        match self {
            Self::Created(s) => s.arena_address,
            Self::Closed(s) => s.arena_address,
            Self::Learning(s) => s.arena_address,
            Self::Active(s) => s.arena_address,
            Self::Finished(s) => s.arena_address,
            Self::Finalized(s) => s.arena_address,
            Self::Cancelled(s) => s.arena_address,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Closed(_) => "closed",
            Self::Learning(_) => "learning",
            Self::Active(_) => "active",
            Self::Finished(_) => "finished",
            Self::Finalized(_) => "finalized",
            Self::Cancelled(_) => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized(_) | Self::Cancelled(_))
    }

    /// Transition to Cancelled from any non-terminal state.
    pub fn cancel(self, reason: String, now: OffsetDateTime) -> ArenaStatus {
        if self.is_terminal() {
            return self;
        }
        let arena = self.into_arena();
        ArenaStatus::Cancelled(Cancelled::enter(arena, reason, now))
    }

    pub fn into_arena(self) -> Arena {
        match self {
            Self::Created(s) => s.into_arena(),
            Self::Closed(s) => s.into_arena(),
            Self::Learning(s) => s.into_arena(),
            Self::Active(s) => s.into_arena(),
            Self::Finished(s) => s.into_arena(),
            Self::Finalized(s) => s.into_arena(),
            Self::Cancelled(s) => s.into_arena(),
        }
    }
}

impl fmt::Display for ArenaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Trait for states that hold arena data and can be converted back.
pub trait HasArenaData {
    fn arena(&self) -> &Arena;

    fn arena_mut(&mut self) -> &mut Arena;

    fn into_arena(self) -> Arena;
}

/// Convert an arena loaded from the store into its state wrapper.
impl From<Arena> for ArenaStatus {
    fn from(arena: Arena) -> Self {
        match arena.state() {
            ArenaState::Created => ArenaStatus::Created(Created::from_arena(arena)),
            ArenaState::Closed => ArenaStatus::Closed(Closed::from_arena(arena)),
            ArenaState::Learning => ArenaStatus::Learning(Learning::from_arena(arena)),
            ArenaState::Active => ArenaStatus::Active(Active::from_arena(arena)),
            ArenaState::Finished => ArenaStatus::Finished(Finished::from_arena(arena)),
            ArenaState::Finalized => ArenaStatus::Finalized(Finalized::from_arena(arena)),
            ArenaState::Cancelled => ArenaStatus::Cancelled(Cancelled::from_arena(arena)),
        }
    }
}
