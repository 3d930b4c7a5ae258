//! Cancelled state - terminal; the arena never reached a game.

use super::HasArenaData;
use crate::domain::arenas::{Arena, GameStatus};
use arena_core::Address;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Cancelled {
    pub arena_address: Address,
    pub cancelled_at: Option<OffsetDateTime>,
    pub reason: Option<String>,
    pub(crate) arena: Arena,
}

impl Cancelled {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            cancelled_at: arena.cancelled_at,
            reason: arena.cancel_reason.clone(),
            arena,
        }
    }

    pub(crate) fn enter(mut arena: Arena, reason: String, now: OffsetDateTime) -> Self {
        arena.game_status = GameStatus::Cancelled;
        arena.cancelled_at = Some(now);
        arena.cancel_reason = Some(reason);
        Self::from_arena(arena)
    }
}

impl HasArenaData for Cancelled {
    fn arena(&self) -> &Arena {
        &self.arena
    }

    fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    fn into_arena(self) -> Arena {
        self.arena
    }
}
