//! Finalized state - terminal; the authorization exists and payouts are fixed.

use super::HasArenaData;
use crate::domain::arenas::Arena;
use arena_core::Address;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Finalized {
    pub arena_address: Address,
    pub finalized_at: Option<OffsetDateTime>,
    pub(crate) arena: Arena,
}

impl Finalized {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            finalized_at: arena.finalized_at,
            arena,
        }
    }
}

impl HasArenaData for Finalized {
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
