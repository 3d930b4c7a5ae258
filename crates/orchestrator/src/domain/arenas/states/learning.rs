//! Learning state - rules are on screen, no moves count.

use super::{Active, HasArenaData};
use crate::domain::arenas::{Arena, GameStatus};
use arena_core::Address;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Learning {
    pub arena_address: Address,
    pub learning_started_at: Option<OffsetDateTime>,
    pub(crate) arena: Arena,
}

impl Learning {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            learning_started_at: arena.learning_started_at,
            arena,
        }
    }

    /// The learning window elapsed; the first round is live. The caller has
    /// already started the game's first round and its deadline.
    pub fn activate(mut self, now: OffsetDateTime) -> Active {
        self.arena.game_status = GameStatus::Active;
        self.arena.active_started_at = Some(now);
        Active::from_arena(self.arena)
    }
}

impl HasArenaData for Learning {
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
