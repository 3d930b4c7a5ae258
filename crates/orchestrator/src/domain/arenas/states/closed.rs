//! Closed state - registration done, waiting out the start countdown.

use super::{HasArenaData, Learning};
use crate::domain::{arenas::{Arena, GameStatus}, games::Game};
use arena_core::Address;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Closed {
    pub arena_address: Address,
    pub closed_at: Option<OffsetDateTime>,
    pub(crate) arena: Arena,
}

impl Closed {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            closed_at: arena.closed_at,
            arena,
        }
    }

    /// The start countdown fired: attach the freshly created game and enter
    /// the learning window.
    pub fn begin_learning(mut self, game: Game, now: OffsetDateTime) -> Learning {
        self.arena.game = Some(game);
        self.arena.game_status = GameStatus::Learning;
        self.arena.learning_started_at = Some(now);
        Learning::from_arena(self.arena)
    }
}

impl HasArenaData for Closed {
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
