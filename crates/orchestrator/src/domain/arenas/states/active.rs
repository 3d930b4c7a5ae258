//! Active state - rounds are running.

use super::{Finished, HasArenaData};
use crate::domain::arenas::{Arena, GameResults, GameStatus};
use arena_core::Address;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Active {
    pub arena_address: Address,
    pub active_started_at: Option<OffsetDateTime>,
    pub(crate) arena: Arena,
}

impl Active {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            active_started_at: arena.active_started_at,
            arena,
        }
    }

    /// The last round resolved: record winners and final scores.
    pub fn finish(
        mut self,
        winners: Vec<Address>,
        results: GameResults,
        now: OffsetDateTime,
    ) -> Finished {
        self.arena.winners = winners;
        self.arena.game_results = Some(results);
        self.arena.game_status = GameStatus::Finished;
        self.arena.finished_at = Some(now);
        Finished::from_arena(self.arena)
    }
}

impl HasArenaData for Active {
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
