//! Created state - the registration window.

use super::{Closed, HasArenaData};
use crate::domain::arenas::{Arena, GameStatus};
use arena_core::Address;
use time::OffsetDateTime;

/// Initial state: the arena is open and collecting players.
#[derive(Debug, Clone)]
pub struct Created {
    pub arena_address: Address,
    pub created_at: OffsetDateTime,
    pub(crate) arena: Arena,
}

impl Created {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            created_at: arena.created_at,
            arena,
        }
    }

    /// Close registration: the arena filled, the deadline passed with enough
    /// players, or the idle reap fired with at least two players in.
    pub fn close(mut self, now: OffsetDateTime) -> Closed {
        self.arena.is_closed = true;
        self.arena.closed_at = Some(now);
        self.arena.game_status = GameStatus::Waiting;
        Closed::from_arena(self.arena)
    }

    /// Whether the registration deadline has passed. A join at exactly the
    /// deadline still counts; this only reports strictly-later instants.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.arena
            .config
            .registration_deadline
            .is_some_and(|deadline| now > deadline)
    }
}

impl HasArenaData for Created {
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
