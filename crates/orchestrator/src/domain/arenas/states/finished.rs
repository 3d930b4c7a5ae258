//! Finished state - winners known, awaiting the finalize authorization.

use super::{Finalized, HasArenaData};
use crate::domain::arenas::Arena;
use arena_core::{Address, U256};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Finished {
    pub arena_address: Address,
    pub finished_at: Option<OffsetDateTime>,
    pub(crate) arena: Arena,
}

impl Finished {
    pub fn from_arena(arena: Arena) -> Self {
        Self {
            arena_address: arena.address,
            finished_at: arena.finished_at,
            arena,
        }
    }

    /// Payouts were computed and the signing service authorized them:
    /// consume the nonce and record the signature. At most one finalize per
    /// arena; the nonce guard upstream enforces it.
    pub fn finalize(
        mut self,
        payouts: Vec<U256>,
        nonce: u64,
        signature: Vec<u8>,
        now: OffsetDateTime,
    ) -> Finalized {
        self.arena.payouts = payouts;
        self.arena.used_nonce = nonce;
        self.arena.finalize_signature = Some(signature);
        self.arena.is_finalized = true;
        self.arena.finalized_at = Some(now);
        Finalized::from_arena(self.arena)
    }
}

impl HasArenaData for Finished {
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
