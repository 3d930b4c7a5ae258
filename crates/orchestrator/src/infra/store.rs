//! Persistence boundary.
//!
//! The orchestrator only ever talks to a versioned document store: load an
//! arena, write it back with the version it read (conflict means someone
//! else won the race), and append side records. `MemoryStore` is the
//! reference implementation of the contract and the substrate every test
//! runs on; a durable backend implements the same trait.

use crate::domain::{Arena, ArenaState, Tier};
use arena_core::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::RwLock,
};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("arena not found: {0}")]
    NotFound(Address),

    #[error("version conflict: expected {expected}, actual {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("arena already exists: {0}")]
    AlreadyExists(Address),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

/// An arena document plus the version to echo back on update.
#[derive(Debug, Clone)]
pub struct VersionedArena {
    pub version: u64,
    pub arena: Arena,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub arena: Address,
    pub winner: Address,
    pub amount: U256,
    pub rank: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// A request for the escrow to return a sole player's entry fee after an
/// arena cancels. Execution is the escrow's concern; this is the audit
/// record the orchestrator keeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundIntent {
    pub arena: Address,
    pub player: Address,
    pub amount: U256,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeaderboardDelta {
    pub wins: u64,
    pub payouts: U256,
    pub games: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub wins: u64,
    pub total_payouts: U256,
    pub games: u64,
}

/// Agent-facing fill statistics for one tier over a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct FillStats {
    pub created: u32,
    pub filled: u32,
}

impl FillStats {
    pub fn fill_rate(&self) -> Option<f64> {
        if self.created == 0 {
            None
        } else {
            Some(self.filled as f64 / self.created as f64)
        }
    }
}

#[async_trait]
pub trait ArenaStore: Send + Sync {
    async fn insert_arena(&self, arena: Arena) -> Result<u64, StoreError>;

    async fn load_arena(&self, address: &Address) -> Result<Option<VersionedArena>, StoreError>;

    /// Compare-and-swap write: succeeds only when `expected_version` matches
    /// the stored version, returning the new version.
    async fn update_arena(
        &self,
        address: &Address,
        expected_version: u64,
        arena: Arena,
    ) -> Result<u64, StoreError>;

    /// Arenas still accepting players (created, not closed, not cancelled).
    async fn list_open(&self) -> Result<Vec<Arena>, StoreError>;

    /// Fill statistics for agent-created arenas of `tier` created at or
    /// after `since`. An arena counts as filled once it closed into a game.
    async fn agent_fill_stats(
        &self,
        tier: Tier,
        since: OffsetDateTime,
    ) -> Result<FillStats, StoreError>;

    /// Terminal outcomes (newest first) of agent-created arenas of `tier`:
    /// `true` per filled arena, `false` per cancelled one.
    async fn recent_agent_outcomes(
        &self,
        tier: Tier,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError>;

    async fn append_payout_record(&self, record: PayoutRecord) -> Result<(), StoreError>;

    async fn append_refund_intent(&self, intent: RefundIntent) -> Result<(), StoreError>;

    async fn update_leaderboard(
        &self,
        winner: &Address,
        delta: LeaderboardDelta,
    ) -> Result<(), StoreError>;

    /// Display-facing countdown to the next scheduled tournament.
    async fn set_next_tournament_at(&self, at: OffsetDateTime) -> Result<(), StoreError>;

    async fn next_tournament_at(&self) -> Result<Option<OffsetDateTime>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    arenas: HashMap<Address, (u64, Arena)>,
    payout_records: Vec<PayoutRecord>,
    refund_intents: Vec<RefundIntent>,
    leaderboard: HashMap<Address, LeaderboardEntry>,
    next_tournament_at: Option<OffsetDateTime>,
}

/// In-memory `ArenaStore`.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    /// Recorded payouts, for inspection by operators and tests.
    pub fn payout_records(&self) -> Vec<PayoutRecord> {
        self.read().map(|g| g.payout_records.clone()).unwrap_or_default()
    }

    pub fn refund_intents(&self) -> Vec<RefundIntent> {
        self.read().map(|g| g.refund_intents.clone()).unwrap_or_default()
    }

    pub fn leaderboard_entry(&self, player: &Address) -> Option<LeaderboardEntry> {
        self.read().ok().and_then(|g| g.leaderboard.get(player).cloned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArenaStore for MemoryStore {
    async fn insert_arena(&self, arena: Arena) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        if inner.arenas.contains_key(&arena.address) {
            return Err(StoreError::AlreadyExists(arena.address));
        }
        inner.arenas.insert(arena.address, (1, arena));
        Ok(1)
    }

    async fn load_arena(&self, address: &Address) -> Result<Option<VersionedArena>, StoreError> {
        let inner = self.read()?;
        Ok(inner.arenas.get(address).map(|(version, arena)| VersionedArena {
            version: *version,
            arena: arena.clone(),
        }))
    }

    async fn update_arena(
        &self,
        address: &Address,
        expected_version: u64,
        arena: Arena,
    ) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let (version, stored) = inner
            .arenas
            .get_mut(address)
            .ok_or(StoreError::NotFound(*address))?;
        if *version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: *version,
            });
        }
        *version += 1;
        *stored = arena;
        Ok(*version)
    }

    async fn list_open(&self) -> Result<Vec<Arena>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .arenas
            .values()
            .filter(|(_, arena)| arena.state() == ArenaState::Created)
            .map(|(_, arena)| arena.clone())
            .collect())
    }

    async fn agent_fill_stats(
        &self,
        tier: Tier,
        since: OffsetDateTime,
    ) -> Result<FillStats, StoreError> {
        let inner = self.read()?;
        let mut stats = FillStats::default();
        for (_, arena) in inner.arenas.values() {
            if arena.config.tier != Some(tier) || arena.created_at < since {
                continue;
            }
            stats.created += 1;
            if arena.is_closed {
                stats.filled += 1;
            }
        }
        Ok(stats)
    }

    async fn recent_agent_outcomes(
        &self,
        tier: Tier,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError> {
        let inner = self.read()?;
        let mut terminal: Vec<&Arena> = inner
            .arenas
            .values()
            .map(|(_, arena)| arena)
            .filter(|arena| {
                arena.config.tier == Some(tier)
                    && (arena.is_closed || arena.state() == ArenaState::Cancelled)
            })
            .collect();
        terminal.sort_by_key(|arena| std::cmp::Reverse(arena.created_at));
        Ok(terminal
            .into_iter()
            .take(limit)
            .map(|arena| arena.is_closed)
            .collect())
    }

    async fn append_payout_record(&self, record: PayoutRecord) -> Result<(), StoreError> {
        self.write()?.payout_records.push(record);
        Ok(())
    }

    async fn append_refund_intent(&self, intent: RefundIntent) -> Result<(), StoreError> {
        self.write()?.refund_intents.push(intent);
        Ok(())
    }

    async fn update_leaderboard(
        &self,
        winner: &Address,
        delta: LeaderboardDelta,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let entry = inner.leaderboard.entry(*winner).or_default();
        entry.wins += delta.wins;
        entry.total_payouts = entry.total_payouts.saturating_add(delta.payouts);
        entry.games += delta.games;
        Ok(())
    }

    async fn set_next_tournament_at(&self, at: OffsetDateTime) -> Result<(), StoreError> {
        self.write()?.next_tournament_at = Some(at);
        Ok(())
    }

    async fn next_tournament_at(&self) -> Result<Option<OffsetDateTime>, StoreError> {
        Ok(self.read()?.next_tournament_at)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}
