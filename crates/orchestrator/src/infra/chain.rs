//! On-chain adapter boundary.
//!
//! The orchestrator never executes transactions; it asks the adapter two
//! questions (did this player pay in, did a submitted finalize land) and
//! hands it refund intents. A production adapter wraps an RPC client; the
//! mock here backs local runs and tests.

use arena_core::{Address, U256};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("chain rpc timed out: {0}")]
    Timeout(String),

    #[error("chain rpc failed: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Timeout(_))
    }
}

/// Result of polling for a submitted finalize authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationReceipt {
    pub tx_hash: String,
    pub success: bool,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Sanity check that the escrow has seen this player's entry fee.
    async fn has_player_joined_onchain(
        &self,
        arena: &Address,
        player: &Address,
    ) -> Result<bool, ChainError>;

    /// Poll for the on-chain result of a finalize authorization submitted
    /// externally. `None` until the transaction is observed.
    async fn observe_finalization(
        &self,
        arena: &Address,
    ) -> Result<Option<FinalizationReceipt>, ChainError>;

    /// Hand a refund intent to the escrow path. Execution is not awaited.
    async fn request_refund(
        &self,
        arena: &Address,
        player: &Address,
        amount: U256,
    ) -> Result<(), ChainError>;
}

/// Chain adapter for local runs: every player is considered paid in unless
/// the test says otherwise, and finalizations appear when queued.
pub struct MockChainClient {
    permissive: bool,
    joined: RwLock<HashSet<(Address, Address)>>,
    finalizations: RwLock<HashMap<Address, FinalizationReceipt>>,
    refunds: RwLock<Vec<(Address, Address, U256)>>,
}

impl MockChainClient {
    /// A client that answers `true` to every join check.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            joined: RwLock::new(HashSet::new()),
            finalizations: RwLock::new(HashMap::new()),
            refunds: RwLock::new(Vec::new()),
        }
    }

    /// A client that only acknowledges joins registered via `mark_joined`.
    pub fn strict() -> Self {
        Self {
            permissive: false,
            ..Self::permissive()
        }
    }

    pub fn mark_joined(&self, arena: Address, player: Address) {
        if let Ok(mut joined) = self.joined.write() {
            joined.insert((arena, player));
        }
    }

    pub fn queue_finalization(&self, arena: Address, receipt: FinalizationReceipt) {
        if let Ok(mut finalizations) = self.finalizations.write() {
            finalizations.insert(arena, receipt);
        }
    }

    pub fn refund_requests(&self) -> Vec<(Address, Address, U256)> {
        self.refunds.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainAdapter for MockChainClient {
    async fn has_player_joined_onchain(
        &self,
        arena: &Address,
        player: &Address,
    ) -> Result<bool, ChainError> {
        if self.permissive {
            return Ok(true);
        }
        let joined = self
            .joined
            .read()
            .map_err(|_| ChainError::Rpc("join set poisoned".to_string()))?;
        Ok(joined.contains(&(*arena, *player)))
    }

    async fn observe_finalization(
        &self,
        arena: &Address,
    ) -> Result<Option<FinalizationReceipt>, ChainError> {
        let finalizations = self
            .finalizations
            .read()
            .map_err(|_| ChainError::Rpc("finalization map poisoned".to_string()))?;
        Ok(finalizations.get(arena).cloned())
    }

    async fn request_refund(
        &self,
        arena: &Address,
        player: &Address,
        amount: U256,
    ) -> Result<(), ChainError> {
        let mut refunds = self
            .refunds
            .write()
            .map_err(|_| ChainError::Rpc("refund log poisoned".to_string()))?;
        refunds.push((*arena, *player, amount));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strict_client_tracks_registered_joins() {
        let client = MockChainClient::strict();
        let arena = Address::synthesize("arena", 1);
        let player = Address::synthesize("player", 2);

        assert!(!client.has_player_joined_onchain(&arena, &player).await.unwrap());
        client.mark_joined(arena, player);
        assert!(client.has_player_joined_onchain(&arena, &player).await.unwrap());
    }

    #[tokio::test]
    async fn finalization_appears_once_queued() {
        let client = MockChainClient::permissive();
        let arena = Address::synthesize("arena", 1);

        assert_eq!(client.observe_finalization(&arena).await.unwrap(), None);
        client.queue_finalization(
            arena,
            FinalizationReceipt {
                tx_hash: "0xabc".to_string(),
                success: true,
            },
        );
        let receipt = client.observe_finalization(&arena).await.unwrap().unwrap();
        assert!(receipt.success);
    }
}
