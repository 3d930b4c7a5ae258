//! Finalize authorization.
//!
//! Validates a terminal arena's proposed distribution, builds the canonical
//! typed-data digest, and asks the signing service for the authorization the
//! escrow contract will accept. The orchestrator never touches the operator
//! key; a transient signing-service outage is retried with bounded backoff
//! before surfacing.

use crate::{
    domain::{
        arenas::{Arena, ArenaState},
        Error,
    },
    infra::signing::SigningService,
};
use arena_core::{finalize_digest, split_pool, PayoutScheme, RecoverableSignature, Address, U256};
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub struct SignerSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

pub struct FinalizeSigner {
    service: Arc<dyn SigningService>,
    settings: SignerSettings,
}

impl FinalizeSigner {
    pub fn new(service: Arc<dyn SigningService>, settings: SignerSettings) -> Self {
        Self { service, settings }
    }

    pub fn operator_address(&self) -> Address {
        self.service.operator_address()
    }

    /// Validate and sign a finalize authorization for `arena`.
    ///
    /// Preconditions, all of which must hold:
    /// 1. the arena is closed, its game finished, and not yet finalized;
    /// 2. every winner is a player;
    /// 3. winner and amount lists match and are non-empty;
    /// 4. the amounts don't exceed the pool net of the protocol fee;
    /// 5. `nonce` is exactly one past the last consumed nonce.
    pub async fn sign_finalize(
        &self,
        arena: &Arena,
        winners: &[Address],
        amounts: &[U256],
        nonce: u64,
    ) -> Result<RecoverableSignature, Error> {
        if arena.is_finalized {
            return Err(Error::AlreadyFinalized);
        }
        if !arena.is_closed || arena.state() != ArenaState::Finished {
            return Err(Error::ArenaNotClosed);
        }
        if winners.is_empty() || winners.len() != amounts.len() {
            return Err(Error::InvariantViolation(format!(
                "finalize shape: {} winners, {} amounts",
                winners.len(),
                amounts.len()
            )));
        }
        for winner in winners {
            if !arena.has_player(winner) {
                return Err(Error::InvalidWinner(*winner));
            }
        }

        // Recompute the escrow ceiling rather than trusting the caller's sum.
        let ceiling = split_pool(
            arena.config.entry_fee,
            arena.player_count(),
            arena.config.protocol_fee_bps,
            winners.len(),
            PayoutScheme::EqualSplit,
        )?
        .available;
        let mut total = U256::zero();
        for amount in amounts {
            total = total
                .checked_add(*amount)
                .ok_or(Error::PayoutExceedsEscrow)?;
        }
        if total > ceiling {
            return Err(Error::PayoutExceedsEscrow);
        }

        if nonce != arena.used_nonce + 1 {
            return Err(Error::NonceReused);
        }

        let digest = finalize_digest(
            arena.config.network.chain_id(),
            arena.address,
            winners,
            amounts,
            nonce,
        )?;
        debug!(
            "Finalize digest for arena {} nonce {}: 0x{}",
            arena.address,
            nonce,
            hex::encode(digest)
        );

        let signature = self.sign_with_backoff(digest, &arena.address).await?;

        // The authorization is worthless unless it recovers to the operator.
        let recovered = signature.recover_address(&digest)?;
        let operator = self.service.operator_address();
        if recovered != operator {
            return Err(Error::InvariantViolation(format!(
                "signature recovers to {} instead of operator {}",
                recovered, operator
            )));
        }

        info!(
            "Signed finalize authorization for arena {} (nonce {}, {} winners)",
            arena.address,
            nonce,
            winners.len()
        );
        Ok(signature)
    }

    async fn sign_with_backoff(
        &self,
        digest: [u8; 32],
        arena: &Address,
    ) -> Result<RecoverableSignature, Error> {
        let mut backoff = self.settings.backoff_base;
        let mut last_error = String::new();

        for attempt in 1..=self.settings.max_attempts {
            match self.service.sign(digest).await {
                Ok(bytes) => {
                    return RecoverableSignature::from_bytes(bytes).map_err(Error::Core);
                }
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(
                        "Signing service unavailable for arena {} (attempt {}/{}): {}",
                        arena, attempt, self.settings.max_attempts, e
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.backoff_cap);
                }
                Err(e) => return Err(Error::SigningServiceUnavailable(e.to_string())),
            }
        }
        Err(Error::SigningServiceUnavailable(last_error))
    }
}
