//! Signing service boundary.
//!
//! The operator key lives in an external signing service; the orchestrator
//! only ever submits a 32-byte digest and gets back a 65-byte recoverable
//! signature. `LocalSigner` holds a key in process for local runs and tests,
//! standing in for the remote enclave.

use arena_core::{address_of_key, sign_digest, Address};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("signing service unavailable: {0}")]
    Unavailable(String),

    #[error("signing request rejected: {0}")]
    Rejected(String),
}

impl SigningError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SigningError::Unavailable(_))
    }
}

#[async_trait]
pub trait SigningService: Send + Sync {
    /// Sign a finalize digest with the operator key.
    async fn sign(&self, digest: [u8; 32]) -> Result<[u8; 65], SigningError>;

    /// The address signatures recover to. Published so verifiers and the
    /// escrow deployment can be checked against the running service.
    fn operator_address(&self) -> Address;
}

/// An in-process operator key.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of_key(key.verifying_key());
        Self { key, address }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SigningError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| SigningError::Rejected(format!("invalid operator key: {}", e)))?;
        Ok(Self::new(key))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, SigningError> {
        let stripped = hex_key.trim().strip_prefix("0x").unwrap_or(hex_key.trim());
        let bytes = hex::decode(stripped)
            .map_err(|e| SigningError::Rejected(format!("invalid operator key hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SigningError::Rejected("operator key must be 32 bytes".to_string()))?;
        Self::from_bytes(&bytes)
    }
}

#[async_trait]
impl SigningService for LocalSigner {
    async fn sign(&self, digest: [u8; 32]) -> Result<[u8; 65], SigningError> {
        let signature = sign_digest(&self.key, &digest)
            .map_err(|e| SigningError::Rejected(e.to_string()))?;
        Ok(signature.to_bytes())
    }

    fn operator_address(&self) -> Address {
        self.address
    }
}

/// Wraps a signing service and fails the first N calls with `Unavailable`.
/// Exercises the orchestrator's transient-retry path in tests.
pub struct FlakySigner {
    inner: Arc<dyn SigningService>,
    failures_remaining: AtomicU32,
}

impl FlakySigner {
    pub fn new(inner: Arc<dyn SigningService>, failures: u32) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl SigningService for FlakySigner {
    async fn sign(&self, digest: [u8; 32]) -> Result<[u8; 65], SigningError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SigningError::Unavailable(
                "simulated enclave outage".to_string(),
            ));
        }
        self.inner.sign(digest).await
    }

    fn operator_address(&self) -> Address {
        self.inner.operator_address()
    }
}
