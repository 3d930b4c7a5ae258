//! EIP-712 typed-data digest for finalize authorizations.
//!
//! The escrow contract verifies a signature over
//! `Finalize(address arena, bytes32 winnersHash, bytes32 amountsHash, uint256 nonce)`
//! under the `ClawArena` domain. The digest here must match the contract's
//! verifier byte for byte; every constant is part of the wire contract.

use crate::{
    errors::CoreError,
    types::{amount_to_word, Address, U256},
};
use k256::{
    ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};
use std::fmt;

pub const DOMAIN_NAME: &str = "ClawArena";
pub const DOMAIN_VERSION: &str = "1";

const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const FINALIZE_TYPE: &str =
    "Finalize(address arena,bytes32 winnersHash,bytes32 amountsHash,uint256 nonce)";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The domain separator binding signatures to this protocol, chain, and arena.
pub fn domain_separator(chain_id: u64, arena: Address) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(keccak256(EIP712_DOMAIN_TYPE.as_bytes()));
    hasher.update(keccak256(DOMAIN_NAME.as_bytes()));
    hasher.update(keccak256(DOMAIN_VERSION.as_bytes()));
    hasher.update(amount_to_word(U256::from(chain_id)));
    hasher.update(arena.to_word());
    hasher.finalize().into()
}

/// Hash of the `Finalize` struct: the arena, the packed rank-ordered winner
/// addresses, the packed 32-byte big-endian amounts, and the nonce.
pub fn finalize_struct_hash(
    arena: Address,
    winners: &[Address],
    amounts: &[U256],
    nonce: u64,
) -> Result<[u8; 32], CoreError> {
    if winners.is_empty() {
        return Err(CoreError::NoWinners);
    }
    if winners.len() != amounts.len() {
        return Err(CoreError::LengthMismatch {
            winners: winners.len(),
            amounts: amounts.len(),
        });
    }

    let mut packed_winners = Vec::with_capacity(winners.len() * 20);
    for winner in winners {
        packed_winners.extend_from_slice(winner.as_bytes());
    }
    let mut packed_amounts = Vec::with_capacity(amounts.len() * 32);
    for amount in amounts {
        packed_amounts.extend_from_slice(&amount_to_word(*amount));
    }

    let mut hasher = Keccak256::new();
    hasher.update(keccak256(FINALIZE_TYPE.as_bytes()));
    hasher.update(arena.to_word());
    hasher.update(keccak256(&packed_winners));
    hasher.update(keccak256(&packed_amounts));
    hasher.update(amount_to_word(U256::from(nonce)));
    Ok(hasher.finalize().into())
}

/// The final signing digest: `keccak256(0x19 || 0x01 || domain || struct)`.
pub fn finalize_digest(
    chain_id: u64,
    arena: Address,
    winners: &[Address],
    amounts: &[U256],
    nonce: u64,
) -> Result<[u8; 32], CoreError> {
    let separator = domain_separator(chain_id, arena);
    let struct_hash = finalize_struct_hash(arena, winners, amounts, nonce)?;

    let mut hasher = Keccak256::new();
    hasher.update([0x19, 0x01]);
    hasher.update(separator);
    hasher.update(struct_hash);
    Ok(hasher.finalize().into())
}

/// A 65-byte `(r, s, v)` recoverable signature with `v` in {27, 28}.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; 65]);

impl RecoverableSignature {
    /// Accepts raw 65-byte signatures, normalizing `v < 27` by adding 27.
    pub fn from_bytes(bytes: [u8; 65]) -> Result<Self, CoreError> {
        let mut bytes = bytes;
        if bytes[64] < 27 {
            bytes[64] += 27;
        }
        if bytes[64] != 27 && bytes[64] != 28 {
            return Err(CoreError::InvalidSignature(format!(
                "recovery byte {} out of range",
                bytes[64]
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let bytes: [u8; 65] = bytes.try_into().map_err(|_| {
            CoreError::InvalidSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        Self::from_bytes(bytes)
    }

    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    pub fn to_bytes(self) -> [u8; 65] {
        self.0
    }

    /// Recover the signer address for `digest`. The verifier side of the
    /// round-trip law: signing then recovering yields the operator address.
    pub fn recover_address(&self, digest: &[u8; 32]) -> Result<Address, CoreError> {
        let signature = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.v() - 27)
            .ok_or_else(|| CoreError::InvalidSignature("bad recovery id".to_string()))?;
        let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
        Ok(address_of_key(&key))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoverableSignature(0x{})", hex::encode(self.0))
    }
}

/// Sign a 32-byte digest with a local secp256k1 key, producing the 65-byte
/// wire form the escrow expects.
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<RecoverableSignature, CoreError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(&signature.to_bytes());
    bytes[64] = 27 + recovery_id.to_byte();
    RecoverableSignature::from_bytes(bytes)
}

/// The Ethereum address of a secp256k1 public key: the low 20 bytes of the
/// keccak hash of the uncompressed point (sans the 0x04 tag).
pub fn address_of_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..32]);
    Address::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x42u8; 32]).unwrap()
    }

    fn sample_inputs() -> (Address, Vec<Address>, Vec<U256>) {
        let arena: Address = "0x1111111111111111111111111111111111111111"
            .parse()
            .unwrap();
        let winners = vec![
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap(),
            "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".parse().unwrap(),
        ];
        let amounts = vec![U256::from(700u64), U256::from(300u64)];
        (arena, winners, amounts)
    }

    #[test]
    fn digest_is_deterministic_and_binding() {
        let (arena, winners, amounts) = sample_inputs();

        let digest = finalize_digest(10143, arena, &winners, &amounts, 1).unwrap();
        let same = finalize_digest(10143, arena, &winners, &amounts, 1).unwrap();
        assert_eq!(digest, same);

        // Every bound field changes the digest.
        let other_chain = finalize_digest(143, arena, &winners, &amounts, 1).unwrap();
        assert_ne!(digest, other_chain);

        let other_nonce = finalize_digest(10143, arena, &winners, &amounts, 2).unwrap();
        assert_ne!(digest, other_nonce);

        let reordered: Vec<Address> = winners.iter().rev().copied().collect();
        let reordered_amounts: Vec<U256> = amounts.iter().rev().copied().collect();
        let swapped =
            finalize_digest(10143, arena, &reordered, &reordered_amounts, 1).unwrap();
        assert_ne!(digest, swapped);
    }

    #[test]
    fn struct_hash_rejects_bad_shapes() {
        let (arena, winners, _) = sample_inputs();
        assert_eq!(
            finalize_struct_hash(arena, &[], &[], 1),
            Err(CoreError::NoWinners)
        );
        assert_eq!(
            finalize_struct_hash(arena, &winners, &[U256::one()], 1),
            Err(CoreError::LengthMismatch {
                winners: 2,
                amounts: 1
            })
        );
    }

    #[test]
    fn sign_then_recover_yields_operator_address() {
        let key = test_key();
        let operator = address_of_key(key.verifying_key());
        let (arena, winners, amounts) = sample_inputs();

        let digest = finalize_digest(10143, arena, &winners, &amounts, 1).unwrap();
        let signature = sign_digest(&key, &digest).unwrap();

        assert!(signature.v() == 27 || signature.v() == 28);
        assert_eq!(signature.recover_address(&digest).unwrap(), operator);

        // A different digest must not recover to the operator.
        let other = finalize_digest(10143, arena, &winners, &amounts, 2).unwrap();
        assert_ne!(signature.recover_address(&other).unwrap(), operator);
    }

    #[test]
    fn low_recovery_bytes_are_normalized() {
        let key = test_key();
        let digest = [7u8; 32];
        let mut bytes = sign_digest(&key, &digest).unwrap().to_bytes();
        bytes[64] -= 27;

        let normalized = RecoverableSignature::from_bytes(bytes).unwrap();
        assert!(normalized.v() == 27 || normalized.v() == 28);

        bytes[64] = 5;
        assert!(RecoverableSignature::from_bytes(bytes).is_err());
    }
}
