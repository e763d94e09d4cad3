//! Nullifiers
//!
//! Implements nullifier derivation for double-spend prevention.
//!
//! ```text
//! Nullifier = H(secret || op_type || nonce_le)
//! ```
//!
//! The ledger refuses to create a second nullifier record for the same
//! value, so each `(secret, op_type, nonce)` triple authorizes exactly one
//! debit. Callers must never reuse a nonce for the same operation type.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::commitment::Secret;
use crate::error::PrivacyError;
use crate::hash32;

/// Operation a nullifier is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Withdraw,
    Transfer,
}

impl OperationType {
    /// Domain string mixed into the hash.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            OperationType::Withdraw => b"withdraw",
            OperationType::Transfer => b"transfer",
        }
    }

    /// Single-byte tag used in ledger account layouts.
    pub fn tag(&self) -> u8 {
        match self {
            OperationType::Withdraw => 0,
            OperationType::Transfer => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(OperationType::Withdraw),
            1 => Some(OperationType::Transfer),
            _ => None,
        }
    }
}

/// A nullifier (32 bytes) - one-time tag the ledger marks spent
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn derive(secret: &Secret, op: OperationType, nonce: u64) -> Self {
        Self(hash32(&[secret.as_bytes(), op.as_bytes(), &nonce.to_le_bytes()]))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PrivacyError::length("nullifier", 32, bytes.len()))?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Nullifier({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Nonce source for withdrawal nullifiers.
///
/// Scheduled transfers do not use this: their nonce is derived from the
/// transfer nonce and the execution index, both tracked by the ledger.
#[derive(Debug)]
pub struct NullifierNonce {
    next: AtomicU64,
}

impl NullifierNonce {
    /// Monotonic counter starting at `start`.
    pub fn counter(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Counter seeded from the CSPRNG so independent processes do not collide.
    pub fn random() -> Self {
        Self::counter(rand::rngs::OsRng.next_u64())
    }

    /// Returns the next nonce. Never repeats within this source.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullifier_deterministic() {
        let secret = Secret::from_bytes([3u8; 32]);
        let n1 = Nullifier::derive(&secret, OperationType::Withdraw, 7);
        let n2 = Nullifier::derive(&secret, OperationType::Withdraw, 7);
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_nullifier_differs_per_nonce() {
        let secret = Secret::generate();
        let n1 = Nullifier::derive(&secret, OperationType::Transfer, 0);
        let n2 = Nullifier::derive(&secret, OperationType::Transfer, 1);
        assert_ne!(n1, n2, "distinct nonces must give distinct nullifiers");
    }

    #[test]
    fn test_nullifier_differs_per_operation() {
        let secret = Secret::generate();
        let w = Nullifier::derive(&secret, OperationType::Withdraw, 0);
        let t = Nullifier::derive(&secret, OperationType::Transfer, 0);
        assert_ne!(w, t);
    }

    #[test]
    fn test_nullifier_differs_per_secret() {
        let a = Nullifier::derive(&Secret::from_bytes([1u8; 32]), OperationType::Withdraw, 5);
        let b = Nullifier::derive(&Secret::from_bytes([2u8; 32]), OperationType::Withdraw, 5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_never_repeats() {
        let nonces = NullifierNonce::counter(u64::MAX - 2);
        let a = nonces.next();
        let b = nonces.next();
        assert_ne!(a, b);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_operation_tag_roundtrip() {
        for op in [OperationType::Withdraw, OperationType::Transfer] {
            assert_eq!(OperationType::from_tag(op.tag()), Some(op));
        }
        assert_eq!(OperationType::from_tag(9), None);
    }

    #[test]
    fn test_from_slice_rejects_short_input() {
        assert!(Nullifier::from_slice(&[0u8; 20]).is_err());
    }
}
