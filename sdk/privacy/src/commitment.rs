//! Secrets and Commitments
//!
//! ```text
//! Commitment = H(secret || pool_id)
//! ```
//!
//! The commitment is the public account identifier for a user's position in
//! one pool. It is deterministic so the same secret finds the same position
//! across sessions and devices, and it differs per pool so positions in two
//! pools cannot be linked.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PrivacyError;
use crate::{ct_eq, hash32};

/// Domain tag for signature-bound secrets. Keeps the secret independent of
/// the encryption key, which hashes the same signature without a tag.
const SECRET_DOMAIN: &[u8] = b"shieldvault-secret-v1";

/// The user's 32-byte secret. Never leaves the client in plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    /// Draws 32 bytes from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Re-derives the secret from a wallet signature over the fixed
    /// key-derivation message. Same wallet, same secret.
    pub fn from_signature(signature: &[u8]) -> Self {
        Self(hash32(&[SECRET_DOMAIN, signature]))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Length-checked constructor for secrets arriving as untyped bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PrivacyError::length("secret", 32, bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// A commitment binding a secret to a pool (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// `H(secret || pool_id)`.
    pub fn generate(secret: &Secret, pool_id: &[u8; 32]) -> Self {
        Self(hash32(&[secret.as_bytes(), pool_id]))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Length-checked constructor; rejects anything but exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PrivacyError::length("commitment", 32, bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Commitment({}..)", &hex[..12])
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Recomputes the commitment for `(secret, pool_id)` and compares it in
/// constant time.
pub fn verify_commitment(commitment: &Commitment, secret: &Secret, pool_id: &[u8; 32]) -> bool {
    let expected = Commitment::generate(secret, pool_id);
    ct_eq(expected.as_bytes(), commitment.as_bytes())
}
