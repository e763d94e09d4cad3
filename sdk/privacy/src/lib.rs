//! ShieldVault Privacy SDK
//!
//! Identity and confidentiality primitives for a shares-based shield pool.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Wallet signature                          │
//! │            (fixed message, signed once per sign-in)              │
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!       ┌───────────────────┐          ┌───────────────────┐
//!       │  Secret (32 B)    │          │ EncryptionKey     │
//!       │  random or        │          │ H(signature)      │
//!       │  signature-bound  │          └─────────┬─────────┘
//!       └────────┬──────────┘                    │
//!                │                               ▼
//!     ┌──────────┴───────────┐         ┌───────────────────┐
//!     ▼                      ▼         │ EncryptedShare    │
//! ┌──────────────┐   ┌──────────────┐  │ nonce|ct|tag|pad  │
//! │ Commitment   │   │ Nullifier    │  │ (64 B slot)       │
//! │ H(s ‖ pool)  │   │ H(s‖op‖n)    │  └───────────────────┘
//! │ account id   │   │ spent once   │
//! └──────────────┘   └──────────────┘
//! ```
//!
//! Everything in this crate is CPU-bound and side-effect free apart from
//! drawing randomness for secrets and nonces.

pub mod commitment;
pub mod encryption;
pub mod error;
pub mod nullifier;

pub use commitment::{Commitment, Secret, verify_commitment};
pub use encryption::{
    ENCRYPTED_PAYLOAD_LEN, ENCRYPTED_SHARE_LEN, EncryptedPayload, EncryptedShare, EncryptionKey,
    KEY_DERIVATION_MESSAGE, TransferPayload, decrypt_shares, encrypt_shares, open_blob, seal_blob,
};
pub use error::PrivacyError;
pub use nullifier::{Nullifier, NullifierNonce, OperationType};

use sha2::{Digest, Sha512};

/// SHA-512 over the concatenated parts, truncated to 32 bytes.
///
/// Every 32-byte identifier in the protocol is derived this way so that the
/// values match what a browser client computes with `nacl.hash(...)[..32]`.
pub(crate) fn hash32(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// Constant-time equality for fixed-size identifiers.
pub(crate) fn ct_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
