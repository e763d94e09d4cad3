//! Share Encryption
//!
//! Encrypts share balances and transfer payloads under a key derived from a
//! wallet signature, using XChaCha20-Poly1305.
//!
//! ```text
//! Flow:
//! 1. Wallet signs KEY_DERIVATION_MESSAGE
//! 2. Encryption key = H(signature)[..32]
//! 3. Random 24-byte nonce per envelope
//! 4. Ciphertext = XChaCha20-Poly1305(key, nonce, plaintext, aad = domain tag)
//!
//! Share envelope (64-byte ledger slot):
//! ┌──────────┬─────────────┬──────────┬──────────────┐
//! │ nonce 24 │ u64 LE ct 8 │ tag 16   │ zero pad 16  │
//! └──────────┴─────────────┴──────────┴──────────────┘
//! ```
//!
//! Encryption gives confidentiality only. Whether a state change is allowed
//! is decided by the ledger from the transaction signature.

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use std::fmt;

use crate::error::PrivacyError;
use crate::hash32;

/// The message every wallet signs to obtain its encryption key.
///
/// Changing a single byte changes every user's key and orphans every stored
/// balance. Treat it as part of the wire format.
pub const KEY_DERIVATION_MESSAGE: &str = "Sign this message to derive your ShieldVault encryption key.\n\nThis signature will be used to encrypt and decrypt your private balance.\n\nIt will not trigger any blockchain transaction or cost any fees.";

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Fixed size of the encrypted share slot in a UserShare account.
pub const ENCRYPTED_SHARE_LEN: usize = 64;
const SHARE_ENVELOPE_LEN: usize = NONCE_LEN + 8 + TAG_LEN;

const PAYLOAD_PLAINTEXT_LEN: usize = 96;
const MEMO_MAX: usize = PAYLOAD_PLAINTEXT_LEN - 32 - 2;
/// Fixed size of an encrypted transfer payload.
pub const ENCRYPTED_PAYLOAD_LEN: usize = NONCE_LEN + PAYLOAD_PLAINTEXT_LEN + TAG_LEN;

const SHARE_AAD: &[u8] = b"shieldvault-share-v1";
const PAYLOAD_AAD: &[u8] = b"shieldvault-transfer-payload-v1";

/// Symmetric key bound to a wallet.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// `H(signature)[..32]` where `signature` is over [`KEY_DERIVATION_MESSAGE`].
    pub fn derive_from_signature(signature: &[u8]) -> Self {
        Self(hash32(&[signature]))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

// ============================================================================
// Share envelope
// ============================================================================

/// Encrypted share count as stored on the ledger.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncryptedShare(pub [u8; ENCRYPTED_SHARE_LEN]);

impl EncryptedShare {
    pub fn from_bytes(bytes: [u8; ENCRYPTED_SHARE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; ENCRYPTED_SHARE_LEN] = bytes
            .try_into()
            .map_err(|_| PrivacyError::length("encrypted share", ENCRYPTED_SHARE_LEN, bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTED_SHARE_LEN] {
        &self.0
    }

    /// Binding hash of the envelope, used to prove which prior balance a
    /// new balance was computed from.
    pub fn digest(&self) -> [u8; 32] {
        hash32(&[b"shieldvault-share-digest", &self.0])
    }
}

impl fmt::Debug for EncryptedShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.digest();
        write!(f, "EncryptedShare({:02x}{:02x}{:02x}{:02x}..)", d[0], d[1], d[2], d[3])
    }
}

/// Encrypt a share count for storage in a UserShare account.
pub fn encrypt_shares(shares: u64, key: &EncryptionKey) -> Result<EncryptedShare, PrivacyError> {
    let nonce = random_nonce();
    let sealed = key
        .cipher()
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &shares.to_le_bytes(),
                aad: SHARE_AAD,
            },
        )
        .map_err(|_| PrivacyError::Encryption)?;

    let mut out = [0u8; ENCRYPTED_SHARE_LEN];
    out[..NONCE_LEN].copy_from_slice(&nonce);
    out[NONCE_LEN..SHARE_ENVELOPE_LEN].copy_from_slice(&sealed);
    Ok(EncryptedShare(out))
}

/// Decrypt a share count.
///
/// Fails with [`PrivacyError::Decryption`] on a wrong key, any modified
/// byte, or non-zero padding.
pub fn decrypt_shares(envelope: &EncryptedShare, key: &EncryptionKey) -> Result<u64, PrivacyError> {
    let bytes = envelope.as_bytes();
    if bytes[SHARE_ENVELOPE_LEN..].iter().any(|b| *b != 0) {
        return Err(PrivacyError::Decryption);
    }

    let plaintext = key
        .cipher()
        .decrypt(
            XNonce::from_slice(&bytes[..NONCE_LEN]),
            Payload {
                msg: &bytes[NONCE_LEN..SHARE_ENVELOPE_LEN],
                aad: SHARE_AAD,
            },
        )
        .map_err(|_| PrivacyError::Decryption)?;

    let arr: [u8; 8] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| PrivacyError::Decryption)?;
    Ok(u64::from_le_bytes(arr))
}

// ============================================================================
// Transfer payload
// ============================================================================

/// Recipient details of a scheduled transfer, hidden from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    pub recipient: [u8; 32],
    pub memo: String,
}

/// Fixed-size sealed [`TransferPayload`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncryptedPayload(pub [u8; ENCRYPTED_PAYLOAD_LEN]);

impl fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedPayload(..)")
    }
}

impl TransferPayload {
    pub fn new(recipient: [u8; 32], memo: impl Into<String>) -> Result<Self, PrivacyError> {
        let memo = memo.into();
        if memo.len() > MEMO_MAX {
            return Err(PrivacyError::MemoTooLong {
                len: memo.len(),
                max: MEMO_MAX,
            });
        }
        Ok(Self { recipient, memo })
    }

    /// Seal into a fixed-length envelope so the ledger cannot infer memo length.
    pub fn seal(&self, key: &EncryptionKey) -> Result<EncryptedPayload, PrivacyError> {
        if self.memo.len() > MEMO_MAX {
            return Err(PrivacyError::MemoTooLong {
                len: self.memo.len(),
                max: MEMO_MAX,
            });
        }

        let mut plaintext = [0u8; PAYLOAD_PLAINTEXT_LEN];
        plaintext[..32].copy_from_slice(&self.recipient);
        plaintext[32..34].copy_from_slice(&(self.memo.len() as u16).to_le_bytes());
        plaintext[34..34 + self.memo.len()].copy_from_slice(self.memo.as_bytes());

        let nonce = random_nonce();
        let sealed = key
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: PAYLOAD_AAD,
                },
            )
            .map_err(|_| PrivacyError::Encryption)?;

        let mut out = [0u8; ENCRYPTED_PAYLOAD_LEN];
        out[..NONCE_LEN].copy_from_slice(&nonce);
        out[NONCE_LEN..].copy_from_slice(&sealed);
        Ok(EncryptedPayload(out))
    }
}

impl EncryptedPayload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; ENCRYPTED_PAYLOAD_LEN] = bytes.try_into().map_err(|_| {
            PrivacyError::length("encrypted payload", ENCRYPTED_PAYLOAD_LEN, bytes.len())
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTED_PAYLOAD_LEN] {
        &self.0
    }

    pub fn open(&self, key: &EncryptionKey) -> Result<TransferPayload, PrivacyError> {
        let plaintext = key
            .cipher()
            .decrypt(
                XNonce::from_slice(&self.0[..NONCE_LEN]),
                Payload {
                    msg: &self.0[NONCE_LEN..],
                    aad: PAYLOAD_AAD,
                },
            )
            .map_err(|_| PrivacyError::Decryption)?;

        let mut recipient = [0u8; 32];
        recipient.copy_from_slice(&plaintext[..32]);
        let memo_len = u16::from_le_bytes([plaintext[32], plaintext[33]]) as usize;
        if memo_len > MEMO_MAX {
            return Err(PrivacyError::Decryption);
        }
        let memo = std::str::from_utf8(&plaintext[34..34 + memo_len])
            .map_err(|_| PrivacyError::Decryption)?
            .to_owned();

        Ok(TransferPayload { recipient, memo })
    }
}

// ============================================================================
// Variable-length blobs
// ============================================================================

/// Seal arbitrary bytes as `nonce || ciphertext || tag`. `aad` names what the
/// blob is so it cannot be replayed as a different record.
pub fn seal_blob(key: &EncryptionKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PrivacyError> {
    let nonce = random_nonce();
    let sealed = key
        .cipher()
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| PrivacyError::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open_blob(key: &EncryptionKey, aad: &[u8], blob: &[u8]) -> Result<Vec<u8>, PrivacyError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(PrivacyError::Decryption);
    }
    key.cipher()
        .decrypt(
            XNonce::from_slice(&blob[..NONCE_LEN]),
            Payload {
                msg: &blob[NONCE_LEN..],
                aad,
            },
        )
        .map_err(|_| PrivacyError::Decryption)
}
