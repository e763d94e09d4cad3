use chacha20poly1305::aead::OsRng;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("wallet declined to sign")]
    Declined,
    #[error("malformed signature: expected 64 bytes, got {0}")]
    MalformedSignature(usize),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Signing capability handed to the core. The core never inspects key
/// material; it only asks for signatures.
pub trait WalletSigner: Send + Sync {
    /// 32-byte ed25519 public key.
    fn public_key(&self) -> [u8; 32];

    /// Signs an off-chain message (for example the key-derivation message).
    fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// Signs serialized transaction bytes.
    fn sign_transaction(&self, tx: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// Base58 address.
    fn address(&self) -> String {
        bs58::encode(self.public_key()).into_string()
    }
}

/// A wallet holding its own ed25519 key.
/// NEVER expose this struct's internals.
pub struct LocalWallet {
    signing_key: SigningKey,
}

impl LocalWallet {
    /// Generates a fresh random wallet.
    pub fn new_random() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a wallet from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }
}

impl WalletSigner for LocalWallet {
    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn sign_transaction(&self, tx: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(tx).to_bytes().to_vec())
    }
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Keypair derived from a wallet signature.
///
/// `seed = SHA-256(signature)`, used directly as the ed25519 secret. The same
/// wallet signing the same message always lands on the same keypair, so the
/// server can rebuild a user's identity from a fresh sign-in without storing
/// anything.
pub struct DerivedKeypair {
    signing_key: SigningKey,
}

impl DerivedKeypair {
    pub fn from_signature(signature: &[u8]) -> Self {
        let digest = Sha256::digest(signature);
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key_base58(&self) -> String {
        self.address()
    }
}

impl WalletSigner for DerivedKeypair {
    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn sign_transaction(&self, tx: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(tx).to_bytes().to_vec())
    }
}

impl fmt::Debug for DerivedKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeypair")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}

/// Verifies an ed25519 signature produced by a [`WalletSigner`].
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignerError> {
    let vk = VerifyingKey::from_bytes(public_key).map_err(|_| SignerError::InvalidPublicKey)?;
    let sig = Signature::from_slice(signature)
        .map_err(|_| SignerError::MalformedSignature(signature.len()))?;
    vk.verify(message, &sig)
        .map_err(|_| SignerError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_keypair_is_idempotent() {
        let wallet = LocalWallet::from_seed(&[1u8; 32]);
        let sig = wallet.sign_message(b"derive me").unwrap();

        let a = DerivedKeypair::from_signature(&sig);
        let b = DerivedKeypair::from_signature(&sig);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.public_key_base58(), b.public_key_base58());
    }

    #[test]
    fn test_derived_keypair_differs_from_wallet() {
        let wallet = LocalWallet::from_seed(&[2u8; 32]);
        let sig = wallet.sign_message(b"derive me").unwrap();
        let derived = DerivedKeypair::from_signature(&sig);
        assert_ne!(derived.public_key(), wallet.public_key());
    }

    #[test]
    fn test_wallet_signatures_are_deterministic() {
        // ed25519 signing is deterministic, which key derivation relies on.
        let wallet = LocalWallet::from_seed(&[3u8; 32]);
        assert_eq!(
            wallet.sign_message(b"m").unwrap(),
            wallet.sign_message(b"m").unwrap()
        );
    }

    #[test]
    fn test_verify_signature() {
        let wallet = LocalWallet::new_random();
        let sig = wallet.sign_transaction(b"tx bytes").unwrap();

        assert!(verify_signature(&wallet.public_key(), b"tx bytes", &sig).is_ok());
        assert_eq!(
            verify_signature(&wallet.public_key(), b"other bytes", &sig),
            Err(SignerError::VerificationFailed)
        );
        assert_eq!(
            verify_signature(&wallet.public_key(), b"tx bytes", &sig[..10]),
            Err(SignerError::MalformedSignature(10))
        );
    }

    #[test]
    fn test_address_is_base58() {
        let wallet = LocalWallet::from_seed(&[4u8; 32]);
        let decoded = bs58::decode(wallet.address()).into_vec().unwrap();
        assert_eq!(decoded, wallet.public_key());
    }

    #[test]
    fn test_debug_hides_key() {
        let wallet = LocalWallet::from_seed(&[5u8; 32]);
        let shown = format!("{wallet:?}");
        assert!(shown.contains("address"));
        assert!(!shown.contains("signing_key"));
    }
}
