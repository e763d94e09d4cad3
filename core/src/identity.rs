//! Per-wallet identity material.
//!
//! A single signature over [`KEY_DERIVATION_MESSAGE`] yields everything the
//! client needs: the secret (and so the commitment and nullifiers) and the
//! share encryption key. Signing again on another device reproduces both.

use shieldvault_keypair::{SignerError, WalletSigner};
use shieldvault_privacy::{
    Commitment, EncryptedShare, EncryptionKey, KEY_DERIVATION_MESSAGE, Nullifier, OperationType,
    PrivacyError, Secret, decrypt_shares, encrypt_shares,
};
use solana_sdk::pubkey::Pubkey;

use crate::error::ValidationError;

/// Nullifier nonce of one scheduled execution.
///
/// The upper half carries the transfer nonce so two transfers of the same
/// commitment never share a nullifier for the same execution index. Both
/// halves must fit in 32 bits.
pub fn transfer_nullifier_nonce(
    transfer_nonce: u64,
    execution_index: u64,
) -> Result<u64, ValidationError> {
    let half = |field: &'static str, value: u64| {
        u32::try_from(value).map_err(|_| ValidationError::NonceOutOfRange { field, value })
    };
    let high = half("transfer nonce", transfer_nonce)?;
    let low = half("execution index", execution_index)?;
    Ok((u64::from(high) << 32) | u64::from(low))
}

#[derive(Clone)]
pub struct VaultIdentity {
    secret: Secret,
    commitment: Commitment,
    key: EncryptionKey,
    pool_id: Pubkey,
}

impl VaultIdentity {
    pub fn from_signature(signature: &[u8], pool_id: Pubkey) -> Self {
        let secret = Secret::from_signature(signature);
        let commitment = Commitment::generate(&secret, &pool_id.to_bytes());
        Self {
            secret,
            commitment,
            key: EncryptionKey::derive_from_signature(signature),
            pool_id,
        }
    }

    /// Asks the wallet to sign the key-derivation message.
    pub fn sign_in(wallet: &dyn WalletSigner, pool_id: Pubkey) -> Result<Self, SignerError> {
        let signature = wallet.sign_message(KEY_DERIVATION_MESSAGE.as_bytes())?;
        Ok(Self::from_signature(&signature, pool_id))
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn pool_id(&self) -> &Pubkey {
        &self.pool_id
    }

    pub fn withdraw_nullifier(&self, nonce: u64) -> Nullifier {
        Nullifier::derive(&self.secret, OperationType::Withdraw, nonce)
    }

    pub fn transfer_nullifier(
        &self,
        transfer_nonce: u64,
        execution_index: u64,
    ) -> Result<Nullifier, ValidationError> {
        Ok(Nullifier::derive(
            &self.secret,
            OperationType::Transfer,
            transfer_nullifier_nonce(transfer_nonce, execution_index)?,
        ))
    }

    pub fn seal_shares(&self, shares: u64) -> Result<EncryptedShare, PrivacyError> {
        encrypt_shares(shares, &self.key)
    }

    pub fn open_shares(&self, envelope: &EncryptedShare) -> Result<u64, PrivacyError> {
        decrypt_shares(envelope, &self.key)
    }
}

impl std::fmt::Debug for VaultIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultIdentity")
            .field("commitment", &self.commitment)
            .field("pool_id", &self.pool_id)
            .finish_non_exhaustive()
    }
}
