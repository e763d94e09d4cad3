//! Ledger instructions and their wire encoding.
//!
//! ```text
//! sha256("global:<name>")[..8] || args (little-endian, fixed order)
//! ```
//!
//! The wallet signs the encoded bytes; the ledger verifies that signature
//! before looking at any account.

use sha2::{Digest, Sha256};
use shieldvault_keypair::{SignerError, WalletSigner, verify_signature};
use shieldvault_privacy::{EncryptedPayload, EncryptedShare};
use solana_sdk::pubkey::Pubkey;

/// `sha256("global:<name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Public inputs describing one balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareTransition {
    /// Digest of the encrypted balance this change was computed from.
    /// All zeroes when the position does not exist yet.
    pub prior_share_digest: [u8; 32],
    pub new_share_digest: [u8; 32],
    /// Shares minted (deposit) or burned (withdraw, transfer).
    pub share_delta: u64,
    /// `total_pool_value` the client computed against.
    pub observed_pool_value: u64,
}

impl ShareTransition {
    pub const NO_PRIOR: [u8; 32] = [0u8; 32];

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.prior_share_digest);
        out.extend_from_slice(&self.new_share_digest);
        out.extend_from_slice(&self.share_delta.to_le_bytes());
        out.extend_from_slice(&self.observed_pool_value.to_le_bytes());
    }
}

/// Stand-in for a zero-knowledge ownership proof.
///
/// Binds the transition to the commitment and nullifier with a
/// domain-separated hash so the ledger can reject proofs that were built for
/// a different operation. It proves nothing about the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipProof {
    pub transition: ShareTransition,
    pub proof: [u8; 32],
}

impl OwnershipProof {
    const DOMAIN: &'static [u8] = b"shieldvault-ownership-v1";

    fn transcript(transition: &ShareTransition, commitment: &[u8; 32], nullifier: &[u8; 32]) -> [u8; 32] {
        let mut inputs = Vec::with_capacity(144);
        transition.write(&mut inputs);
        let mut hasher = Sha256::new();
        hasher.update(Self::DOMAIN);
        hasher.update(commitment);
        hasher.update(nullifier);
        hasher.update(&inputs);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    pub fn attest(transition: ShareTransition, commitment: &[u8; 32], nullifier: &[u8; 32]) -> Self {
        Self {
            proof: Self::transcript(&transition, commitment, nullifier),
            transition,
        }
    }

    pub fn verify(&self, commitment: &[u8; 32], nullifier: &[u8; 32]) -> bool {
        Self::transcript(&self.transition, commitment, nullifier) == self.proof
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.transition.write(out);
        out.extend_from_slice(&self.proof);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInstruction {
    /// Signer becomes the pool authority.
    InitializePool { pool_id: Pubkey },
    Deposit {
        pool: Pubkey,
        commitment: [u8; 32],
        amount: u64,
        encrypted_share: EncryptedShare,
        deposit_index: u64,
        transition: ShareTransition,
    },
    Withdraw {
        pool: Pubkey,
        commitment: [u8; 32],
        amount: u64,
        nullifier: [u8; 32],
        new_encrypted_share: EncryptedShare,
        proof: OwnershipProof,
    },
    SetupTransfer {
        pool: Pubkey,
        commitment: [u8; 32],
        transfer_nonce: u64,
        encrypted_payload: EncryptedPayload,
        amount: u64,
        interval_seconds: u32,
    },
    ExecuteTransfer {
        transfer: Pubkey,
        execution_index: u64,
        nullifier: [u8; 32],
        new_encrypted_share: EncryptedShare,
        proof: OwnershipProof,
    },
    /// A due execution that could not be funded.
    RecordSkip {
        transfer: Pubkey,
        commitment: [u8; 32],
        execution_index: u64,
    },
    CancelTransfer {
        transfer: Pubkey,
        commitment: [u8; 32],
    },
    /// Authority-only: sync `total_pool_value` from the yield integration.
    UpdatePoolValue { pool: Pubkey, new_value: u64 },
}

impl LedgerInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerInstruction::InitializePool { .. } => "initialize_pool",
            LedgerInstruction::Deposit { .. } => "deposit",
            LedgerInstruction::Withdraw { .. } => "withdraw",
            LedgerInstruction::SetupTransfer { .. } => "setup_transfer",
            LedgerInstruction::ExecuteTransfer { .. } => "execute_transfer",
            LedgerInstruction::RecordSkip { .. } => "record_skip",
            LedgerInstruction::CancelTransfer { .. } => "cancel_transfer",
            LedgerInstruction::UpdatePoolValue { .. } => "update_pool_value",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&instruction_discriminator(self.name()));
        match self {
            LedgerInstruction::InitializePool { pool_id } => {
                out.extend_from_slice(pool_id.as_ref());
            }
            LedgerInstruction::Deposit {
                pool,
                commitment,
                amount,
                encrypted_share,
                deposit_index,
                transition,
            } => {
                out.extend_from_slice(pool.as_ref());
                out.extend_from_slice(&amount.to_le_bytes());
                out.extend_from_slice(commitment);
                out.extend_from_slice(encrypted_share.as_bytes());
                out.extend_from_slice(&deposit_index.to_le_bytes());
                transition.write(&mut out);
            }
            LedgerInstruction::Withdraw {
                pool,
                commitment,
                amount,
                nullifier,
                new_encrypted_share,
                proof,
            } => {
                out.extend_from_slice(pool.as_ref());
                out.extend_from_slice(&amount.to_le_bytes());
                out.extend_from_slice(nullifier);
                out.extend_from_slice(new_encrypted_share.as_bytes());
                proof.write(&mut out);
                out.extend_from_slice(commitment);
            }
            LedgerInstruction::SetupTransfer {
                pool,
                commitment,
                transfer_nonce,
                encrypted_payload,
                amount,
                interval_seconds,
            } => {
                out.extend_from_slice(pool.as_ref());
                out.extend_from_slice(commitment);
                out.extend_from_slice(&transfer_nonce.to_le_bytes());
                out.extend_from_slice(encrypted_payload.as_bytes());
                out.extend_from_slice(&amount.to_le_bytes());
                out.extend_from_slice(&interval_seconds.to_le_bytes());
            }
            LedgerInstruction::ExecuteTransfer {
                transfer,
                execution_index,
                nullifier,
                new_encrypted_share,
                proof,
            } => {
                out.extend_from_slice(&execution_index.to_le_bytes());
                out.extend_from_slice(transfer.as_ref());
                out.extend_from_slice(nullifier);
                out.extend_from_slice(new_encrypted_share.as_bytes());
                proof.write(&mut out);
            }
            LedgerInstruction::RecordSkip {
                transfer,
                commitment,
                execution_index,
            } => {
                out.extend_from_slice(transfer.as_ref());
                out.extend_from_slice(commitment);
                out.extend_from_slice(&execution_index.to_le_bytes());
            }
            LedgerInstruction::CancelTransfer {
                transfer,
                commitment,
            } => {
                out.extend_from_slice(transfer.as_ref());
                out.extend_from_slice(commitment);
            }
            LedgerInstruction::UpdatePoolValue { pool, new_value } => {
                out.extend_from_slice(pool.as_ref());
                out.extend_from_slice(&new_value.to_le_bytes());
            }
        }
        out
    }
}

/// An instruction plus the wallet signature over its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInstruction {
    pub instruction: LedgerInstruction,
    pub signer: [u8; 32],
    pub signature: Vec<u8>,
}

impl SignedInstruction {
    pub fn sign(
        instruction: LedgerInstruction,
        signer: &dyn WalletSigner,
    ) -> Result<Self, SignerError> {
        let signature = signer.sign_transaction(&instruction.encode())?;
        Ok(Self {
            instruction,
            signer: signer.public_key(),
            signature,
        })
    }

    pub fn verify(&self) -> bool {
        verify_signature(&self.signer, &self.instruction.encode(), &self.signature).is_ok()
    }

    /// Base58 of the signature, used as the transaction id.
    pub fn id(&self) -> String {
        bs58::encode(&self.signature).into_string()
    }
}
