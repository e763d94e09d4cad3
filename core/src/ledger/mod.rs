//! Ledger boundary.
//!
//! The ledger is the only serialization point for conflicting writes. This
//! module defines what the vault needs from it (raw account reads and signed
//! instruction submission), the typed account layouts, and a submitter that
//! retries transient failures without ever double-submitting.

pub mod accounts;
pub mod instruction;
pub mod memory;
pub mod pda;
pub mod submit;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::error::{SubmitError, TransientError, VaultError};
use accounts::AccountData;
use instruction::SignedInstruction;

pub use accounts::{
    CloseReason, DepositHistory, ExecutionStatus, NullifierRecord, ScheduledTransfer, ShieldPool,
    TransferHistory, UserShare,
};
pub use instruction::{LedgerInstruction, OwnershipProof, ShareTransition};
pub use memory::{InMemoryLedger, LedgerRules};
pub use pda::ProgramAddresses;
pub use submit::{Evidence, RetryPolicy, Submission, Submitter};

/// Confirmation returned for an applied instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub signature: String,
    pub slot: u64,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Raw account data, `None` when the account does not exist.
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, TransientError>;

    /// All accounts whose data starts with `discriminator`.
    async fn get_program_accounts(
        &self,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, TransientError>;

    /// Applies the instruction atomically or rejects it.
    async fn submit(&self, tx: SignedInstruction) -> Result<TxReceipt, SubmitError>;
}

/// Reads and decodes one account. Decode failures are errors, not `None`.
pub async fn fetch_account<T: AccountData>(
    ledger: &dyn Ledger,
    address: &Pubkey,
) -> Result<Option<T>, VaultError> {
    match ledger.get_account(address).await? {
        Some(data) => Ok(Some(T::decode(&data)?)),
        None => Ok(None),
    }
}

/// Reads and decodes every account of one kind.
pub async fn fetch_all<T: AccountData>(ledger: &dyn Ledger) -> Result<Vec<(Pubkey, T)>, VaultError> {
    let raw = ledger.get_program_accounts(T::discriminator()).await?;
    raw.into_iter()
        .map(|(address, data)| Ok((address, T::decode(&data)?)))
        .collect()
}
