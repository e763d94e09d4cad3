//! Program-derived account addresses.

use solana_sdk::pubkey::Pubkey;

use crate::constants::{
    DEPOSIT_HISTORY_SEED, HISTORY_SEED, NULLIFIER_SEED, SHIELD_POOL_SEED, TRANSFER_SEED,
    USER_SHARE_SEED,
};

/// Derives every account address the vault touches from the program id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramAddresses {
    program_id: Pubkey,
}

impl ProgramAddresses {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn pool(&self, pool_id: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[SHIELD_POOL_SEED, pool_id.as_ref()], &self.program_id)
    }

    /// One UserShare per (pool, commitment).
    pub fn user_share(&self, pool: &Pubkey, commitment: &[u8; 32]) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[USER_SHARE_SEED, pool.as_ref(), commitment],
            &self.program_id,
        )
    }

    pub fn transfer(&self, commitment: &[u8; 32], transfer_nonce: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[TRANSFER_SEED, commitment, &transfer_nonce.to_le_bytes()],
            &self.program_id,
        )
    }

    pub fn nullifier(&self, nullifier: &[u8; 32]) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[NULLIFIER_SEED, nullifier], &self.program_id)
    }

    pub fn history(&self, transfer: &Pubkey, execution_index: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[HISTORY_SEED, transfer.as_ref(), &execution_index.to_le_bytes()],
            &self.program_id,
        )
    }

    pub fn deposit_history(&self, commitment: &[u8; 32], deposit_index: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[DEPOSIT_HISTORY_SEED, commitment, &deposit_index.to_le_bytes()],
            &self.program_id,
        )
    }
}
