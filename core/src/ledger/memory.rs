//! In-process authoritative ledger.
//!
//! Holds encoded account bytes keyed by address and applies each signed
//! instruction under a single lock. Every instruction loads what it needs
//! into a staging overlay; writes reach the account map only if the whole
//! instruction succeeds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::{debug, error, info};
use shieldvault_config::VaultConfig;
use shieldvault_privacy::OperationType;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;

use super::accounts::{
    AccountData, CloseReason, DepositHistory, ExecutionStatus, NullifierRecord, ScheduledTransfer,
    ShieldPool, TransferHistory, UserShare,
};
use super::instruction::{LedgerInstruction, OwnershipProof, ShareTransition, SignedInstruction};
use super::pda::ProgramAddresses;
use super::{Ledger, TxReceipt};
use crate::clock::SharedClock;
use crate::constants::{
    MAX_CONSECUTIVE_SKIPS, MAX_DEPOSIT, MAX_TRANSFER_INTERVAL, MIN_DEPOSIT, MIN_TRANSFER_INTERVAL,
};
use crate::error::{LedgerError, SubmitError, TransientError};
use crate::pool::math;

/// Limits the ledger enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRules {
    pub min_deposit: u64,
    pub max_deposit: u64,
    pub min_interval: u32,
    pub max_interval: u32,
    pub max_consecutive_skips: u8,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            min_deposit: MIN_DEPOSIT,
            max_deposit: MAX_DEPOSIT,
            min_interval: MIN_TRANSFER_INTERVAL,
            max_interval: MAX_TRANSFER_INTERVAL,
            max_consecutive_skips: MAX_CONSECUTIVE_SKIPS,
        }
    }
}

impl LedgerRules {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            min_deposit: config.pool.min_deposit,
            max_deposit: config.pool.max_deposit,
            min_interval: config.transfers.min_interval_secs,
            max_interval: config.transfers.max_interval_secs,
            max_consecutive_skips: config.transfers.max_consecutive_skips,
        }
    }

    pub fn check_interval(&self, interval_seconds: u32) -> Result<(), LedgerError> {
        if interval_seconds < self.min_interval || interval_seconds > self.max_interval {
            return Err(LedgerError::InvalidInterval);
        }
        Ok(())
    }

    pub fn check_deposit(&self, amount: u64) -> Result<(), LedgerError> {
        if amount < self.min_deposit {
            return Err(LedgerError::InsufficientDeposit);
        }
        if amount > self.max_deposit {
            return Err(LedgerError::DepositExceedsMaximum);
        }
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<Pubkey, Vec<u8>>,
    slot: u64,
}

/// Pending writes of one instruction.
struct Staged<'a> {
    base: &'a BTreeMap<Pubkey, Vec<u8>>,
    writes: BTreeMap<Pubkey, Vec<u8>>,
}

impl<'a> Staged<'a> {
    fn new(base: &'a BTreeMap<Pubkey, Vec<u8>>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    fn exists(&self, address: &Pubkey) -> bool {
        self.writes.contains_key(address) || self.base.contains_key(address)
    }

    fn load<T: AccountData>(&self, address: &Pubkey) -> Result<Option<T>, LedgerError> {
        let Some(data) = self.writes.get(address).or_else(|| self.base.get(address)) else {
            return Ok(None);
        };
        T::decode(data).map(Some).map_err(|e| {
            error!("stored account {address} failed to decode: {e}");
            LedgerError::AccountNotFound
        })
    }

    fn require<T: AccountData>(&self, address: &Pubkey) -> Result<T, LedgerError> {
        self.load(address)?.ok_or(LedgerError::AccountNotFound)
    }

    fn store<T: AccountData>(&mut self, address: Pubkey, account: &T) {
        self.writes.insert(address, account.encode());
    }

    fn create<T: AccountData>(&mut self, address: Pubkey, account: &T) -> Result<(), LedgerError> {
        if self.exists(&address) {
            return Err(LedgerError::AccountAlreadyExists);
        }
        self.store(address, account);
        Ok(())
    }
}

fn active_pool(staged: &Staged<'_>, address: &Pubkey) -> Result<ShieldPool, LedgerError> {
    match staged.load::<ShieldPool>(address)? {
        Some(pool) if pool.is_active => Ok(pool),
        _ => Err(LedgerError::PoolNotInitialized),
    }
}

/// Checks a debit (withdraw or transfer execution) against the stored
/// balance envelope and the current pool, returning the shares to burn.
fn check_debit(
    pool: &ShieldPool,
    share: &UserShare,
    amount: u64,
    new_share_digest: [u8; 32],
    commitment: &[u8; 32],
    nullifier: &[u8; 32],
    proof: &OwnershipProof,
) -> Result<u64, LedgerError> {
    if !proof.verify(commitment, nullifier) {
        return Err(LedgerError::InvalidProof);
    }
    let t = &proof.transition;
    if t.new_share_digest != new_share_digest {
        return Err(LedgerError::InvalidProof);
    }
    if t.prior_share_digest != share.encrypted_share_amount.digest() {
        return Err(LedgerError::StaleShareState);
    }

    let burned = math::shares_for_withdrawal(amount, pool.total_pool_value, pool.total_shares)?;
    if burned != t.share_delta {
        return Err(LedgerError::StaleShareState);
    }
    if burned > pool.total_shares {
        return Err(LedgerError::InsufficientBalance);
    }
    Ok(burned)
}

fn apply_debit(pool: &mut ShieldPool, amount: u64, burned: u64) -> Result<(), LedgerError> {
    pool.total_pool_value = pool
        .total_pool_value
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientBalance)?;
    pool.total_shares = pool
        .total_shares
        .checked_sub(burned)
        .ok_or(LedgerError::InsufficientBalance)?;
    if pool.total_shares == 0 && pool.total_pool_value != 0 {
        // Rounding dust with no remaining owner.
        debug!("pool emptied, dropping {} units of dust", pool.total_pool_value);
        pool.total_pool_value = 0;
    }
    pool.nonce = pool.nonce.wrapping_add(1);
    Ok(())
}

pub struct InMemoryLedger {
    addresses: ProgramAddresses,
    rules: LedgerRules,
    clock: SharedClock,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(addresses: ProgramAddresses, rules: LedgerRules, clock: SharedClock) -> Self {
        Self {
            addresses,
            rules,
            clock,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn addresses(&self) -> &ProgramAddresses {
        &self.addresses
    }

    pub fn rules(&self) -> &LedgerRules {
        &self.rules
    }

    /// Number of stored accounts.
    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    fn apply(
        &self,
        staged: &mut Staged<'_>,
        signer: Pubkey,
        instruction: &LedgerInstruction,
    ) -> Result<(), LedgerError> {
        let now = self.clock.now();
        match instruction {
            LedgerInstruction::InitializePool { pool_id } => {
                let (address, bump) = self.addresses.pool(pool_id);
                staged.create(
                    address,
                    &ShieldPool {
                        pool_id: *pool_id,
                        authority: signer,
                        total_pool_value: 0,
                        total_shares: 0,
                        last_yield_update: now,
                        nonce: 0,
                        is_active: true,
                        bump,
                    },
                )
            }

            LedgerInstruction::Deposit {
                pool: pool_address,
                commitment,
                amount,
                encrypted_share,
                deposit_index,
                transition,
            } => {
                self.rules.check_deposit(*amount)?;
                let mut pool = active_pool(staged, pool_address)?;

                let minted =
                    math::shares_for_deposit(*amount, pool.total_pool_value, pool.total_shares)?;
                if minted != transition.share_delta {
                    return Err(LedgerError::StaleShareState);
                }
                if transition.new_share_digest != encrypted_share.digest() {
                    return Err(LedgerError::InvalidProof);
                }

                let (share_address, share_bump) = self.addresses.user_share(pool_address, commitment);
                let prior = staged.load::<UserShare>(&share_address)?;
                let prior_digest = prior
                    .as_ref()
                    .map(|s| s.encrypted_share_amount.digest())
                    .unwrap_or(ShareTransition::NO_PRIOR);
                if prior_digest != transition.prior_share_digest {
                    return Err(LedgerError::StaleShareState);
                }

                let (history_address, history_bump) =
                    self.addresses.deposit_history(commitment, *deposit_index);
                staged.create(
                    history_address,
                    &DepositHistory {
                        commitment: *commitment,
                        deposit_index: *deposit_index,
                        amount: *amount,
                        shares_minted: minted,
                        timestamp: now,
                        bump: history_bump,
                    },
                )?;

                pool.total_pool_value = pool
                    .total_pool_value
                    .checked_add(*amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                pool.total_shares = pool
                    .total_shares
                    .checked_add(minted)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                pool.nonce = pool.nonce.wrapping_add(1);
                staged.store(*pool_address, &pool);

                staged.store(
                    share_address,
                    &UserShare {
                        pool: *pool_address,
                        user_commitment: *commitment,
                        encrypted_share_amount: *encrypted_share,
                        last_update: now,
                        bump: prior.map(|s| s.bump).unwrap_or(share_bump),
                    },
                );
                Ok(())
            }

            LedgerInstruction::Withdraw {
                pool: pool_address,
                commitment,
                amount,
                nullifier,
                new_encrypted_share,
                proof,
            } => {
                let mut pool = active_pool(staged, pool_address)?;
                if *amount == 0 {
                    return Err(LedgerError::InvalidAmount);
                }
                let (nullifier_address, nullifier_bump) = self.addresses.nullifier(nullifier);
                if staged.exists(&nullifier_address) {
                    return Err(LedgerError::NullifierAlreadyUsed);
                }

                let (share_address, _) = self.addresses.user_share(pool_address, commitment);
                let mut share = staged.require::<UserShare>(&share_address)?;
                let burned = check_debit(
                    &pool,
                    &share,
                    *amount,
                    new_encrypted_share.digest(),
                    commitment,
                    nullifier,
                    proof,
                )?;

                apply_debit(&mut pool, *amount, burned)?;
                staged.store(*pool_address, &pool);

                share.encrypted_share_amount = *new_encrypted_share;
                share.last_update = now;
                staged.store(share_address, &share);

                staged.create(
                    nullifier_address,
                    &NullifierRecord {
                        nullifier: *nullifier,
                        operation_type: OperationType::Withdraw,
                        used_at: now,
                        bump: nullifier_bump,
                    },
                )
            }

            LedgerInstruction::SetupTransfer {
                pool: pool_address,
                commitment,
                transfer_nonce,
                encrypted_payload,
                amount,
                interval_seconds,
            } => {
                active_pool(staged, pool_address)?;
                if *amount == 0 {
                    return Err(LedgerError::InvalidAmount);
                }
                self.rules.check_interval(*interval_seconds)?;

                let next_execution = now
                    .checked_add(i64::from(*interval_seconds))
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                let (address, bump) = self.addresses.transfer(commitment, *transfer_nonce);
                staged.create(
                    address,
                    &ScheduledTransfer {
                        transfer_id: address,
                        pool: *pool_address,
                        user_commitment: *commitment,
                        transfer_nonce: *transfer_nonce,
                        encrypted_payload: *encrypted_payload,
                        amount: *amount,
                        interval_seconds: *interval_seconds,
                        next_execution,
                        is_active: true,
                        close_reason: CloseReason::Open,
                        skip_count: 0,
                        execution_count: 0,
                        total_transferred: 0,
                        created_at: now,
                        bump,
                    },
                )
            }

            LedgerInstruction::ExecuteTransfer {
                transfer: transfer_address,
                execution_index,
                nullifier,
                new_encrypted_share,
                proof,
            } => {
                let mut transfer = staged.require::<ScheduledTransfer>(transfer_address)?;
                let mut pool = active_pool(staged, &transfer.pool)?;

                let (nullifier_address, nullifier_bump) = self.addresses.nullifier(nullifier);
                if staged.exists(&nullifier_address) {
                    return Err(LedgerError::NullifierAlreadyUsed);
                }
                if !transfer.is_active {
                    return Err(LedgerError::TransferNotActive);
                }
                if !transfer.is_due(now) {
                    return Err(LedgerError::TransferNotDue);
                }
                if *execution_index != transfer.execution_count {
                    return Err(LedgerError::InvalidExecutionIndex);
                }

                let (share_address, _) = self
                    .addresses
                    .user_share(&transfer.pool, &transfer.user_commitment);
                let mut share = staged.require::<UserShare>(&share_address)?;
                let burned = check_debit(
                    &pool,
                    &share,
                    transfer.amount,
                    new_encrypted_share.digest(),
                    &transfer.user_commitment,
                    nullifier,
                    proof,
                )?;

                apply_debit(&mut pool, transfer.amount, burned)?;
                staged.store(transfer.pool, &pool);

                share.encrypted_share_amount = *new_encrypted_share;
                share.last_update = now;
                staged.store(share_address, &share);

                let (history_address, history_bump) =
                    self.addresses.history(transfer_address, *execution_index);
                staged.create(
                    history_address,
                    &TransferHistory {
                        transfer: *transfer_address,
                        execution_index: *execution_index,
                        amount: transfer.amount,
                        status: ExecutionStatus::Completed,
                        executed_at: now,
                        bump: history_bump,
                    },
                )?;
                staged.create(
                    nullifier_address,
                    &NullifierRecord {
                        nullifier: *nullifier,
                        operation_type: OperationType::Transfer,
                        used_at: now,
                        bump: nullifier_bump,
                    },
                )?;

                transfer.next_execution = transfer
                    .following_execution()
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                transfer.execution_count += 1;
                transfer.total_transferred = transfer
                    .total_transferred
                    .checked_add(transfer.amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                transfer.skip_count = 0;
                staged.store(*transfer_address, &transfer);
                Ok(())
            }

            LedgerInstruction::RecordSkip {
                transfer: transfer_address,
                commitment,
                execution_index,
            } => {
                let mut transfer = staged.require::<ScheduledTransfer>(transfer_address)?;
                if transfer.user_commitment != *commitment {
                    return Err(LedgerError::Unauthorized);
                }
                if !transfer.is_active {
                    return Err(LedgerError::TransferNotActive);
                }
                if !transfer.is_due(now) {
                    return Err(LedgerError::TransferNotDue);
                }
                if *execution_index != transfer.execution_count {
                    return Err(LedgerError::InvalidExecutionIndex);
                }

                let (history_address, history_bump) =
                    self.addresses.history(transfer_address, *execution_index);
                staged.create(
                    history_address,
                    &TransferHistory {
                        transfer: *transfer_address,
                        execution_index: *execution_index,
                        amount: 0,
                        status: ExecutionStatus::Skipped,
                        executed_at: now,
                        bump: history_bump,
                    },
                )?;

                transfer.next_execution = transfer
                    .following_execution()
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                transfer.execution_count += 1;
                transfer.skip_count = transfer.skip_count.saturating_add(1);
                if transfer.skip_count >= self.rules.max_consecutive_skips {
                    transfer.is_active = false;
                    transfer.close_reason = CloseReason::Exhausted;
                }
                staged.store(*transfer_address, &transfer);
                Ok(())
            }

            LedgerInstruction::CancelTransfer {
                transfer: transfer_address,
                commitment,
            } => {
                let mut transfer = staged.require::<ScheduledTransfer>(transfer_address)?;
                if transfer.user_commitment != *commitment {
                    return Err(LedgerError::Unauthorized);
                }
                if !transfer.is_active {
                    return Err(LedgerError::TransferAlreadyCancelled);
                }
                transfer.is_active = false;
                transfer.close_reason = CloseReason::Cancelled;
                staged.store(*transfer_address, &transfer);
                Ok(())
            }

            LedgerInstruction::UpdatePoolValue {
                pool: pool_address,
                new_value,
            } => {
                let mut pool = active_pool(staged, pool_address)?;
                if pool.authority != signer {
                    return Err(LedgerError::Unauthorized);
                }
                if (pool.total_shares == 0) != (*new_value == 0) {
                    return Err(LedgerError::InvalidShareCalculation);
                }
                pool.total_pool_value = *new_value;
                pool.last_yield_update = now;
                pool.nonce = pool.nonce.wrapping_add(1);
                staged.store(*pool_address, &pool);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, TransientError> {
        Ok(self.state.lock().await.accounts.get(address).cloned())
    }

    async fn get_program_accounts(
        &self,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, TransientError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .iter()
            .filter(|(_, data)| data.starts_with(&discriminator))
            .map(|(address, data)| (*address, data.clone()))
            .collect())
    }

    async fn submit(&self, tx: SignedInstruction) -> Result<TxReceipt, SubmitError> {
        if !tx.verify() {
            return Err(SubmitError::Rejected(LedgerError::Unauthorized));
        }
        let signer = Pubkey::new_from_array(tx.signer);
        let name = tx.instruction.name();

        let mut state = self.state.lock().await;
        let writes = {
            let mut staged = Staged::new(&state.accounts);
            self.apply(&mut staged, signer, &tx.instruction)
                .map_err(|e| {
                    debug!("{name} rejected: {e}");
                    SubmitError::Rejected(e)
                })?;
            staged.writes
        };

        state.accounts.extend(writes);
        state.slot += 1;
        info!("{name} applied at slot {}", state.slot);
        Ok(TxReceipt {
            signature: tx.id(),
            slot: state.slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use shieldvault_keypair::{LocalWallet, WalletSigner};
    use shieldvault_privacy::{EncryptedPayload, EncryptedShare, ENCRYPTED_PAYLOAD_LEN};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000;

    struct Fixture {
        ledger: InMemoryLedger,
        clock: Arc<ManualClock>,
        authority: LocalWallet,
        user: LocalWallet,
        pool: Pubkey,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = InMemoryLedger::new(
            ProgramAddresses::new(Pubkey::new_from_array([7u8; 32])),
            LedgerRules::default(),
            clock.clone(),
        );
        let authority = LocalWallet::from_seed(&[1u8; 32]);
        let pool_id = Pubkey::new_from_array([2u8; 32]);
        submit(&ledger, &authority, LedgerInstruction::InitializePool { pool_id })
            .await
            .unwrap();
        let pool = ledger.addresses().pool(&pool_id).0;
        Fixture {
            ledger,
            clock,
            authority,
            user: LocalWallet::from_seed(&[3u8; 32]),
            pool,
        }
    }

    async fn submit(
        ledger: &InMemoryLedger,
        signer: &LocalWallet,
        ix: LedgerInstruction,
    ) -> Result<TxReceipt, SubmitError> {
        ledger
            .submit(SignedInstruction::sign(ix, signer).unwrap())
            .await
    }

    async fn pool_state(f: &Fixture) -> ShieldPool {
        let data = f.ledger.get_account(&f.pool).await.unwrap().unwrap();
        ShieldPool::decode(&data).unwrap()
    }

    fn envelope(tag: u8) -> EncryptedShare {
        EncryptedShare::from_bytes([tag; 64])
    }

    fn deposit_ix(f: &Fixture, amount: u64, minted: u64, prior: [u8; 32], index: u64) -> LedgerInstruction {
        let share = envelope(index as u8 + 10);
        LedgerInstruction::Deposit {
            pool: f.pool,
            commitment: [9u8; 32],
            amount,
            encrypted_share: share,
            deposit_index: index,
            transition: ShareTransition {
                prior_share_digest: prior,
                new_share_digest: share.digest(),
                share_delta: minted,
                observed_pool_value: 0,
            },
        }
    }

    #[tokio::test]
    async fn first_deposit_bootstraps_one_to_one() {
        let f = fixture().await;
        submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 1_000_000, ShareTransition::NO_PRIOR, 0))
            .await
            .unwrap();
        let pool = pool_state(&f).await;
        assert_eq!((pool.total_pool_value, pool.total_shares), (1_000_000, 1_000_000));
        assert!(pool.is_consistent());
    }

    #[tokio::test]
    async fn deposit_limits_and_stale_delta() {
        let f = fixture().await;
        let err = submit(&f.ledger, &f.user, deposit_ix(&f, 1, 1, ShareTransition::NO_PRIOR, 0)).await;
        assert_eq!(err, Err(SubmitError::Rejected(LedgerError::InsufficientDeposit)));

        let err = submit(
            &f.ledger,
            &f.user,
            deposit_ix(&f, 2_000_000_000_000, 2_000_000_000_000, ShareTransition::NO_PRIOR, 0),
        )
        .await;
        assert_eq!(err, Err(SubmitError::Rejected(LedgerError::DepositExceedsMaximum)));

        let err = submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 999_999, ShareTransition::NO_PRIOR, 0)).await;
        assert_eq!(err, Err(SubmitError::Rejected(LedgerError::StaleShareState)));
        assert_eq!(f.ledger.account_count().await, 1, "rejected deposit wrote nothing");
    }

    #[tokio::test]
    async fn second_deposit_must_name_prior_envelope() {
        let f = fixture().await;
        submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 1_000_000, ShareTransition::NO_PRIOR, 0))
            .await
            .unwrap();

        let err = submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 1_000_000, ShareTransition::NO_PRIOR, 1)).await;
        assert_eq!(err, Err(SubmitError::Rejected(LedgerError::StaleShareState)));

        let prior = envelope(10).digest();
        let err = submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 1_000_000, prior, 0)).await;
        assert_eq!(err, Err(SubmitError::Rejected(LedgerError::AccountAlreadyExists)));

        submit(&f.ledger, &f.user, deposit_ix(&f, 1_000_000, 1_000_000, prior, 1))
            .await
            .unwrap();
        assert_eq!(pool_state(&f).await.total_shares, 2_000_000);
    }

    #[tokio::test]
    async fn pool_value_updates_are_authority_only() {
        let f = fixture().await;
        let ix = LedgerInstruction::UpdatePoolValue { pool: f.pool, new_value: 5 };
        // Empty pool cannot gain value without shares.
        assert_eq!(
            submit(&f.ledger, &f.authority, ix.clone()).await,
            Err(SubmitError::Rejected(LedgerError::InvalidShareCalculation))
        );

        submit(&f.ledger, &f.user, deposit_ix(&f, 9_000_000, 9_000_000, ShareTransition::NO_PRIOR, 0))
            .await
            .unwrap();
        let ix = LedgerInstruction::UpdatePoolValue { pool: f.pool, new_value: 10_000_000 };
        assert_eq!(
            submit(&f.ledger, &f.user, ix.clone()).await,
            Err(SubmitError::Rejected(LedgerError::Unauthorized))
        );
        submit(&f.ledger, &f.authority, ix).await.unwrap();
        let pool = pool_state(&f).await;
        assert_eq!((pool.total_pool_value, pool.total_shares), (10_000_000, 9_000_000));
    }

    #[tokio::test]
    async fn tampered_signature_is_unauthorized() {
        let f = fixture().await;
        let mut tx = SignedInstruction::sign(
            LedgerInstruction::UpdatePoolValue { pool: f.pool, new_value: 0 },
            &f.authority,
        )
        .unwrap();
        tx.signer = f.user.public_key();
        assert_eq!(
            f.ledger.submit(tx).await,
            Err(SubmitError::Rejected(LedgerError::Unauthorized))
        );
    }

    #[tokio::test]
    async fn setup_rejects_short_interval_without_record() {
        let f = fixture().await;
        let ix = LedgerInstruction::SetupTransfer {
            pool: f.pool,
            commitment: [9u8; 32],
            transfer_nonce: 0,
            encrypted_payload: EncryptedPayload([0u8; ENCRYPTED_PAYLOAD_LEN]),
            amount: 10,
            interval_seconds: 100,
        };
        assert_eq!(
            submit(&f.ledger, &f.user, ix).await,
            Err(SubmitError::Rejected(LedgerError::InvalidInterval))
        );
        let transfers = f
            .ledger
            .get_program_accounts(ScheduledTransfer::discriminator())
            .await
            .unwrap();
        assert!(transfers.is_empty());
    }

    #[tokio::test]
    async fn skips_exhaust_transfer() {
        let f = fixture().await;
        let commitment = [9u8; 32];
        submit(
            &f.ledger,
            &f.user,
            LedgerInstruction::SetupTransfer {
                pool: f.pool,
                commitment,
                transfer_nonce: 0,
                encrypted_payload: EncryptedPayload([0u8; ENCRYPTED_PAYLOAD_LEN]),
                amount: 10,
                interval_seconds: 86_400,
            },
        )
        .await
        .unwrap();
        let transfer = f.ledger.addresses().transfer(&commitment, 0).0;

        let skip = |index| LedgerInstruction::RecordSkip {
            transfer,
            commitment,
            execution_index: index,
        };
        assert_eq!(
            submit(&f.ledger, &f.user, skip(0)).await,
            Err(SubmitError::Rejected(LedgerError::TransferNotDue))
        );

        for index in 0..3 {
            f.clock.advance(86_400);
            submit(&f.ledger, &f.user, skip(index)).await.unwrap();
        }
        let data = f.ledger.get_account(&transfer).await.unwrap().unwrap();
        let state = ScheduledTransfer::decode(&data).unwrap();
        assert!(!state.is_active);
        assert_eq!(state.close_reason, CloseReason::Exhausted);
        assert_eq!(state.skip_count, 3);
        assert_eq!(state.next_execution, START + 4 * 86_400);

        assert_eq!(
            submit(&f.ledger, &f.user, LedgerInstruction::CancelTransfer { transfer, commitment }).await,
            Err(SubmitError::Rejected(LedgerError::TransferAlreadyCancelled))
        );
    }

    #[tokio::test]
    async fn cancel_checks_commitment() {
        let f = fixture().await;
        let commitment = [9u8; 32];
        submit(
            &f.ledger,
            &f.user,
            LedgerInstruction::SetupTransfer {
                pool: f.pool,
                commitment,
                transfer_nonce: 4,
                encrypted_payload: EncryptedPayload([0u8; ENCRYPTED_PAYLOAD_LEN]),
                amount: 10,
                interval_seconds: 86_400,
            },
        )
        .await
        .unwrap();
        let transfer = f.ledger.addresses().transfer(&commitment, 4).0;

        assert_eq!(
            submit(
                &f.ledger,
                &f.user,
                LedgerInstruction::CancelTransfer { transfer, commitment: [8u8; 32] }
            )
            .await,
            Err(SubmitError::Rejected(LedgerError::Unauthorized))
        );
        submit(&f.ledger, &f.user, LedgerInstruction::CancelTransfer { transfer, commitment })
            .await
            .unwrap();
    }
}
