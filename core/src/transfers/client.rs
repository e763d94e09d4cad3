use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use shieldvault_keypair::WalletSigner;
use shieldvault_privacy::TransferPayload;
use solana_sdk::pubkey::Pubkey;

use super::state::{TransferState, TransferView};
use crate::error::{LedgerError, ValidationError, VaultError, VaultResult};
use crate::identity::{VaultIdentity, transfer_nullifier_nonce};
use crate::ledger::{
    LedgerInstruction, Evidence, ScheduledTransfer, Submission, fetch_account, fetch_all,
};
use crate::pool::PoolClient;

const STALE_REBUILDS: u32 = 3;

/// Executions currently claimed by a local trigger path, keyed by
/// `(transfer, execution_index)`.
///
/// Only avoids wasted work between the poller and the job queue in this
/// process. Double execution is prevented by the ledger's nullifier check.
#[derive(Default)]
pub struct InFlight {
    claims: DashMap<(Pubkey, u64), i64>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if the execution is already claimed.
    pub fn try_claim(
        self: &Arc<Self>,
        transfer: Pubkey,
        execution_index: u64,
        now: i64,
    ) -> Option<InFlightGuard> {
        use dashmap::mapref::entry::Entry;
        match self.claims.entry((transfer, execution_index)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(now);
                Some(InFlightGuard {
                    registry: Arc::clone(self),
                    key: (transfer, execution_index),
                })
            }
        }
    }

    pub fn contains(&self, transfer: &Pubkey, execution_index: u64) -> bool {
        self.claims.contains_key(&(*transfer, execution_index))
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Releases the claim on drop.
pub struct InFlightGuard {
    registry: Arc<InFlight>,
    key: (Pubkey, u64),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.claims.remove(&self.key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSetup {
    pub transfer_id: Pubkey,
    pub transfer_nonce: u64,
    pub next_execution: i64,
    pub submission: Submission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub transfer_id: Pubkey,
    pub execution_index: u64,
    pub shares_burned: u64,
    pub remaining_shares: u64,
    pub submission: Submission,
}

/// What a trigger path did with one due transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Executed { execution_index: u64 },
    /// Balance was short; the slot was recorded as skipped.
    Skipped { execution_index: u64 },
    /// Another local path holds the claim.
    AlreadyRunning,
    /// Someone else executed or closed it first.
    NotDue,
    Closed { state: TransferState },
}

/// Another writer settled the slot between our read and our submit.
fn handled_elsewhere(e: &VaultError) -> bool {
    matches!(
        e.ledger_code(),
        Some(
            LedgerError::NullifierAlreadyUsed
                | LedgerError::TransferNotDue
                | LedgerError::InvalidExecutionIndex
        )
    )
}

pub struct TransferClient {
    pool: Arc<PoolClient>,
    in_flight: Arc<InFlight>,
}

impl TransferClient {
    pub fn new(pool: Arc<PoolClient>, in_flight: Arc<InFlight>) -> Self {
        Self { pool, in_flight }
    }

    pub fn pool(&self) -> &Arc<PoolClient> {
        &self.pool
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    fn now(&self) -> i64 {
        self.pool.clock().now()
    }

    /// Reads one transfer. A missing account is an error.
    pub async fn fetch(&self, transfer_id: &Pubkey) -> VaultResult<ScheduledTransfer> {
        fetch_account::<ScheduledTransfer>(self.pool.ledger(), transfer_id)
            .await?
            .ok_or(VaultError::Rejected(LedgerError::AccountNotFound))
    }

    async fn owned(
        &self,
        identity: &VaultIdentity,
        transfer_id: &Pubkey,
    ) -> VaultResult<ScheduledTransfer> {
        let transfer = self.fetch(transfer_id).await?;
        if transfer.user_commitment != *identity.commitment().as_bytes() {
            return Err(VaultError::Rejected(LedgerError::Unauthorized));
        }
        Ok(transfer)
    }

    async fn transfers_of(&self, identity: &VaultIdentity) -> VaultResult<Vec<ScheduledTransfer>> {
        let commitment = identity.commitment().as_bytes();
        let mut transfers: Vec<ScheduledTransfer> = fetch_all::<ScheduledTransfer>(self.pool.ledger())
            .await?
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| &t.user_commitment == commitment)
            .collect();
        transfers.sort_by_key(|t| t.transfer_nonce);
        Ok(transfers)
    }

    pub async fn setup(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        recipient: [u8; 32],
        memo: &str,
        amount: u64,
        interval_seconds: u32,
    ) -> VaultResult<TransferSetup> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.pool
            .rules()
            .check_interval(interval_seconds)
            .map_err(VaultError::rule)?;
        let payload = TransferPayload::new(recipient, memo)?.seal(identity.key())?;

        let commitment = *identity.commitment().as_bytes();
        let _guard = self.pool.locks().lock(&commitment).await;
        let transfer_nonce = self
            .transfers_of(identity)
            .await?
            .last()
            .map(|t| t.transfer_nonce + 1)
            .unwrap_or(0);
        transfer_nullifier_nonce(transfer_nonce, 0)?;
        let (transfer_id, _) = self.pool.addresses().transfer(&commitment, transfer_nonce);

        let submission = self
            .pool
            .submitter()
            .submit(
                LedgerInstruction::SetupTransfer {
                    pool: *self.pool.pool_address(),
                    commitment,
                    transfer_nonce,
                    encrypted_payload: payload,
                    amount,
                    interval_seconds,
                },
                signer,
                Evidence::AccountExists(transfer_id),
            )
            .await?;

        let next_execution = self.fetch(&transfer_id).await?.next_execution;
        info!("transfer {transfer_id} set up: {amount} every {interval_seconds}s");
        Ok(TransferSetup {
            transfer_id,
            transfer_nonce,
            next_execution,
            submission,
        })
    }

    /// Executes the transfer's current slot.
    pub async fn execute(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
    ) -> VaultResult<ExecutionReceipt> {
        let index = self.fetch(transfer_id).await?.execution_count;
        self.execute_at(identity, signer, transfer_id, index).await
    }

    /// Executes slot `execution_index`.
    ///
    /// The nullifier is scoped to `(secret, transfer, execution_index)`, so
    /// a second attempt at the same slot fails with `NullifierAlreadyUsed`
    /// whether it is caught here or by the ledger.
    pub async fn execute_at(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
        execution_index: u64,
    ) -> VaultResult<ExecutionReceipt> {
        let _guard = self.pool.locks().lock(identity.commitment().as_bytes()).await;
        let mut attempt = 0;
        loop {
            match self
                .try_execute(identity, signer, transfer_id, execution_index)
                .await
            {
                Err(VaultError::Rejected(e)) if e.is_stale_state() && attempt < STALE_REBUILDS => {
                    debug!("execution of {transfer_id} raced another write, rebuilding: {e}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_execute(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
        execution_index: u64,
    ) -> VaultResult<ExecutionReceipt> {
        let transfer = self.owned(identity, transfer_id).await?;
        let nullifier = identity.transfer_nullifier(transfer.transfer_nonce, execution_index)?;
        let (nullifier_address, _) = self.pool.addresses().nullifier(nullifier.as_bytes());

        if self
            .pool
            .ledger()
            .get_account(&nullifier_address)
            .await?
            .is_some()
        {
            return Err(VaultError::Rejected(LedgerError::NullifierAlreadyUsed));
        }
        if !transfer.is_active {
            return Err(VaultError::Rejected(LedgerError::TransferNotActive));
        }
        if !transfer.is_due(self.now()) {
            return Err(VaultError::Rejected(LedgerError::TransferNotDue));
        }
        if execution_index != transfer.execution_count {
            return Err(VaultError::Rejected(LedgerError::InvalidExecutionIndex));
        }

        let plan = self
            .pool
            .plan_debit(identity, transfer.amount, &nullifier)
            .await?;
        let submission = self
            .pool
            .submitter()
            .submit(
                LedgerInstruction::ExecuteTransfer {
                    transfer: *transfer_id,
                    execution_index,
                    nullifier: *nullifier.as_bytes(),
                    new_encrypted_share: plan.new_envelope,
                    proof: plan.proof,
                },
                signer,
                Evidence::NullifierUsed(nullifier_address),
            )
            .await?;

        info!(
            "transfer {transfer_id} execution #{execution_index}: {} burned {} shares",
            transfer.amount, plan.shares_burned
        );
        self.pool.remember_shares(identity, plan.remaining_shares);
        Ok(ExecutionReceipt {
            transfer_id: *transfer_id,
            execution_index,
            shares_burned: plan.shares_burned,
            remaining_shares: plan.remaining_shares,
            submission,
        })
    }

    /// Records slot `execution_index` as skipped. Fails with
    /// `InvalidExecutionIndex` once the transfer has moved past that slot.
    pub async fn record_skip(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
        execution_index: u64,
    ) -> VaultResult<Submission> {
        let transfer = self.owned(identity, transfer_id).await?;
        if !transfer.is_active {
            return Err(VaultError::Rejected(LedgerError::TransferNotActive));
        }
        if !transfer.is_due(self.now()) {
            return Err(VaultError::Rejected(LedgerError::TransferNotDue));
        }
        if execution_index != transfer.execution_count {
            return Err(VaultError::Rejected(LedgerError::InvalidExecutionIndex));
        }
        let (history, _) = self.pool.addresses().history(transfer_id, execution_index);

        let submission = self
            .pool
            .submitter()
            .submit(
                LedgerInstruction::RecordSkip {
                    transfer: *transfer_id,
                    commitment: transfer.user_commitment,
                    execution_index,
                },
                signer,
                Evidence::AccountExists(history),
            )
            .await?;
        warn!(
            "transfer {transfer_id} slot #{execution_index} skipped ({} consecutive)",
            transfer.skip_count + 1
        );
        Ok(submission)
    }

    pub async fn cancel(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
    ) -> VaultResult<Submission> {
        let transfer = self.owned(identity, transfer_id).await?;
        if !transfer.is_active {
            return Err(VaultError::Rejected(LedgerError::TransferAlreadyCancelled));
        }
        let submission = self
            .pool
            .submitter()
            .submit(
                LedgerInstruction::CancelTransfer {
                    transfer: *transfer_id,
                    commitment: transfer.user_commitment,
                },
                signer,
                Evidence::TransferInactive(*transfer_id),
            )
            .await?;
        info!("transfer {transfer_id} cancelled");
        Ok(submission)
    }

    pub async fn list(&self, identity: &VaultIdentity) -> VaultResult<Vec<TransferView>> {
        let now = self.now();
        Ok(self
            .transfers_of(identity)
            .await?
            .iter()
            .map(|t| {
                let in_flight = self.in_flight.contains(&t.transfer_id, t.execution_count);
                TransferView::new(t, identity.key(), now, in_flight)
            })
            .collect())
    }

    /// Active transfers with `next_execution <= now`.
    pub async fn due(&self, identity: &VaultIdentity) -> VaultResult<Vec<ScheduledTransfer>> {
        let now = self.now();
        Ok(self
            .transfers_of(identity)
            .await?
            .into_iter()
            .filter(|t| t.is_due(now))
            .collect())
    }

    /// Runs one due transfer on behalf of a trigger path: claims the slot,
    /// executes it, and records a skip when the balance is short.
    pub async fn run_due(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        transfer_id: &Pubkey,
    ) -> VaultResult<RunOutcome> {
        let transfer = self.owned(identity, transfer_id).await?;
        let state = TransferState::derive(&transfer, self.now(), false);
        if state.is_terminal() {
            return Ok(RunOutcome::Closed { state });
        }
        if state != TransferState::Due {
            return Ok(RunOutcome::NotDue);
        }

        let execution_index = transfer.execution_count;
        let Some(_claim) = self
            .in_flight
            .try_claim(*transfer_id, execution_index, self.now())
        else {
            return Ok(RunOutcome::AlreadyRunning);
        };

        let result = match self
            .execute_at(identity, signer, transfer_id, execution_index)
            .await
        {
            Ok(_) => Ok(RunOutcome::Executed { execution_index }),
            Err(e) if e.ledger_code() == Some(LedgerError::InsufficientBalance) => self
                .record_skip(identity, signer, transfer_id, execution_index)
                .await
                .map(|_| RunOutcome::Skipped { execution_index }),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if handled_elsewhere(&e) => {
                debug!("transfer {transfer_id} slot #{execution_index} handled elsewhere: {e}");
                Ok(RunOutcome::NotDue)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ledger::{CloseReason, Ledger};
    use crate::testing::{START, TestEnv};
    use shieldvault_keypair::LocalWallet;

    const DAY: u32 = 86_400;

    fn transfer_client(env: &TestEnv) -> TransferClient {
        TransferClient::new(Arc::new(env.pool_client()), Arc::new(InFlight::new()))
    }

    async fn funded(env: &TestEnv, seed: u8, amount: u64) -> (LocalWallet, VaultIdentity) {
        let wallet = LocalWallet::from_seed(&[seed; 32]);
        let id = env.identity(&wallet);
        env.pool_client().deposit(&id, &wallet, amount).await.unwrap();
        (wallet, id)
    }

    #[tokio::test]
    async fn setup_schedules_first_execution_one_interval_out() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);

        let setup = client
            .setup(&id, &wallet, [8u8; 32], "rent", 100_000, DAY)
            .await
            .unwrap();
        assert_eq!(setup.transfer_nonce, 0);
        assert_eq!(setup.next_execution, START + DAY as i64);

        let t = client.fetch(&setup.transfer_id).await.unwrap();
        assert!(t.is_active);
        assert_eq!(t.execution_count, 0);

        let second = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        assert_eq!(second.transfer_nonce, 1);
        assert_ne!(second.transfer_id, setup.transfer_id);
    }

    #[tokio::test]
    async fn short_interval_is_rejected_without_record() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let before = env.ledger.account_count().await;

        let err = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, 100)
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::rule(LedgerError::InvalidInterval));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(env.ledger.account_count().await, before);
        assert!(client.list(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn execution_advances_anchored_schedule() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();

        let err = client.execute(&id, &wallet, &setup.transfer_id).await.unwrap_err();
        assert_eq!(err, VaultError::Rejected(LedgerError::TransferNotDue));

        // Late execution still anchors to the scheduled time.
        env.clock.advance(DAY as i64 + 3_600);
        let receipt = client.execute(&id, &wallet, &setup.transfer_id).await.unwrap();
        assert_eq!(receipt.execution_index, 0);
        assert_eq!(receipt.shares_burned, 100_000);

        let t = client.fetch(&setup.transfer_id).await.unwrap();
        assert_eq!(t.execution_count, 1);
        assert_eq!(t.total_transferred, 100_000);
        assert_eq!(t.next_execution, START + 2 * DAY as i64);
        assert_eq!(
            env.pool_client().get_balance(&id).await.unwrap().shares,
            900_000
        );
    }

    #[tokio::test]
    async fn second_execute_of_same_slot_hits_nullifier() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        env.clock.advance(DAY as i64);

        client
            .execute_at(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap();
        let err = client
            .execute_at(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap_err();
        assert_eq!(err.ledger_code(), Some(LedgerError::NullifierAlreadyUsed));
    }

    #[tokio::test]
    async fn concurrent_executions_land_once() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let setup = transfer_client(&env)
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        env.clock.advance(DAY as i64);

        // Separate clients share no local lock; only the ledger serializes them.
        let a = transfer_client(&env);
        let b = transfer_client(&env);
        let (ra, rb) = tokio::join!(
            a.execute_at(&id, &wallet, &setup.transfer_id, 0),
            b.execute_at(&id, &wallet, &setup.transfer_id, 0),
        );

        let results = [ra, rb];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(err.ledger_code(), Some(LedgerError::NullifierAlreadyUsed));

        let t = a.fetch(&setup.transfer_id).await.unwrap();
        assert_eq!(t.execution_count, 1);
        assert_eq!(env.pool_state().await.total_pool_value, 900_000);
    }

    #[tokio::test]
    async fn cancel_twice_reports_already_cancelled() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();

        client.cancel(&id, &wallet, &setup.transfer_id).await.unwrap();
        let err = client
            .cancel(&id, &wallet, &setup.transfer_id)
            .await
            .unwrap_err();
        assert_eq!(err.ledger_code(), Some(LedgerError::TransferAlreadyCancelled));

        env.clock.advance(DAY as i64);
        let err = client
            .execute(&id, &wallet, &setup.transfer_id)
            .await
            .unwrap_err();
        assert_eq!(err.ledger_code(), Some(LedgerError::TransferNotActive));

        let views = client.list(&id).await.unwrap();
        assert_eq!(views[0].state, TransferState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_reaches_ledger_after_local_state_goes_stale() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        client.cancel(&id, &wallet, &setup.transfer_id).await.unwrap();

        // Bypass the local pre-check: the ledger enforces it too.
        let tx = crate::ledger::instruction::SignedInstruction::sign(
            LedgerInstruction::CancelTransfer {
                transfer: setup.transfer_id,
                commitment: *id.commitment().as_bytes(),
            },
            &wallet,
        )
        .unwrap();
        assert_eq!(
            env.ledger.submit(tx).await,
            Err(crate::error::SubmitError::Rejected(
                LedgerError::TransferAlreadyCancelled
            ))
        );
    }

    #[tokio::test]
    async fn ledger_state_errors_have_one_kind_on_either_side() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();

        let early = client.execute(&id, &wallet, &setup.transfer_id).await.unwrap_err();
        assert_eq!(early.kind(), ErrorKind::LedgerRejection);

        env.clock.advance(DAY as i64);
        client
            .execute_at(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap();
        let replay = client
            .execute_at(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap_err();
        assert_eq!(replay.ledger_code(), Some(LedgerError::NullifierAlreadyUsed));
        assert_eq!(replay.kind(), ErrorKind::LedgerRejection);

        client.cancel(&id, &wallet, &setup.transfer_id).await.unwrap();
        let local = client
            .cancel(&id, &wallet, &setup.transfer_id)
            .await
            .unwrap_err();
        let remote = client
            .pool()
            .submitter()
            .submit(
                LedgerInstruction::CancelTransfer {
                    transfer: setup.transfer_id,
                    commitment: *id.commitment().as_bytes(),
                },
                &wallet,
                Evidence::None,
            )
            .await
            .unwrap_err();
        assert_eq!(local, remote);
        assert_eq!(local.kind(), ErrorKind::LedgerRejection);
    }

    #[tokio::test]
    async fn skip_is_recorded_only_for_the_slot_that_came_up_short() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 50_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        // Slots 0 and 1 are both due.
        env.clock.advance(2 * DAY as i64);

        let short = client
            .execute_at(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap_err();
        assert_eq!(short.ledger_code(), Some(LedgerError::InsufficientBalance));

        // The owner tops up and runs slot 0 before the skip lands.
        env.pool_client().deposit(&id, &wallet, 1_000_000).await.unwrap();
        client.execute(&id, &wallet, &setup.transfer_id).await.unwrap();

        let err = client
            .record_skip(&id, &wallet, &setup.transfer_id, 0)
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::Rejected(LedgerError::InvalidExecutionIndex));
        let t = client.fetch(&setup.transfer_id).await.unwrap();
        assert_eq!((t.execution_count, t.skip_count), (1, 0));

        // Slot 1 is still there to be executed.
        assert_eq!(
            client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
            RunOutcome::Executed { execution_index: 1 }
        );
    }

    #[tokio::test]
    async fn strangers_cannot_touch_transfers() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let (mallory, mallory_id) = funded(&env, 11, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();

        let err = client
            .cancel(&mallory_id, &mallory, &setup.transfer_id)
            .await
            .unwrap_err();
        assert_eq!(err.ledger_code(), Some(LedgerError::Unauthorized));
        assert!(client.list(&mallory_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_balance_skips_until_exhausted() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 150_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();

        env.clock.advance(DAY as i64);
        assert_eq!(
            client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
            RunOutcome::Executed { execution_index: 0 }
        );

        for index in 1..=3 {
            env.clock.advance(DAY as i64);
            assert_eq!(
                client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
                RunOutcome::Skipped {
                    execution_index: index
                }
            );
        }

        let t = client.fetch(&setup.transfer_id).await.unwrap();
        assert!(!t.is_active);
        assert_eq!(t.close_reason, CloseReason::Exhausted);
        assert_eq!(t.skip_count, 3);

        env.clock.advance(DAY as i64);
        assert_eq!(
            client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
            RunOutcome::Closed {
                state: TransferState::Exhausted
            }
        );
    }

    #[tokio::test]
    async fn claimed_slot_is_not_run_twice_locally() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let setup = client
            .setup(&id, &wallet, [8u8; 32], "", 100_000, DAY)
            .await
            .unwrap();
        env.clock.advance(DAY as i64);

        let claim = client
            .in_flight()
            .try_claim(setup.transfer_id, 0, START)
            .unwrap();
        assert_eq!(
            client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
            RunOutcome::AlreadyRunning
        );
        assert_eq!(client.list(&id).await.unwrap()[0].state, TransferState::Executing);

        drop(claim);
        assert!(client.in_flight().is_empty());
        assert_eq!(
            client.run_due(&id, &wallet, &setup.transfer_id).await.unwrap(),
            RunOutcome::Executed { execution_index: 0 }
        );
    }

    #[tokio::test]
    async fn due_lists_only_ready_transfers() {
        let env = TestEnv::new().await;
        let (wallet, id) = funded(&env, 10, 1_000_000).await;
        let client = transfer_client(&env);
        let daily = client
            .setup(&id, &wallet, [8u8; 32], "", 10_000, DAY)
            .await
            .unwrap();
        client
            .setup(&id, &wallet, [8u8; 32], "", 10_000, 7 * DAY)
            .await
            .unwrap();

        assert!(client.due(&id).await.unwrap().is_empty());
        env.clock.advance(DAY as i64);
        let due = client.due(&id).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].transfer_id, daily.transfer_id);
    }
}
