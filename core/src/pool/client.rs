use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use shieldvault_config::VaultConfig;
use shieldvault_keypair::WalletSigner;
use shieldvault_privacy::{Commitment, EncryptedShare, Nullifier, NullifierNonce};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;

use super::feed::YieldFeed;
use super::math;
use crate::clock::SharedClock;
use crate::commitment_lock::CommitmentLocks;
use crate::constants::POOL_VALUE_TOLERANCE_BPS;
use crate::error::{LedgerError, ValidationError, VaultError, VaultResult};
use crate::identity::VaultIdentity;
use crate::ledger::{
    DepositHistory, Ledger, LedgerInstruction, LedgerRules, OwnershipProof, Evidence,
    ProgramAddresses, RetryPolicy, ShareTransition, ShieldPool, Submission, Submitter, UserShare,
    fetch_account, fetch_all,
};

/// Rebuild attempts after the ledger reports that our share math went stale.
const STALE_REBUILDS: u32 = 3;

/// Pool totals as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    #[serde(serialize_with = "crate::serde_pubkey")]
    pub address: Pubkey,
    pub total_pool_value: u64,
    pub total_shares: u64,
    pub last_yield_update: i64,
    pub fetched_at: i64,
}

impl PoolSnapshot {
    fn from_account(address: Pubkey, pool: &ShieldPool, fetched_at: i64) -> Self {
        Self {
            address,
            total_pool_value: pool.total_pool_value,
            total_shares: pool.total_shares,
            last_yield_update: pool.last_yield_update,
            fetched_at,
        }
    }

    pub fn share_value(&self, shares: u64) -> Result<u64, LedgerError> {
        math::share_value(shares, self.total_pool_value, self.total_shares)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub shares: u64,
    pub value: u64,
    /// Computed from the last successful read because the ledger is unreachable.
    pub stale: bool,
    pub as_of: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub shares_minted: u64,
    pub total_shares: u64,
    pub deposit_index: u64,
    pub submission: Submission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub shares_burned: u64,
    pub remaining_shares: u64,
    pub submission: Submission,
}

/// A debit computed against one pool snapshot and one balance envelope.
#[derive(Debug, Clone)]
pub struct DebitPlan {
    pub shares_burned: u64,
    pub remaining_shares: u64,
    pub new_envelope: EncryptedShare,
    pub proof: OwnershipProof,
    pub snapshot: PoolSnapshot,
}

pub struct PoolClient {
    submitter: Arc<Submitter>,
    addresses: ProgramAddresses,
    pool_id: Pubkey,
    pool_address: Pubkey,
    clock: SharedClock,
    rules: LedgerRules,
    tolerance_bps: u64,
    max_staleness_secs: i64,
    snapshot: Mutex<Option<PoolSnapshot>>,
    last_shares: DashMap<Commitment, (u64, i64)>,
    locks: CommitmentLocks,
    nonces: NullifierNonce,
}

fn is_stale(e: &VaultError) -> bool {
    matches!(e, VaultError::Rejected(l) if l.is_stale_state())
}

/// Fresh pool value scaled to the previous share supply, so that deposits
/// and withdrawals by others are not mistaken for a value change.
fn normalized_value(previous: &PoolSnapshot, fresh: &PoolSnapshot) -> u64 {
    let scaled = fresh.total_pool_value as u128 * previous.total_shares as u128
        / fresh.total_shares as u128;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub(crate) fn parse_pubkey(what: &str, value: &str) -> VaultResult<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| ValidationError::Malformed(format!("{what} {value:?}: {e}")).into())
}

impl PoolClient {
    pub fn new(
        submitter: Arc<Submitter>,
        addresses: ProgramAddresses,
        pool_id: Pubkey,
        clock: SharedClock,
    ) -> Self {
        let pool_address = addresses.pool(&pool_id).0;
        Self {
            submitter,
            addresses,
            pool_id,
            pool_address,
            clock,
            rules: LedgerRules::default(),
            tolerance_bps: POOL_VALUE_TOLERANCE_BPS,
            max_staleness_secs: 900,
            snapshot: Mutex::new(None),
            last_shares: DashMap::new(),
            locks: CommitmentLocks::new(),
            nonces: NullifierNonce::random(),
        }
    }

    pub fn from_config(
        ledger: Arc<dyn Ledger>,
        config: &VaultConfig,
        clock: SharedClock,
    ) -> VaultResult<Self> {
        let program_id = parse_pubkey("program id", &config.pool.program_id)?;
        let pool_id = parse_pubkey("pool id", &config.pool.pool_id)?;
        let submitter = Arc::new(Submitter::new(ledger, RetryPolicy::from_config(&config.rpc)));
        Ok(
            Self::new(submitter, ProgramAddresses::new(program_id), pool_id, clock)
                .with_rules(LedgerRules::from_config(config))
                .with_tolerance_bps(config.pool.value_tolerance_bps)
                .with_max_staleness_secs(config.pool.max_feed_staleness_secs),
        )
    }

    pub fn with_rules(mut self, rules: LedgerRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_tolerance_bps(mut self, bps: u64) -> Self {
        self.tolerance_bps = bps;
        self
    }

    pub fn with_max_staleness_secs(mut self, secs: u64) -> Self {
        self.max_staleness_secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.submitter.ledger().as_ref()
    }

    pub fn addresses(&self) -> &ProgramAddresses {
        &self.addresses
    }

    pub fn pool_id(&self) -> &Pubkey {
        &self.pool_id
    }

    pub fn pool_address(&self) -> &Pubkey {
        &self.pool_address
    }

    pub fn rules(&self) -> &LedgerRules {
        &self.rules
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn locks(&self) -> &CommitmentLocks {
        &self.locks
    }

    /// Last pool state seen by this client, if any.
    pub async fn snapshot(&self) -> Option<PoolSnapshot> {
        self.snapshot.lock().await.clone()
    }

    /// Reads the pool without any drift check.
    pub async fn fetch_pool(&self) -> VaultResult<PoolSnapshot> {
        match fetch_account::<ShieldPool>(self.ledger(), &self.pool_address).await? {
            Some(pool) if pool.is_active => Ok(PoolSnapshot::from_account(
                self.pool_address,
                &pool,
                self.clock.now(),
            )),
            _ => Err(VaultError::Rejected(LedgerError::PoolNotInitialized)),
        }
    }

    /// Reads the pool for share math.
    ///
    /// Fails with [`VaultError::PoolValueDrift`] when the value moved more
    /// than the tolerance since the previous read. The new state replaces the
    /// snapshot either way, so a deliberate retry proceeds against it.
    pub async fn refresh(&self) -> VaultResult<PoolSnapshot> {
        let fresh = self.fetch_pool().await?;
        let previous = self.snapshot.lock().await.replace(fresh.clone());
        if let Some(previous) = previous {
            self.check_drift(&previous, &fresh)?;
        }
        Ok(fresh)
    }

    fn check_drift(&self, previous: &PoolSnapshot, fresh: &PoolSnapshot) -> VaultResult<()> {
        if previous.total_shares == 0 || fresh.total_shares == 0 {
            return Ok(());
        }
        let observed = normalized_value(previous, fresh);
        if !math::within_tolerance(previous.total_pool_value, observed, self.tolerance_bps) {
            return Err(VaultError::PoolValueDrift {
                reference: previous.total_pool_value,
                observed,
                tolerance_bps: self.tolerance_bps,
            });
        }
        Ok(())
    }

    /// Shares that withdrawing `amount` would burn right now.
    pub async fn quote_withdraw(&self, amount: u64) -> VaultResult<u64> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let snapshot = self.refresh().await?;
        math::shares_for_withdrawal(amount, snapshot.total_pool_value, snapshot.total_shares)
            .map_err(VaultError::rule)
    }

    async fn read_share(&self, identity: &VaultIdentity) -> VaultResult<(Pubkey, Option<UserShare>)> {
        let (address, _) = self
            .addresses
            .user_share(&self.pool_address, identity.commitment().as_bytes());
        Ok((address, fetch_account::<UserShare>(self.ledger(), &address).await?))
    }

    pub async fn get_balance(&self, identity: &VaultIdentity) -> VaultResult<Balance> {
        match self.read_balance(identity).await {
            Err(VaultError::Transient(e)) => {
                debug!("balance read failed, trying last known state: {e}");
                self.fallback_balance(identity, VaultError::Transient(e))
                    .await
            }
            other => other,
        }
    }

    async fn read_balance(&self, identity: &VaultIdentity) -> VaultResult<Balance> {
        let snapshot = self.fetch_pool().await?;
        *self.snapshot.lock().await = Some(snapshot.clone());

        let shares = match self.read_share(identity).await?.1 {
            Some(share) => identity.open_shares(&share.encrypted_share_amount)?,
            None => 0,
        };
        self.last_shares
            .insert(*identity.commitment(), (shares, snapshot.fetched_at));

        Ok(Balance {
            shares,
            value: snapshot.share_value(shares)?,
            stale: false,
            as_of: snapshot.fetched_at,
        })
    }

    async fn fallback_balance(
        &self,
        identity: &VaultIdentity,
        cause: VaultError,
    ) -> VaultResult<Balance> {
        let Some(snapshot) = self.snapshot().await else {
            return Err(cause);
        };
        let Some((shares, shares_at)) = self.last_shares.get(identity.commitment()).map(|e| *e)
        else {
            return Err(cause);
        };

        let as_of = snapshot.fetched_at.min(shares_at);
        let age_secs = self.clock.now().saturating_sub(as_of);
        if age_secs > self.max_staleness_secs {
            return Err(crate::error::IntegrationError::StaleFeed { age_secs }.into());
        }
        Ok(Balance {
            shares,
            value: snapshot.share_value(shares)?,
            stale: true,
            as_of,
        })
    }

    async fn next_deposit_index(&self, commitment: &[u8; 32]) -> VaultResult<u64> {
        let history = fetch_all::<DepositHistory>(self.ledger()).await?;
        Ok(history
            .iter()
            .filter(|(_, h)| &h.commitment == commitment)
            .map(|(_, h)| h.deposit_index + 1)
            .max()
            .unwrap_or(0))
    }

    pub async fn deposit(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        amount: u64,
    ) -> VaultResult<DepositReceipt> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.rules.check_deposit(amount).map_err(VaultError::rule)?;

        let _guard = self.locks.lock(identity.commitment().as_bytes()).await;
        let mut attempt = 0;
        loop {
            match self.try_deposit(identity, signer, amount).await {
                Err(e) if is_stale(&e) && attempt < STALE_REBUILDS => {
                    debug!("deposit raced another write, rebuilding: {e}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_deposit(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        amount: u64,
    ) -> VaultResult<DepositReceipt> {
        let commitment = *identity.commitment().as_bytes();
        let snapshot = self.refresh().await?;
        let minted =
            math::shares_for_deposit(amount, snapshot.total_pool_value, snapshot.total_shares)
                .map_err(VaultError::rule)?;

        let (prior_digest, prior_shares) = match self.read_share(identity).await?.1 {
            Some(share) => (
                share.encrypted_share_amount.digest(),
                identity.open_shares(&share.encrypted_share_amount)?,
            ),
            None => (ShareTransition::NO_PRIOR, 0),
        };
        let total_shares = prior_shares
            .checked_add(minted)
            .ok_or(VaultError::rule(LedgerError::ArithmeticOverflow))?;
        let envelope = identity.seal_shares(total_shares)?;

        let deposit_index = self.next_deposit_index(&commitment).await?;
        let (history, _) = self.addresses.deposit_history(&commitment, deposit_index);

        let instruction = LedgerInstruction::Deposit {
            pool: snapshot.address,
            commitment,
            amount,
            encrypted_share: envelope,
            deposit_index,
            transition: ShareTransition {
                prior_share_digest: prior_digest,
                new_share_digest: envelope.digest(),
                share_delta: minted,
                observed_pool_value: snapshot.total_pool_value,
            },
        };
        let submission = self
            .submitter
            .submit(instruction, signer, Evidence::AccountExists(history))
            .await?;

        info!(
            "deposit #{deposit_index} for {}: {amount} -> {minted} shares",
            identity.commitment()
        );
        self.last_shares
            .insert(*identity.commitment(), (total_shares, self.clock.now()));
        Ok(DepositReceipt {
            shares_minted: minted,
            total_shares,
            deposit_index,
            submission,
        })
    }

    /// Computes a debit of `amount` from the caller's balance, bound to
    /// `nullifier`. Nothing is submitted.
    pub async fn plan_debit(
        &self,
        identity: &VaultIdentity,
        amount: u64,
        nullifier: &Nullifier,
    ) -> VaultResult<DebitPlan> {
        let snapshot = self.refresh().await?;
        let Some(share) = self.read_share(identity).await?.1 else {
            return Err(VaultError::Rejected(LedgerError::InsufficientBalance));
        };
        let shares = identity.open_shares(&share.encrypted_share_amount)?;
        let burned =
            math::shares_for_withdrawal(amount, snapshot.total_pool_value, snapshot.total_shares)
                .map_err(VaultError::rule)?;
        if burned > shares {
            return Err(VaultError::Rejected(LedgerError::InsufficientBalance));
        }

        let remaining_shares = shares - burned;
        let new_envelope = identity.seal_shares(remaining_shares)?;
        let transition = ShareTransition {
            prior_share_digest: share.encrypted_share_amount.digest(),
            new_share_digest: new_envelope.digest(),
            share_delta: burned,
            observed_pool_value: snapshot.total_pool_value,
        };
        Ok(DebitPlan {
            shares_burned: burned,
            remaining_shares,
            new_envelope,
            proof: OwnershipProof::attest(
                transition,
                identity.commitment().as_bytes(),
                nullifier.as_bytes(),
            ),
            snapshot,
        })
    }

    pub(crate) fn remember_shares(&self, identity: &VaultIdentity, shares: u64) {
        self.last_shares
            .insert(*identity.commitment(), (shares, self.clock.now()));
    }

    /// Whether a last known share count is held for `commitment`.
    pub fn remembers(&self, commitment: &Commitment) -> bool {
        self.last_shares.contains_key(commitment)
    }

    /// Drops the last known share count for `commitment` and any commitment
    /// lock nobody holds. Balance reads fall back to nothing afterwards.
    pub fn forget(&self, commitment: &Commitment) {
        if self.last_shares.remove(commitment).is_some() {
            debug!("forgot cached position of {commitment}");
        }
        self.locks.prune();
    }

    pub async fn withdraw(
        &self,
        identity: &VaultIdentity,
        signer: &dyn WalletSigner,
        amount: u64,
    ) -> VaultResult<WithdrawReceipt> {
        if amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let _guard = self.locks.lock(identity.commitment().as_bytes()).await;
        let nullifier = identity.withdraw_nullifier(self.nonces.next());
        let (nullifier_address, _) = self.addresses.nullifier(nullifier.as_bytes());

        let mut attempt = 0;
        loop {
            let plan = self.plan_debit(identity, amount, &nullifier).await?;
            let instruction = LedgerInstruction::Withdraw {
                pool: plan.snapshot.address,
                commitment: *identity.commitment().as_bytes(),
                amount,
                nullifier: *nullifier.as_bytes(),
                new_encrypted_share: plan.new_envelope,
                proof: plan.proof,
            };
            match self
                .submitter
                .submit(instruction, signer, Evidence::NullifierUsed(nullifier_address))
                .await
            {
                Ok(submission) => {
                    info!(
                        "withdrew {amount} for {}: burned {} shares",
                        identity.commitment(),
                        plan.shares_burned
                    );
                    self.remember_shares(identity, plan.remaining_shares);
                    return Ok(WithdrawReceipt {
                        shares_burned: plan.shares_burned,
                        remaining_shares: plan.remaining_shares,
                        submission,
                    });
                }
                Err(e) if is_stale(&e) && attempt < STALE_REBUILDS => {
                    debug!("withdraw raced another write, rebuilding: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Creates the pool with `authority` as its owner.
    pub async fn initialize_pool(&self, authority: &dyn WalletSigner) -> VaultResult<Submission> {
        self.submitter
            .submit(
                LedgerInstruction::InitializePool {
                    pool_id: self.pool_id,
                },
                authority,
                Evidence::AccountExists(self.pool_address),
            )
            .await
    }

    /// Pushes the feed's pool value to the ledger. Authority only.
    ///
    /// Returns `None` when the ledger already holds that value.
    pub async fn sync_yield(
        &self,
        authority: &dyn WalletSigner,
        feed: &dyn YieldFeed,
    ) -> VaultResult<Option<Submission>> {
        let value = feed.pool_value().await?;
        let current = self.fetch_pool().await?;
        if value == current.total_pool_value {
            return Ok(None);
        }
        let submission = self
            .submitter
            .submit(
                LedgerInstruction::UpdatePoolValue {
                    pool: self.pool_address,
                    new_value: value,
                },
                authority,
                Evidence::None,
            )
            .await?;
        info!(
            "pool value synced: {} -> {value}",
            current.total_pool_value
        );
        Ok(Some(submission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, IntegrationError};
    use crate::pool::feed::{StaticYieldFeed, YieldQuote};
    use crate::testing::TestEnv;
    use shieldvault_keypair::LocalWallet;

    #[tokio::test]
    async fn first_deposit_mints_one_to_one() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.pool_client();

        let receipt = pool.deposit(&id, &wallet, 1_000_000).await.unwrap();
        assert_eq!(receipt.shares_minted, 1_000_000);
        assert_eq!(receipt.deposit_index, 0);

        let state = env.pool_state().await;
        assert_eq!((state.total_pool_value, state.total_shares), (1_000_000, 1_000_000));

        let balance = pool.get_balance(&id).await.unwrap();
        assert_eq!(balance.shares, 1_000_000);
        assert_eq!(balance.value, 1_000_000);
        assert!(!balance.stale);
    }

    #[tokio::test]
    async fn deposit_into_appreciated_pool_mints_fewer_shares() {
        let env = TestEnv::new().await;
        let alice = LocalWallet::from_seed(&[10u8; 32]);
        let bob = LocalWallet::from_seed(&[11u8; 32]);

        env.pool_client()
            .deposit(&env.identity(&alice), &alice, 9_000_000)
            .await
            .unwrap();
        env.set_pool_value(10_000_000).await;

        let receipt = env
            .pool_client()
            .deposit(&env.identity(&bob), &bob, 1_000_000)
            .await
            .unwrap();
        assert_eq!(receipt.shares_minted, 900_000);

        let state = env.pool_state().await;
        assert_eq!((state.total_pool_value, state.total_shares), (11_000_000, 9_900_000));
    }

    #[tokio::test]
    async fn repeated_deposits_accumulate_in_one_envelope() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.pool_client();

        pool.deposit(&id, &wallet, 1_000_000).await.unwrap();
        let second = pool.deposit(&id, &wallet, 500_000).await.unwrap();
        assert_eq!(second.deposit_index, 1);
        assert_eq!(second.total_shares, 1_500_000);
        assert_eq!(pool.get_balance(&id).await.unwrap().shares, 1_500_000);
    }

    #[tokio::test]
    async fn deposit_limits_fail_before_submission() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.pool_client();

        let err = pool.deposit(&id, &wallet, 1).await.unwrap_err();
        assert_eq!(err, VaultError::rule(LedgerError::InsufficientDeposit));
        let err = pool.deposit(&id, &wallet, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(env.ledger.account_count().await, 1);
    }

    #[tokio::test]
    async fn withdraw_burns_rounded_up_shares() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);

        env.pool_client().deposit(&id, &wallet, 9_000_000).await.unwrap();
        env.set_pool_value(10_000_000).await;

        let pool = env.pool_client();
        assert_eq!(pool.quote_withdraw(1).await.unwrap(), 1);
        let receipt = pool.withdraw(&id, &wallet, 1_000_001).await.unwrap();
        // 1_000_001 * 9M / 10M = 900_000.9 -> 900_001
        assert_eq!(receipt.shares_burned, 900_001);
        assert_eq!(receipt.remaining_shares, 8_099_999);

        let state = env.pool_state().await;
        assert_eq!(state.total_shares, 8_099_999);
        assert_eq!(state.total_pool_value, 8_999_999);
        assert_eq!(pool.get_balance(&id).await.unwrap().shares, 8_099_999);
    }

    #[tokio::test]
    async fn withdraw_more_than_balance_is_refused_locally() {
        let env = TestEnv::new().await;
        let alice = LocalWallet::from_seed(&[10u8; 32]);
        let bob = LocalWallet::from_seed(&[11u8; 32]);
        let pool = env.pool_client();
        pool.deposit(&env.identity(&alice), &alice, 5_000_000).await.unwrap();
        pool.deposit(&env.identity(&bob), &bob, 1_000_000).await.unwrap();

        let err = pool
            .withdraw(&env.identity(&bob), &bob, 2_000_000)
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::Rejected(LedgerError::InsufficientBalance));
        assert_eq!(err.kind(), ErrorKind::LedgerRejection);

        let stranger = LocalWallet::from_seed(&[12u8; 32]);
        let err = pool
            .withdraw(&env.identity(&stranger), &stranger, 10)
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::Rejected(LedgerError::InsufficientBalance));
    }

    #[tokio::test]
    async fn drift_refuses_once_then_proceeds() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.pool_client();

        pool.deposit(&id, &wallet, 9_000_000).await.unwrap();
        pool.get_balance(&id).await.unwrap();
        env.set_pool_value(10_000_000).await;

        let err = pool.withdraw(&id, &wallet, 100_000).await.unwrap_err();
        assert!(matches!(err, VaultError::PoolValueDrift { reference: 9_000_000, .. }));
        assert_eq!(err.kind(), ErrorKind::StaleState);

        pool.withdraw(&id, &wallet, 100_000).await.unwrap();
    }

    #[tokio::test]
    async fn other_deposits_are_not_drift() {
        let env = TestEnv::new().await;
        let alice = LocalWallet::from_seed(&[10u8; 32]);
        let bob = LocalWallet::from_seed(&[11u8; 32]);
        let alice_pool = env.pool_client();
        alice_pool.deposit(&env.identity(&alice), &alice, 1_000_000).await.unwrap();
        alice_pool.get_balance(&env.identity(&alice)).await.unwrap();

        env.pool_client()
            .deposit(&env.identity(&bob), &bob, 50_000_000)
            .await
            .unwrap();

        alice_pool
            .withdraw(&env.identity(&alice), &alice, 500_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn balance_falls_back_to_last_state_then_expires() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.flaky_pool_client();
        pool.deposit(&id, &wallet, 2_000_000).await.unwrap();
        pool.get_balance(&id).await.unwrap();

        env.outage(true);
        env.clock.advance(60);
        let balance = pool.get_balance(&id).await.unwrap();
        assert!(balance.stale);
        assert_eq!(balance.value, 2_000_000);

        env.clock.advance(900);
        let err = pool.get_balance(&id).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::Integration(IntegrationError::StaleFeed { .. })
        ));

        env.outage(false);
        assert!(!pool.get_balance(&id).await.unwrap().stale);
    }

    #[tokio::test]
    async fn forgotten_position_has_no_fallback() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let id = env.identity(&wallet);
        let pool = env.flaky_pool_client();
        pool.deposit(&id, &wallet, 2_000_000).await.unwrap();
        pool.get_balance(&id).await.unwrap();
        assert!(pool.remembers(id.commitment()));
        assert_eq!(pool.locks().len(), 1);

        pool.forget(id.commitment());
        assert!(!pool.remembers(id.commitment()));
        assert!(pool.locks().is_empty());

        env.outage(true);
        let err = pool.get_balance(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn unknown_commitment_has_empty_balance() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let pool = env.pool_client();
        pool.deposit(&env.identity(&wallet), &wallet, 1_000_000).await.unwrap();

        let other = VaultIdentity::from_signature(&[0u8; 64], *pool.pool_id());
        let balance = pool.get_balance(&other).await.unwrap();
        assert_eq!((balance.shares, balance.value), (0, 0));
    }

    #[tokio::test]
    async fn yield_sync_is_authority_only() {
        let env = TestEnv::new().await;
        let wallet = LocalWallet::from_seed(&[10u8; 32]);
        let pool = env.pool_client();
        pool.deposit(&env.identity(&wallet), &wallet, 1_000_000).await.unwrap();

        let feed = StaticYieldFeed::new(YieldQuote {
            apy_bps: 500,
            pool_value: 1_050_000,
        });
        let err = pool.sync_yield(&wallet, &feed).await.unwrap_err();
        assert_eq!(err, VaultError::Rejected(LedgerError::Unauthorized));

        assert!(pool.sync_yield(&env.authority, &feed).await.unwrap().is_some());
        assert!(pool.sync_yield(&env.authority, &feed).await.unwrap().is_none());
        assert_eq!(env.pool_state().await.total_pool_value, 1_050_000);
    }
}
