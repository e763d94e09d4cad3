//! Execution grants.
//!
//! Setting up a transfer leaves behind the authority to run it: the owner's
//! identity and derived signer, scoped to that one transfer. The poller and
//! the job queue work through grants, so a slot that falls due executes
//! whether or not its owner is signed in.
//!
//! A grant lives for the grant TTL past the owner's last setup or sign-in.
//! The first run that finds its transfer cancelled or exhausted revokes it,
//! and the same outcome closes the transfer's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use shieldvault_keypair::WalletSigner;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use super::automation::{JobStep, JobTarget, TargetSource};
use super::cache::TransferCache;
use super::client::{RunOutcome, TransferClient};
use super::poller::{DueRunner, RunReport, RunnerSource};
use crate::error::{LedgerError, VaultError, VaultResult};
use crate::identity::VaultIdentity;

pub struct ExecutionGrant {
    wallet: String,
    transfer_id: Pubkey,
    identity: VaultIdentity,
    signer: Arc<dyn WalletSigner>,
    transfers: Arc<TransferClient>,
    cache: Option<Arc<TransferCache>>,
    expires_at: AtomicI64,
    revoked: AtomicBool,
}

impl ExecutionGrant {
    pub fn expires_at(&self) -> i64 {
        self.expires_at.load(Ordering::SeqCst)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    fn live_at(&self, now: i64) -> bool {
        !self.is_revoked() && self.expires_at() > now
    }

    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Runs the transfer's current slot if it is due.
    ///
    /// Leaves no share count cached on the pool client unless one was
    /// already there.
    pub async fn run(&self) -> VaultResult<RunOutcome> {
        let pool = self.transfers.pool();
        let commitment = self.identity.commitment();
        let remembered = pool.remembers(commitment);
        let result = self
            .transfers
            .run_due(&self.identity, self.signer.as_ref(), &self.transfer_id)
            .await;
        if !remembered {
            pool.forget(commitment);
        }

        match &result {
            Ok(RunOutcome::Closed { state }) => {
                info!(transfer = %self.transfer_id, ?state, "transfer closed, revoking grant");
                self.revoke();
            }
            Ok(RunOutcome::Executed { .. } | RunOutcome::Skipped { .. }) => {
                if let Some(cache) = &self.cache {
                    cache
                        .refresh(&self.wallet, &self.identity, &self.transfers)
                        .await;
                }
            }
            Err(e)
                if matches!(
                    e.ledger_code(),
                    Some(LedgerError::AccountNotFound | LedgerError::Unauthorized)
                ) =>
            {
                warn!(transfer = %self.transfer_id, error = %e, "grant cannot act on transfer, revoking");
                self.revoke();
            }
            _ => {}
        }
        result
    }
}

impl std::fmt::Debug for ExecutionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGrant")
            .field("wallet", &self.wallet)
            .field("transfer_id", &self.transfer_id)
            .field("expires_at", &self.expires_at())
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DueRunner for ExecutionGrant {
    fn label(&self) -> String {
        format!("{}/{}", self.wallet, self.transfer_id)
    }

    async fn run_due(&self) -> VaultResult<Vec<RunReport>> {
        match self.run().await {
            Ok(RunOutcome::NotDue) => Ok(Vec::new()),
            result => Ok(vec![RunReport {
                transfer_id: self.transfer_id,
                result,
            }]),
        }
    }
}

#[async_trait]
impl JobTarget for ExecutionGrant {
    async fn run_transfer(&self, transfer_id: &Pubkey) -> VaultResult<JobStep> {
        if *transfer_id != self.transfer_id {
            return Err(VaultError::Rejected(LedgerError::Unauthorized));
        }
        let outcome = self.run().await?;
        let next_execution = self.transfers.fetch(transfer_id).await?.next_execution;
        Ok(JobStep {
            outcome,
            next_execution,
        })
    }
}

/// Every live grant, keyed by transfer.
pub struct GrantRegistry {
    grants: DashMap<Pubkey, Arc<ExecutionGrant>>,
    transfers: Arc<TransferClient>,
    cache: Option<Arc<TransferCache>>,
    ttl_secs: i64,
}

impl GrantRegistry {
    pub fn new(transfers: Arc<TransferClient>, ttl_secs: u64) -> Self {
        Self {
            grants: DashMap::new(),
            transfers,
            cache: None,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn with_cache(mut self, cache: Arc<TransferCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn transfers(&self) -> &Arc<TransferClient> {
        &self.transfers
    }

    fn now(&self) -> i64 {
        self.transfers.pool().clock().now()
    }

    /// Grants `identity` standing authority over `transfer_id`. Issuing
    /// again for the same transfer replaces the grant with a fresh TTL.
    pub fn issue(
        &self,
        wallet: &str,
        transfer_id: Pubkey,
        identity: &VaultIdentity,
        signer: Arc<dyn WalletSigner>,
    ) -> Arc<ExecutionGrant> {
        let expires_at = self.now().saturating_add(self.ttl_secs);
        let grant = Arc::new(ExecutionGrant {
            wallet: wallet.to_owned(),
            transfer_id,
            identity: identity.clone(),
            signer,
            transfers: self.transfers.clone(),
            cache: self.cache.clone(),
            expires_at: AtomicI64::new(expires_at),
            revoked: AtomicBool::new(false),
        });
        self.grants.insert(transfer_id, grant.clone());
        debug!(transfer = %transfer_id, expires_at, "execution grant issued");
        grant
    }

    /// Restarts the TTL of every live grant held for `wallet`. Returns how
    /// many were renewed.
    pub fn renew(&self, wallet: &str) -> usize {
        let now = self.now();
        let expires_at = now.saturating_add(self.ttl_secs);
        let mut renewed = 0;
        for grant in self.grants.iter().filter(|g| g.wallet == wallet) {
            if grant.live_at(now) {
                grant.expires_at.store(expires_at, Ordering::SeqCst);
                renewed += 1;
            }
        }
        renewed
    }

    /// The live grant for `transfer_id`.
    pub fn get(&self, transfer_id: &Pubkey) -> Option<Arc<ExecutionGrant>> {
        let now = self.now();
        self.grants
            .get(transfer_id)
            .filter(|g| g.live_at(now))
            .map(|g| g.clone())
    }

    /// Drops expired and revoked grants. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        let before = self.grants.len();
        self.grants.retain(|_, g| g.live_at(now));
        let removed = before.saturating_sub(self.grants.len());
        if removed > 0 {
            info!(removed, "dropped lapsed execution grants");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl RunnerSource for GrantRegistry {
    type Runner = ExecutionGrant;

    fn runners(&self) -> Vec<Arc<ExecutionGrant>> {
        self.sweep();
        self.grants.iter().map(|g| g.clone()).collect()
    }
}

impl TargetSource for GrantRegistry {
    type Target = ExecutionGrant;

    fn target(&self, wallet: &str, transfer_id: &Pubkey) -> Option<Arc<ExecutionGrant>> {
        self.get(transfer_id).filter(|g| g.wallet == wallet)
    }
}
