//! Per-session vault client: one signed-in wallet's view of the pool and its
//! scheduled transfers.

use std::sync::Arc;

use log::{debug, info, warn};
use shieldvault_keypair::{DerivedKeypair, WalletSigner};

use crate::constants::EXECUTION_GRANT_TTL;
use crate::error::{VaultError, VaultResult};
use crate::identity::VaultIdentity;
use crate::ledger::Submission;
use crate::pool::client::parse_pubkey;
use crate::pool::{Balance, DepositReceipt, PoolClient, WithdrawReceipt};
use crate::session::ClientFactory;
use crate::transfers::{
    CachedTransfer, ExecutionReceipt, GrantRegistry, InFlight, JobSpec, Scheduler, TransferCache,
    TransferClient, TransferSetup, TransferView,
};

/// Optional automated trigger path wired into new transfers.
#[derive(Clone)]
pub struct Automation {
    pub scheduler: Arc<dyn Scheduler>,
    pub funding_lamports: u64,
}

pub struct VaultClient {
    wallet_address: String,
    identity: VaultIdentity,
    signer: Arc<dyn WalletSigner>,
    pool: Arc<PoolClient>,
    transfers: TransferClient,
    cache: Option<Arc<TransferCache>>,
    automation: Option<Automation>,
    grants: Option<Arc<GrantRegistry>>,
}

impl VaultClient {
    pub fn new(
        wallet_address: impl Into<String>,
        identity: VaultIdentity,
        signer: Arc<dyn WalletSigner>,
        pool: Arc<PoolClient>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            identity,
            signer,
            transfers: TransferClient::new(pool.clone(), in_flight),
            pool,
            cache: None,
            automation: None,
            grants: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TransferCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_automation(mut self, automation: Automation) -> Self {
        self.automation = Some(automation);
        self
    }

    /// Transfers set up through this client get an execution grant here.
    pub fn with_grants(mut self, grants: Arc<GrantRegistry>) -> Self {
        self.grants = Some(grants);
        self
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    pub fn identity(&self) -> &VaultIdentity {
        &self.identity
    }

    pub fn pool(&self) -> &Arc<PoolClient> {
        &self.pool
    }

    pub fn transfers(&self) -> &TransferClient {
        &self.transfers
    }

    pub async fn balance(&self) -> VaultResult<Balance> {
        self.pool.get_balance(&self.identity).await
    }

    pub async fn deposit(&self, amount: u64) -> VaultResult<DepositReceipt> {
        self.pool
            .deposit(&self.identity, self.signer.as_ref(), amount)
            .await
    }

    pub async fn withdraw(&self, amount: u64) -> VaultResult<WithdrawReceipt> {
        self.pool
            .withdraw(&self.identity, self.signer.as_ref(), amount)
            .await
    }

    /// Sets up a recurring transfer to a base58 `recipient`, grants the
    /// trigger paths authority to run it, registers it with the job queue
    /// when automation is on, and refreshes the cache.
    pub async fn setup_transfer(
        &self,
        recipient: &str,
        memo: &str,
        amount: u64,
        interval_seconds: u32,
    ) -> VaultResult<TransferSetup> {
        let recipient = parse_pubkey("recipient", recipient)?;
        let setup = self
            .transfers
            .setup(
                &self.identity,
                self.signer.as_ref(),
                recipient.to_bytes(),
                memo,
                amount,
                interval_seconds,
            )
            .await?;

        if let Some(grants) = &self.grants {
            grants.issue(
                &self.wallet_address,
                setup.transfer_id,
                &self.identity,
                self.signer.clone(),
            );
        }
        if let Some(automation) = &self.automation {
            if let Err(e) = self.register_job(automation, &setup).await {
                warn!(
                    "transfer {} stays on the manual path: {e}",
                    setup.transfer_id
                );
            }
        }
        self.refresh_cache().await;
        Ok(setup)
    }

    async fn register_job(&self, automation: &Automation, setup: &TransferSetup) -> VaultResult<()> {
        let job = automation
            .scheduler
            .create_job(JobSpec {
                wallet: self.wallet_address.clone(),
                transfer_id: setup.transfer_id,
                first_run: setup.next_execution,
            })
            .await?;
        automation
            .scheduler
            .fund_job(job, automation.funding_lamports)
            .await?;
        info!("transfer {} automated as job {job}", setup.transfer_id);
        Ok(())
    }

    pub async fn execute_transfer(&self, transfer_id: &str) -> VaultResult<ExecutionReceipt> {
        let transfer_id = parse_pubkey("transfer id", transfer_id)?;
        let receipt = self
            .transfers
            .execute(&self.identity, self.signer.as_ref(), &transfer_id)
            .await?;
        self.refresh_cache().await;
        Ok(receipt)
    }

    pub async fn cancel_transfer(&self, transfer_id: &str) -> VaultResult<Submission> {
        let transfer_id = parse_pubkey("transfer id", transfer_id)?;
        let submission = self
            .transfers
            .cancel(&self.identity, self.signer.as_ref(), &transfer_id)
            .await?;
        self.refresh_cache().await;
        Ok(submission)
    }

    /// Issues grants for every open transfer of this wallet that lacks one,
    /// as after a restart. Returns how many were issued.
    pub async fn authorize_transfers(&self) -> VaultResult<usize> {
        let Some(grants) = &self.grants else {
            return Ok(0);
        };
        let mut issued = 0;
        for view in self.list_transfers().await? {
            if view.state.is_terminal() {
                continue;
            }
            let transfer_id = parse_pubkey("transfer id", &view.transfer_id)?;
            if grants.get(&transfer_id).is_none() {
                grants.issue(
                    &self.wallet_address,
                    transfer_id,
                    &self.identity,
                    self.signer.clone(),
                );
                issued += 1;
            }
        }
        if issued > 0 {
            debug!("{issued} transfers of {} re-authorized", self.wallet_address);
        }
        Ok(issued)
    }

    pub async fn list_transfers(&self) -> VaultResult<Vec<TransferView>> {
        self.transfers.list(&self.identity).await
    }

    pub async fn due_transfers(&self) -> VaultResult<Vec<TransferView>> {
        Ok(self
            .list_transfers()
            .await?
            .into_iter()
            .filter(|v| v.next_execution <= self.pool.clock().now() && !v.state.is_terminal())
            .collect())
    }

    /// Cached listing, usable while the ledger is unreachable.
    pub fn cached_transfers(&self) -> VaultResult<Vec<CachedTransfer>> {
        match &self.cache {
            Some(cache) => cache.load(&self.wallet_address, self.identity.key()),
            None => Ok(Vec::new()),
        }
    }

    async fn refresh_cache(&self) {
        if let Some(cache) = &self.cache {
            cache
                .refresh(&self.wallet_address, &self.identity, &self.transfers)
                .await;
        }
    }
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("wallet_address", &self.wallet_address)
            .field("commitment", self.identity.commitment())
            .finish_non_exhaustive()
    }
}

/// Builds a [`VaultClient`] per session, all sharing one pool client and
/// one grant registry.
///
/// The builder methods replace the registry, so call them before handing
/// [`grants`](Self::grants) to the trigger paths.
pub struct VaultClientFactory {
    pool: Arc<PoolClient>,
    in_flight: Arc<InFlight>,
    cache: Option<Arc<TransferCache>>,
    automation: Option<Automation>,
    grant_ttl_secs: u64,
    grants: Arc<GrantRegistry>,
}

impl VaultClientFactory {
    pub fn new(pool: Arc<PoolClient>) -> Self {
        let in_flight = Arc::new(InFlight::new());
        let grants = Arc::new(GrantRegistry::new(
            Arc::new(TransferClient::new(pool.clone(), in_flight.clone())),
            EXECUTION_GRANT_TTL,
        ));
        Self {
            pool,
            in_flight,
            cache: None,
            automation: None,
            grant_ttl_secs: EXECUTION_GRANT_TTL,
            grants,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TransferCache>) -> Self {
        self.cache = Some(cache);
        self.rebuild_grants();
        self
    }

    pub fn with_automation(mut self, automation: Automation) -> Self {
        self.automation = Some(automation);
        self
    }

    pub fn with_grant_ttl(mut self, secs: u64) -> Self {
        self.grant_ttl_secs = secs;
        self.rebuild_grants();
        self
    }

    fn rebuild_grants(&mut self) {
        let transfers = Arc::new(TransferClient::new(self.pool.clone(), self.in_flight.clone()));
        let mut grants = GrantRegistry::new(transfers, self.grant_ttl_secs);
        if let Some(cache) = &self.cache {
            grants = grants.with_cache(cache.clone());
        }
        self.grants = Arc::new(grants);
    }

    pub fn pool(&self) -> &Arc<PoolClient> {
        &self.pool
    }

    /// Runner and target source for the poller and the job queue.
    pub fn grants(&self) -> &Arc<GrantRegistry> {
        &self.grants
    }
}

impl ClientFactory for VaultClientFactory {
    type Client = VaultClient;

    fn create(&self, wallet_address: &str, signature: &[u8]) -> VaultResult<VaultClient> {
        if signature.is_empty() {
            return Err(VaultError::Internal("empty sign-in signature".into()));
        }
        let identity = VaultIdentity::from_signature(signature, *self.pool.pool_id());
        let signer: Arc<dyn WalletSigner> = Arc::new(DerivedKeypair::from_signature(signature));
        let mut client = VaultClient::new(
            wallet_address,
            identity,
            signer,
            self.pool.clone(),
            self.in_flight.clone(),
        )
        .with_grants(self.grants.clone());
        if let Some(cache) = &self.cache {
            client = client.with_cache(cache.clone());
        }
        if let Some(automation) = &self.automation {
            client = client.with_automation(automation.clone());
        }
        let renewed = self.grants.renew(wallet_address);
        if renewed > 0 {
            debug!("renewed {renewed} execution grants for {wallet_address}");
        }
        Ok(client)
    }

    /// Drops the pool client's cached position for the departing wallet.
    fn release(&self, client: &VaultClient) {
        self.pool.forget(client.identity().commitment());
    }
}
