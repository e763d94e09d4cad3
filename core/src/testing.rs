//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use shieldvault_keypair::LocalWallet;
use solana_sdk::pubkey::Pubkey;

use crate::clock::ManualClock;
use crate::error::{SubmitError, TransientError};
use crate::identity::VaultIdentity;
use crate::ledger::accounts::AccountData;
use crate::ledger::{
    InMemoryLedger, Ledger, LedgerInstruction, LedgerRules, ProgramAddresses, RetryPolicy,
    ShieldPool, Submitter, TxReceipt,
};
use crate::ledger::instruction::SignedInstruction;
use crate::pool::PoolClient;

pub const START: i64 = 1_700_000_000;
pub const PROGRAM_ID: [u8; 32] = [7u8; 32];
pub const POOL_ID: [u8; 32] = [2u8; 32];

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        confirm_timeout: Duration::from_secs(5),
    }
}

/// Ledger whose reads and writes fail while `down` is set.
pub struct OutageLedger {
    inner: Arc<InMemoryLedger>,
    down: Arc<AtomicBool>,
}

#[async_trait]
impl Ledger for OutageLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, TransientError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransientError::Unavailable("outage".into()));
        }
        self.inner.get_account(address).await
    }

    async fn get_program_accounts(
        &self,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, TransientError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransientError::Unavailable("outage".into()));
        }
        self.inner.get_program_accounts(discriminator).await
    }

    async fn submit(
        &self,
        tx: SignedInstruction,
    ) -> Result<TxReceipt, SubmitError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SubmitError::Transient(TransientError::Unavailable(
                "outage".into(),
            )));
        }
        self.inner.submit(tx).await
    }
}

pub struct TestEnv {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<InMemoryLedger>,
    pub authority: LocalWallet,
    down: Arc<AtomicBool>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = Arc::new(InMemoryLedger::new(
            ProgramAddresses::new(Pubkey::new_from_array(PROGRAM_ID)),
            LedgerRules::default(),
            clock.clone(),
        ));
        let env = Self {
            clock,
            ledger,
            authority: LocalWallet::from_seed(&[1u8; 32]),
            down: Arc::new(AtomicBool::new(false)),
        };
        env.pool_client()
            .initialize_pool(&env.authority)
            .await
            .unwrap();
        env
    }

    pub fn pool_id(&self) -> Pubkey {
        Pubkey::new_from_array(POOL_ID)
    }

    pub fn pool_address(&self) -> Pubkey {
        self.ledger.addresses().pool(&self.pool_id()).0
    }

    pub fn submitter(&self) -> Arc<Submitter> {
        Arc::new(Submitter::new(self.ledger.clone(), fast_policy()))
    }

    pub fn pool_client(&self) -> PoolClient {
        PoolClient::new(
            self.submitter(),
            *self.ledger.addresses(),
            self.pool_id(),
            self.clock.clone(),
        )
    }

    /// Pool client behind a ledger that [`TestEnv::outage`] can take down.
    pub fn flaky_pool_client(&self) -> PoolClient {
        let ledger = Arc::new(OutageLedger {
            inner: self.ledger.clone(),
            down: self.down.clone(),
        });
        PoolClient::new(
            Arc::new(Submitter::new(ledger, fast_policy())),
            *self.ledger.addresses(),
            self.pool_id(),
            self.clock.clone(),
        )
    }

    pub fn outage(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn identity(&self, wallet: &LocalWallet) -> VaultIdentity {
        VaultIdentity::sign_in(wallet, self.pool_id()).unwrap()
    }

    pub async fn pool_state(&self) -> ShieldPool {
        let data = self
            .ledger
            .get_account(&self.pool_address())
            .await
            .unwrap()
            .unwrap();
        ShieldPool::decode(&data).unwrap()
    }

    /// Simulates yield by setting the pool value as the authority.
    pub async fn set_pool_value(&self, new_value: u64) {
        let ix = LedgerInstruction::UpdatePoolValue {
            pool: self.pool_address(),
            new_value,
        };
        let tx = SignedInstruction::sign(ix, &self.authority).unwrap();
        self.ledger.submit(tx).await.unwrap();
    }
}
