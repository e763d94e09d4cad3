//! Signing, submission and bounded retry.
//!
//! Transient failures are retried with exponential backoff. When the outcome
//! of a submission is unknown (timeout, dropped connection) the expected
//! side effect is queried first; the instruction is only resubmitted once
//! the ledger confirms it did not land.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use shieldvault_config::RpcConfig;
use shieldvault_keypair::WalletSigner;
use solana_sdk::pubkey::Pubkey;

use super::accounts::ScheduledTransfer;
use super::instruction::{LedgerInstruction, SignedInstruction};
use super::{Ledger, TxReceipt, fetch_account};
use crate::error::{SubmitError, TransientError, VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub confirm_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RpcConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_secs(10),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
        }
    }

    /// `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// How to tell whether an instruction with an unknown outcome landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Nothing observable; a resubmission is harmless.
    None,
    /// The nullifier record at this address exists.
    NullifierUsed(Pubkey),
    /// The account the instruction creates exists.
    AccountExists(Pubkey),
    /// The transfer at this address is no longer active.
    TransferInactive(Pubkey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Confirmed(TxReceipt),
    /// The receipt was lost, but the ledger shows the side effect.
    Recovered,
}

impl Submission {
    pub fn signature(&self) -> Option<&str> {
        match self {
            Submission::Confirmed(receipt) => Some(&receipt.signature),
            Submission::Recovered => None,
        }
    }
}

pub struct Submitter {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn Ledger>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn submit(
        &self,
        instruction: LedgerInstruction,
        signer: &dyn WalletSigner,
        evidence: Evidence,
    ) -> VaultResult<Submission> {
        let name = instruction.name();
        let tx = SignedInstruction::sign(instruction, signer)?;
        let mut attempt = 0u32;
        let mut uncertain = false;

        loop {
            let outcome =
                match tokio::time::timeout(self.policy.confirm_timeout, self.ledger.submit(tx.clone()))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SubmitError::OutcomeUnknown),
                };

            match outcome {
                Ok(receipt) => return Ok(Submission::Confirmed(receipt)),

                Err(SubmitError::Rejected(e)) => {
                    // An earlier attempt may have landed after we gave up on it.
                    if uncertain && evidence != Evidence::None && self.landed(&evidence).await? {
                        debug!("{name}: earlier attempt landed, treating {e} as success");
                        return Ok(Submission::Recovered);
                    }
                    return Err(VaultError::Rejected(e));
                }

                Err(SubmitError::Transient(e)) => {
                    if attempt >= self.policy.max_retries {
                        warn!("{name}: giving up after {attempt} retries: {e}");
                        return Err(e.into());
                    }
                    debug!("{name}: transient failure, retrying: {e}");
                }

                Err(SubmitError::OutcomeUnknown) => {
                    uncertain = true;
                    if self.landed(&evidence).await? {
                        debug!("{name}: outcome unknown but side effect present");
                        return Ok(Submission::Recovered);
                    }
                    if attempt >= self.policy.max_retries {
                        warn!("{name}: outcome unknown after {attempt} retries");
                        return Err(TransientError::Timeout.into());
                    }
                    debug!("{name}: did not land, resubmitting");
                }
            }

            tokio::time::sleep(self.policy.backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// Queries the ledger until it answers. Never resubmits.
    async fn landed(&self, evidence: &Evidence) -> VaultResult<bool> {
        let mut attempt = 0u32;
        loop {
            match self.check(evidence).await {
                Ok(landed) => return Ok(landed),
                Err(VaultError::Transient(e)) if attempt < self.policy.max_retries => {
                    debug!("outcome check failed, retrying: {e}");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn check(&self, evidence: &Evidence) -> VaultResult<bool> {
        match evidence {
            Evidence::None => Ok(false),
            Evidence::NullifierUsed(address) | Evidence::AccountExists(address) => {
                Ok(self.ledger.get_account(address).await?.is_some())
            }
            Evidence::TransferInactive(address) => {
                let transfer =
                    fetch_account::<ScheduledTransfer>(self.ledger.as_ref(), address).await?;
                Ok(transfer.is_some_and(|t| !t.is_active))
            }
        }
    }
}
