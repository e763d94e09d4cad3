//! ShieldVault core.
//!
//! Pooled funds with private per-user positions: share accounting against an
//! authoritative ledger, recurring transfers that can never execute twice,
//! and short-lived server-side sessions holding wallet-derived keys.
//!
//! ```text
//!   wallet signature
//!         │
//!         ▼
//!   SessionManager ──> VaultClient ──┬──> PoolClient ─────┐
//!                         │          └──> TransferClient ─┤
//!                         │ setup                         ▼
//!                         ▼                    Submitter ──> Ledger
//!   poller / job queue ──> GrantRegistry ──> TransferClient
//! ```

pub mod api;
pub mod client;
pub mod clock;
pub mod commitment_lock;
pub mod constants;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod pool;
pub mod session;
pub mod transfers;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Automation, VaultClient, VaultClientFactory};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use identity::VaultIdentity;
pub use session::{ClientFactory, SessionInfo, SessionManager};

use solana_sdk::pubkey::Pubkey;

/// Serializes a pubkey as its base58 string.
pub(crate) fn serde_pubkey<S: serde::Serializer>(pk: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(pk)
}
