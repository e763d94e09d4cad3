//! Server-side session custody.
//!
//! A session binds a wallet address to the key material derived from its
//! sign-in signature and to a ready client. Entries expire after a fixed TTL:
//! reads check the deadline and a background sweep drops whatever is left.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use shieldvault_keypair::{DerivedKeypair, verify_signature};
use shieldvault_privacy::KEY_DERIVATION_MESSAGE;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::{SessionError, ValidationError, VaultResult};

/// Builds the per-wallet client stored in a session.
pub trait ClientFactory: Send + Sync {
    type Client: Send + Sync + 'static;

    /// `signature` is the verified sign-in signature over the key-derivation
    /// message.
    fn create(&self, wallet_address: &str, signature: &[u8]) -> VaultResult<Self::Client>;

    /// Called once a session's client leaves the store, by sign-out or
    /// expiry.
    fn release(&self, _client: &Self::Client) {}
}

struct Session<C> {
    client: Arc<C>,
    derived_public_key: String,
    created_at: i64,
    expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub wallet_address: String,
    pub derived_public_key: String,
    pub created_at: i64,
    pub expires_at: i64,
}

pub struct SessionManager<F: ClientFactory> {
    sessions: DashMap<String, Session<F::Client>>,
    factory: F,
    ttl_secs: i64,
    clock: SharedClock,
}

fn wallet_public_key(wallet_address: &str) -> VaultResult<[u8; 32]> {
    let bytes = bs58::decode(wallet_address)
        .into_vec()
        .map_err(|e| ValidationError::Malformed(format!("wallet address: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        ValidationError::Malformed(format!(
            "wallet address: expected 32 bytes, got {}",
            bytes.len()
        ))
        .into()
    })
}

impl<F: ClientFactory> SessionManager<F> {
    pub fn new(factory: F, ttl_secs: u64, clock: SharedClock) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            clock,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Verifies the sign-in signature, derives the session keypair and
    /// stores a fresh client. Signing in again replaces the old session.
    pub fn initialize_session(
        &self,
        wallet_address: &str,
        signature: &[u8],
    ) -> VaultResult<SessionInfo> {
        let public_key = wallet_public_key(wallet_address)?;
        verify_signature(&public_key, KEY_DERIVATION_MESSAGE.as_bytes(), signature).map_err(
            |_| SessionError::InvalidSignature {
                wallet: wallet_address.to_owned(),
            },
        )?;

        let derived = DerivedKeypair::from_signature(signature);
        let client = self.factory.create(wallet_address, signature)?;
        let now = self.clock.now();
        let session = Session {
            client: Arc::new(client),
            derived_public_key: derived.public_key_base58(),
            created_at: now,
            expires_at: now.saturating_add(self.ttl_secs),
        };
        let info = SessionInfo {
            wallet_address: wallet_address.to_owned(),
            derived_public_key: session.derived_public_key.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        };

        self.sessions.insert(wallet_address.to_owned(), session);
        info!("session opened for {wallet_address}, expires at {}", info.expires_at);
        Ok(info)
    }

    /// The live client, or `None` when missing or expired. An expired entry
    /// found here is removed.
    pub fn get_client(&self, wallet_address: &str) -> Option<Arc<F::Client>> {
        let now = self.clock.now();
        let live = self
            .sessions
            .get(wallet_address)
            .map(|s| (s.expires_at > now).then(|| s.client.clone()));
        match live {
            Some(Some(client)) => Some(client),
            Some(None) => {
                if let Some((_, session)) = self
                    .sessions
                    .remove_if(wallet_address, |_, s| s.expires_at <= now)
                {
                    self.factory.release(&session.client);
                }
                debug!("session for {wallet_address} expired");
                None
            }
            None => None,
        }
    }

    /// Like [`get_client`](Self::get_client), but as a recoverable error.
    pub fn require_client(&self, wallet_address: &str) -> VaultResult<Arc<F::Client>> {
        self.get_client(wallet_address).ok_or_else(|| {
            SessionError::Missing {
                wallet: wallet_address.to_owned(),
            }
            .into()
        })
    }

    pub fn has_valid_session(&self, wallet_address: &str) -> bool {
        self.get_client(wallet_address).is_some()
    }

    /// Returns whether a session existed.
    pub fn destroy_session(&self, wallet_address: &str) -> bool {
        match self.sessions.remove(wallet_address) {
            Some((_, session)) => {
                self.factory.release(&session.client);
                info!("session closed for {wallet_address}");
                true
            }
            None => false,
        }
    }

    pub fn derived_public_key(&self, wallet_address: &str) -> Option<String> {
        self.session_info(wallet_address)
            .map(|info| info.derived_public_key)
    }

    pub fn session_info(&self, wallet_address: &str) -> Option<SessionInfo> {
        let now = self.clock.now();
        self.sessions
            .get(wallet_address)
            .filter(|s| s.expires_at > now)
            .map(|s| SessionInfo {
                wallet_address: wallet_address.to_owned(),
                derived_public_key: s.derived_public_key.clone(),
                created_at: s.created_at,
                expires_at: s.expires_at,
            })
    }

    /// Drops every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.key().clone())
            .collect();
        let mut removed = 0;
        for wallet in expired {
            if let Some((_, session)) = self.sessions.remove_if(&wallet, |_, s| s.expires_at <= now) {
                self.factory.release(&session.client);
                removed += 1;
            }
        }
        if removed > 0 {
            info!("swept {removed} expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<F: ClientFactory + 'static> SessionManager<F> {
    /// Sweeps every `every` until `token` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_expired();
                    }
                }
            }
        })
    }
}
