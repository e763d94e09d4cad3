//! Local transfer cache for UI listings.
//!
//! Entries are sealed with the wallet's encryption key and keyed by a hash of
//! the wallet address, so the store never sees recipients or addresses in
//! the clear. The ledger always wins: [`TransferCache::reconcile`] rebuilds
//! the cached list from ledger views.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use log::{debug, warn};
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use serde::{Deserialize, Serialize};
use shieldvault_privacy::{EncryptionKey, open_blob, seal_blob};

use super::client::TransferClient;
use super::state::TransferView;
use crate::error::{VaultError, VaultResult};
use crate::identity::VaultIdentity;

const CF_TRANSFER_CACHE: &str = "transfer_cache";
const CACHE_KEY_CONTEXT: &str = "shieldvault transfer cache v1";

pub type CacheKey = [u8; 32];

/// Byte store behind the cache.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &CacheKey) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        self.entries.insert(*key, value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// RocksDB-backed store.
#[derive(Clone)]
pub struct RocksCacheStore {
    db: Arc<DB>,
}

impl RocksCacheStore {
    /// Opens the database at `path`, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = vec![ColumnFamilyDescriptor::new(
            CF_TRANSFER_CACHE,
            Options::default(),
        )];
        let db = DB::open_cf_descriptors(&opts, path, families)
            .map_err(|e| anyhow::anyhow!("Failed to open transfer cache: {}", e))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl CacheStore for RocksCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(CF_TRANSFER_CACHE)
            .context("Column family 'transfer_cache' missing")?;
        Ok(self.db.get_cf(cf, key)?)
    }

    fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_TRANSFER_CACHE)
            .context("Column family 'transfer_cache' missing")?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_TRANSFER_CACHE)
            .context("Column family 'transfer_cache' missing")?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTransfer {
    pub transfer_id: String,
    /// Base58; empty when never known.
    pub recipient: String,
    pub amount: u64,
    pub interval_seconds: u32,
    pub created_at: i64,
    /// Scheduled time of the last processed slot.
    pub last_executed: Option<i64>,
}

impl CachedTransfer {
    fn from_view(view: &TransferView, previous: Option<&CachedTransfer>) -> Self {
        let recipient = view
            .recipient
            .clone()
            .or_else(|| previous.map(|p| p.recipient.clone()))
            .unwrap_or_default();
        let last_executed = (view.execution_count > 0)
            .then(|| view.next_execution - i64::from(view.interval_seconds));
        Self {
            transfer_id: view.transfer_id.clone(),
            recipient,
            amount: view.amount,
            interval_seconds: view.interval_seconds,
            created_at: view.created_at,
            last_executed,
        }
    }
}

pub fn cache_key(wallet: &str) -> CacheKey {
    blake3::derive_key(CACHE_KEY_CONTEXT, wallet.as_bytes())
}

pub struct TransferCache {
    store: Arc<dyn CacheStore>,
}

fn store_error(e: anyhow::Error) -> VaultError {
    VaultError::Internal(format!("transfer cache: {e:#}"))
}

impl TransferCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Cached entries, empty when nothing is stored or the entry no longer
    /// opens with `key`.
    pub fn load(&self, wallet: &str, key: &EncryptionKey) -> VaultResult<Vec<CachedTransfer>> {
        let id = cache_key(wallet);
        let Some(blob) = self.store.get(&id).map_err(store_error)? else {
            return Ok(Vec::new());
        };
        let plain = match open_blob(key, &id, &blob) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("dropping unreadable transfer cache entry: {e}");
                self.store.delete(&id).map_err(store_error)?;
                return Ok(Vec::new());
            }
        };
        serde_json::from_slice(&plain)
            .map_err(|e| VaultError::Internal(format!("transfer cache: {e}")))
    }

    pub fn save(
        &self,
        wallet: &str,
        key: &EncryptionKey,
        entries: &[CachedTransfer],
    ) -> VaultResult<()> {
        let id = cache_key(wallet);
        let plain = serde_json::to_vec(entries)
            .map_err(|e| VaultError::Internal(format!("transfer cache: {e}")))?;
        let blob = seal_blob(key, &id, &plain)?;
        self.store.put(&id, &blob).map_err(store_error)
    }

    pub fn clear(&self, wallet: &str) -> VaultResult<()> {
        self.store.delete(&cache_key(wallet)).map_err(store_error)
    }

    /// Replaces the cached list with the ledger's live transfers.
    ///
    /// Entries missing from the ledger or closed there are dropped, and
    /// every field the ledger carries overrides the cached one.
    pub fn reconcile(
        &self,
        wallet: &str,
        key: &EncryptionKey,
        ledger: &[TransferView],
    ) -> VaultResult<Vec<CachedTransfer>> {
        let cached: HashMap<String, CachedTransfer> = self
            .load(wallet, key)?
            .into_iter()
            .map(|c| (c.transfer_id.clone(), c))
            .collect();

        let merged: Vec<CachedTransfer> = ledger
            .iter()
            .filter(|v| !v.state.is_terminal())
            .map(|v| CachedTransfer::from_view(v, cached.get(&v.transfer_id)))
            .collect();

        let dropped = cached
            .keys()
            .filter(|id| !merged.iter().any(|m| &&m.transfer_id == id))
            .count();
        if dropped > 0 {
            debug!("transfer cache: dropped {dropped} entries the ledger no longer lists");
        }
        self.save(wallet, key, &merged)?;
        Ok(merged)
    }

    /// Reconciles `wallet`'s entries against a fresh ledger listing.
    /// Failures only cost the UI a fresh listing, so they are logged and
    /// dropped.
    pub async fn refresh(&self, wallet: &str, identity: &VaultIdentity, transfers: &TransferClient) {
        let result = match transfers.list(identity).await {
            Ok(views) => self.reconcile(wallet, identity.key(), &views).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("transfer cache refresh failed: {e}");
        }
    }
}
