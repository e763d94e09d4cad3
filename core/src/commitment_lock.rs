//! Per-commitment local serialization.
//!
//! Only spares this process from racing itself on one position. The ledger
//! stays the real serialization point: a second process, or the job queue on
//! another host, still gets `StaleShareState` and has to refetch.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct CommitmentLocks {
    locks: DashMap<[u8; 32], Arc<Mutex<()>>>,
}

impl CommitmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, commitment: &[u8; 32]) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(*commitment)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
