//! Client-side view of a scheduled transfer.
//!
//! ```text
//! Created ──setup──> Active ──due──> Due ──claim──> Executing ──ok──> Active
//!                      │                               │
//!                      └──cancel──> Cancelled          └──3 skips──> Exhausted
//! ```
//!
//! `Created` only exists before the setup instruction lands. Cancelled and
//! Exhausted are terminal: the ledger never reactivates a transfer.

use serde::Serialize;
use shieldvault_privacy::{EncryptionKey, TransferPayload};

use crate::ledger::{CloseReason, ScheduledTransfer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Active,
    Due,
    /// A local trigger path has claimed the current execution.
    Executing,
    Cancelled,
    Exhausted,
}

impl TransferState {
    pub fn derive(transfer: &ScheduledTransfer, now: i64, in_flight: bool) -> Self {
        if !transfer.is_active {
            return match transfer.close_reason {
                CloseReason::Exhausted => TransferState::Exhausted,
                // An inactive record with no reason predates close reasons.
                CloseReason::Cancelled | CloseReason::Open => TransferState::Cancelled,
            };
        }
        if in_flight {
            TransferState::Executing
        } else if transfer.is_due(now) {
            TransferState::Due
        } else {
            TransferState::Active
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Cancelled | TransferState::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferView {
    pub transfer_id: String,
    pub transfer_nonce: u64,
    pub amount: u64,
    pub interval_seconds: u32,
    pub next_execution: i64,
    pub execution_count: u64,
    pub total_transferred: u64,
    pub skip_count: u8,
    pub created_at: i64,
    pub state: TransferState,
    /// Base58 recipient, when the payload opens with the caller's key.
    pub recipient: Option<String>,
    pub memo: Option<String>,
}

impl TransferView {
    pub fn new(
        transfer: &ScheduledTransfer,
        key: &EncryptionKey,
        now: i64,
        in_flight: bool,
    ) -> Self {
        let payload: Option<TransferPayload> = transfer.encrypted_payload.open(key).ok();
        Self {
            transfer_id: transfer.transfer_id.to_string(),
            transfer_nonce: transfer.transfer_nonce,
            amount: transfer.amount,
            interval_seconds: transfer.interval_seconds,
            next_execution: transfer.next_execution,
            execution_count: transfer.execution_count,
            total_transferred: transfer.total_transferred,
            skip_count: transfer.skip_count,
            created_at: transfer.created_at,
            state: TransferState::derive(transfer, now, in_flight),
            recipient: payload
                .as_ref()
                .map(|p| bs58::encode(p.recipient).into_string()),
            memo: payload.map(|p| p.memo),
        }
    }
}
