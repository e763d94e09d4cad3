//! API Types
//!
//! Request/response types for the HTTP API.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, VaultError};
use crate::ledger::Submission;
use crate::transfers::{CachedTransfer, TransferView};

// ============================================================================
// Session
// ============================================================================

/// Sign-in: the wallet's signature over the key-derivation message
#[derive(Debug, Deserialize)]
pub struct InitSessionRequest {
    pub wallet_address: String,
    /// Base58 ed25519 signature
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct DestroySessionResponse {
    pub wallet_address: String,
    pub destroyed: bool,
}

// ============================================================================
// Pool
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub wallet_address: String,
    pub shares: u64,
    pub value: u64,
    /// Served from the last known pool state
    pub stale: bool,
    pub as_of: i64,
}

/// Deposit or withdraw request
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub wallet_address: String,
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub shares_minted: u64,
    pub total_shares: u64,
    pub deposit_index: u64,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub shares_burned: u64,
    pub remaining_shares: u64,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

// ============================================================================
// Transfers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TransfersResponse {
    pub wallet_address: String,
    pub transfers: Vec<TransferView>,
}

#[derive(Debug, Serialize)]
pub struct CachedTransfersResponse {
    pub wallet_address: String,
    pub transfers: Vec<CachedTransfer>,
}

#[derive(Debug, Deserialize)]
pub struct SetupTransferRequest {
    pub wallet_address: String,
    /// Base58 recipient address
    pub recipient: String,
    pub amount: u64,
    pub interval_seconds: u32,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Serialize)]
pub struct SetupTransferResponse {
    pub transfer_id: String,
    pub transfer_nonce: u64,
    pub next_execution: i64,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

/// Manual execution or cancellation of one transfer
#[derive(Debug, Deserialize)]
pub struct TransferActionRequest {
    pub wallet_address: String,
    pub transfer_id: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteTransferResponse {
    pub transfer_id: String,
    pub execution_index: u64,
    pub shares_burned: u64,
    pub remaining_shares: u64,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

#[derive(Debug, Serialize)]
pub struct CancelTransferResponse {
    pub transfer_id: String,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

/// How a ledger write was confirmed
#[derive(Debug, Serialize)]
pub struct SubmissionInfo {
    pub signature: Option<String>,
    /// The receipt was lost but the ledger shows the effect
    pub recovered: bool,
}

impl From<&Submission> for SubmissionInfo {
    fn from(submission: &Submission) -> Self {
        Self {
            signature: submission.signature().map(str::to_owned),
            recovered: matches!(submission, Submission::Recovered),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

// ============================================================================
// Error Response
// ============================================================================

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Program error code when the ledger rule is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_code: Option<u32>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            ledger_code: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(msg, "BAD_REQUEST")
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(msg, "INTERNAL_ERROR")
    }

    pub fn from_error(e: &VaultError) -> (StatusCode, Self) {
        let (status, code) = match e.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ErrorKind::Session => (StatusCode::UNAUTHORIZED, "SESSION_REQUIRED"),
            ErrorKind::LedgerRejection => (StatusCode::CONFLICT, "LEDGER_REJECTED"),
            ErrorKind::StaleState => (StatusCode::CONFLICT, "STALE_STATE"),
            ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ErrorKind::Integration => (StatusCode::SERVICE_UNAVAILABLE, "INTEGRATION_UNAVAILABLE"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let mut body = Self::new(e.to_string(), code);
        body.ledger_code = e.ledger_code().map(|l| l.code());
        (status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LedgerError, SessionError, TransientError};

    #[test]
    fn error_kinds_map_to_statuses() {
        let (status, body) =
            ErrorResponse::from_error(&VaultError::Rejected(LedgerError::NullifierAlreadyUsed));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.ledger_code, Some(LedgerError::NullifierAlreadyUsed.code()));

        let (status, body) = ErrorResponse::from_error(&VaultError::Session(
            SessionError::Missing { wallet: "w".into() },
        ));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.error.contains("sign in again"));

        let (status, _) = ErrorResponse::from_error(&VaultError::rule(LedgerError::InvalidInterval));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = ErrorResponse::from_error(&TransientError::Timeout.into());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = ErrorResponse::from_error(&VaultError::PoolValueDrift {
            reference: 100,
            observed: 110,
            tolerance_bps: 100,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.ledger_code, None);
    }
}
