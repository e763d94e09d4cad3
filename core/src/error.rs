//! Error taxonomy.
//!
//! Every fallible operation returns [`VaultError`]. Its [`ErrorKind`] tells a
//! caller what to do next: fix the input, sign in again, refetch and rebuild,
//! back off and retry, or stop and wait for an integration to recover.

use serde::Serialize;
use shieldvault_keypair::SignerError;
use shieldvault_privacy::PrivacyError;
use thiserror::Error;

/// Semantic rejections the ledger enforces. Never retried verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LedgerError {
    #[error("deposit below minimum")]
    InsufficientDeposit,
    #[error("deposit exceeds maximum")]
    DepositExceedsMaximum,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("nullifier already used")]
    NullifierAlreadyUsed,
    #[error("transfer not due yet")]
    TransferNotDue,
    #[error("transfer is not active")]
    TransferNotActive,
    #[error("invalid transfer interval")]
    InvalidInterval,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("transfer already cancelled")]
    TransferAlreadyCancelled,
    #[error("unauthorized")]
    Unauthorized,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("pool not initialized")]
    PoolNotInitialized,
    #[error("invalid share calculation")]
    InvalidShareCalculation,
    #[error("share state changed since the balance was computed")]
    StaleShareState,
    #[error("invalid ownership proof")]
    InvalidProof,
    #[error("execution index does not match the transfer")]
    InvalidExecutionIndex,
    #[error("account not found")]
    AccountNotFound,
    #[error("account already exists")]
    AccountAlreadyExists,
}

impl LedgerError {
    const ALL: [LedgerError; 18] = [
        LedgerError::InsufficientDeposit,
        LedgerError::DepositExceedsMaximum,
        LedgerError::InsufficientBalance,
        LedgerError::NullifierAlreadyUsed,
        LedgerError::TransferNotDue,
        LedgerError::TransferNotActive,
        LedgerError::InvalidInterval,
        LedgerError::InvalidAmount,
        LedgerError::TransferAlreadyCancelled,
        LedgerError::Unauthorized,
        LedgerError::ArithmeticOverflow,
        LedgerError::PoolNotInitialized,
        LedgerError::InvalidShareCalculation,
        LedgerError::StaleShareState,
        LedgerError::InvalidProof,
        LedgerError::InvalidExecutionIndex,
        LedgerError::AccountNotFound,
        LedgerError::AccountAlreadyExists,
    ];

    /// Program error code (custom codes start at 6000).
    pub fn code(&self) -> u32 {
        6000 + Self::ALL.iter().position(|e| e == self).unwrap_or_default() as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        code.checked_sub(6000)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }

    /// Rejections caused by the caller racing another writer. The right
    /// response is to refetch and recompute, not to give up.
    pub fn is_stale_state(&self) -> bool {
        matches!(
            self,
            LedgerError::StaleShareState | LedgerError::InvalidProof
        )
    }
}

/// Failures where the request may not have been processed at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransientError {
    #[error("ledger request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("blockhash expired")]
    BlockhashExpired,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Result of handing a signed instruction to the ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("rejected: {0}")]
    Rejected(LedgerError),
    /// The ledger never accepted the request; resubmitting is safe.
    #[error("transient: {0}")]
    Transient(TransientError),
    /// The request may or may not have landed.
    #[error("submission outcome unknown")]
    OutcomeUnknown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountDecodeError {
    #[error("{kind}: expected {expected} bytes, got {actual}")]
    Length {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{kind}: discriminator mismatch")]
    Discriminator { kind: &'static str },
    #[error("{kind}.{field}: invalid bool byte {value}")]
    InvalidBool {
        kind: &'static str,
        field: &'static str,
        value: u8,
    },
    #[error("{kind}.{field}: unknown variant {value}")]
    InvalidEnum {
        kind: &'static str,
        field: &'static str,
        value: u8,
    },
}

/// Checks performed before anything is sent to the ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    /// Pre-flight check of a rule the ledger would also reject.
    #[error("{0}")]
    Rule(LedgerError),
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("{field} {value} does not fit in 32 bits")]
    NonceOutOfRange { field: &'static str, value: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no active session for {wallet}, please sign in again")]
    Missing { wallet: String },
    #[error("signature does not match wallet {wallet}")]
    InvalidSignature { wallet: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("yield feed unavailable: {0}")]
    FeedUnavailable(String),
    #[error("last known pool value is {age_secs}s old")]
    StaleFeed { age_secs: i64 },
    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
    #[error("unknown job {0}")]
    UnknownJob(u64),
}

/// Coarse classification used for retry decisions and HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Session,
    LedgerRejection,
    StaleState,
    Transient,
    Integration,
    Internal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("ledger rejected the operation: {0}")]
    Rejected(LedgerError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("pool value drifted from {reference} to {observed} (tolerance {tolerance_bps} bps)")]
    PoolValueDrift {
        reference: u64,
        observed: u64,
        tolerance_bps: u64,
    },

    #[error("share balance could not be decrypted")]
    Decryption,

    #[error("account decode failed: {0}")]
    Decode(#[from] AccountDecodeError),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::Session(_) => ErrorKind::Session,
            VaultError::Rejected(e) if e.is_stale_state() => ErrorKind::StaleState,
            VaultError::Rejected(_) => ErrorKind::LedgerRejection,
            VaultError::PoolValueDrift { .. } => ErrorKind::StaleState,
            VaultError::Transient(_) => ErrorKind::Transient,
            VaultError::Integration(_) => ErrorKind::Integration,
            VaultError::Signer(SignerError::Declined) => ErrorKind::Session,
            VaultError::Decryption
            | VaultError::Decode(_)
            | VaultError::Signer(_)
            | VaultError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The ledger rule behind this error, whether it was caught locally or
    /// reported by the ledger.
    pub fn ledger_code(&self) -> Option<LedgerError> {
        match self {
            VaultError::Rejected(e) | VaultError::Validation(ValidationError::Rule(e)) => Some(*e),
            _ => None,
        }
    }

    pub fn rule(e: LedgerError) -> Self {
        VaultError::Validation(ValidationError::Rule(e))
    }
}

impl From<LedgerError> for VaultError {
    fn from(e: LedgerError) -> Self {
        VaultError::Rejected(e)
    }
}

impl From<PrivacyError> for VaultError {
    fn from(e: PrivacyError) -> Self {
        match e {
            PrivacyError::Decryption => VaultError::Decryption,
            PrivacyError::Encryption => VaultError::Internal("encryption failed".into()),
            other => VaultError::Validation(ValidationError::Malformed(other.to_string())),
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_codes_roundtrip() {
        for e in LedgerError::ALL {
            assert_eq!(LedgerError::from_code(e.code()), Some(e));
        }
        assert_eq!(LedgerError::InsufficientDeposit.code(), 6000);
        assert_eq!(LedgerError::from_code(5999), None);
        assert_eq!(LedgerError::from_code(7000), None);
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(
            VaultError::rule(LedgerError::InvalidInterval).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            VaultError::Rejected(LedgerError::NullifierAlreadyUsed).kind(),
            ErrorKind::LedgerRejection
        );
        assert_eq!(
            VaultError::Rejected(LedgerError::StaleShareState).kind(),
            ErrorKind::StaleState
        );
        assert_eq!(
            VaultError::Transient(TransientError::RateLimited).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            VaultError::Integration(IntegrationError::StaleFeed { age_secs: 5 }).kind(),
            ErrorKind::Integration
        );
        assert_eq!(
            VaultError::Session(SessionError::Missing { wallet: "w".into() }).kind(),
            ErrorKind::Session
        );
    }

    #[test]
    fn ledger_code_covers_local_and_remote() {
        assert_eq!(
            VaultError::rule(LedgerError::InsufficientDeposit).ledger_code(),
            Some(LedgerError::InsufficientDeposit)
        );
        assert_eq!(
            VaultError::Rejected(LedgerError::Unauthorized).ledger_code(),
            Some(LedgerError::Unauthorized)
        );
        assert_eq!(VaultError::Decryption.ledger_code(), None);
    }

    #[test]
    fn privacy_errors_map_to_kinds() {
        assert_eq!(VaultError::from(PrivacyError::Decryption), VaultError::Decryption);
        assert_eq!(
            VaultError::from(PrivacyError::MemoTooLong { len: 100, max: 62 }).kind(),
            ErrorKind::Validation
        );
    }
}
