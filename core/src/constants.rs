//! Protocol constants shared by the client and the in-process ledger.

/// 0.01 USDC.
pub const MIN_DEPOSIT: u64 = 10_000;

/// 1,000,000 USDC.
pub const MAX_DEPOSIT: u64 = 1_000_000_000_000;

/// One day.
pub const MIN_TRANSFER_INTERVAL: u32 = 86_400;

/// One year.
pub const MAX_TRANSFER_INTERVAL: u32 = 31_536_000;

/// Consecutive skipped executions before a transfer is exhausted.
pub const MAX_CONSECUTIVE_SKIPS: u8 = 3;

/// How long scheduled transfers keep running after the owner last signed
/// in or set one up (90 days).
pub const EXECUTION_GRANT_TTL: u64 = 7_776_000;

/// Allowed pool-value drift between quote and submission (1%).
pub const POOL_VALUE_TOLERANCE_BPS: u64 = 100;

pub const BPS_DENOMINATOR: u64 = 10_000;

// Account seeds
pub const SHIELD_POOL_SEED: &[u8] = b"shield_pool";
pub const USER_SHARE_SEED: &[u8] = b"share";
pub const TRANSFER_SEED: &[u8] = b"transfer";
pub const NULLIFIER_SEED: &[u8] = b"nullifier";
pub const HISTORY_SEED: &[u8] = b"history";
pub const DEPOSIT_HISTORY_SEED: &[u8] = b"deposit_history";
