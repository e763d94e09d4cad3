//! Ledger account layouts.
//!
//! Every account is `discriminator (8) || fields (little-endian)` with a
//! fixed length. Decoding is strict: wrong length, wrong discriminator, a
//! bool that is not 0/1 or an unknown enum tag is an error, never a
//! partially filled struct.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::io::{Cursor, Read};

use shieldvault_privacy::{
    ENCRYPTED_PAYLOAD_LEN, ENCRYPTED_SHARE_LEN, EncryptedPayload, EncryptedShare, OperationType,
};

use crate::error::AccountDecodeError;

/// `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("account:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Field reader that turns short reads and bad tags into typed errors.
pub struct AccountReader<'a> {
    kind: &'static str,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> AccountReader<'a> {
    fn new(kind: &'static str, fields: &'a [u8]) -> Self {
        Self {
            kind,
            cursor: Cursor::new(fields),
        }
    }

    fn short(&self) -> AccountDecodeError {
        AccountDecodeError::Length {
            kind: self.kind,
            expected: self.cursor.get_ref().len() + 1,
            actual: self.cursor.get_ref().len(),
        }
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], AccountDecodeError> {
        let mut out = [0u8; N];
        self.cursor.read_exact(&mut out).map_err(|_| self.short())?;
        Ok(out)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, AccountDecodeError> {
        Ok(Pubkey::new_from_array(self.array::<32>()?))
    }

    pub fn u8(&mut self) -> Result<u8, AccountDecodeError> {
        self.cursor.read_u8().map_err(|_| self.short())
    }

    pub fn u32(&mut self) -> Result<u32, AccountDecodeError> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.short())
    }

    pub fn u64(&mut self) -> Result<u64, AccountDecodeError> {
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| self.short())
    }

    pub fn i64(&mut self) -> Result<i64, AccountDecodeError> {
        self.cursor
            .read_i64::<LittleEndian>()
            .map_err(|_| self.short())
    }

    pub fn bool(&mut self, field: &'static str) -> Result<bool, AccountDecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(AccountDecodeError::InvalidBool {
                kind: self.kind,
                field,
                value,
            }),
        }
    }

    pub fn invalid_enum(&self, field: &'static str, value: u8) -> AccountDecodeError {
        AccountDecodeError::InvalidEnum {
            kind: self.kind,
            field,
            value,
        }
    }
}

/// A fixed-layout ledger account.
pub trait AccountData: Sized {
    const NAME: &'static str;
    /// Field bytes, excluding the discriminator.
    const FIELDS_LEN: usize;
    const LEN: usize = 8 + Self::FIELDS_LEN;

    fn write_fields(&self, out: &mut Vec<u8>);

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError>;

    fn discriminator() -> [u8; 8] {
        account_discriminator(Self::NAME)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&Self::discriminator());
        self.write_fields(&mut out);
        debug_assert_eq!(out.len(), Self::LEN);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, AccountDecodeError> {
        if data.len() != Self::LEN {
            return Err(AccountDecodeError::Length {
                kind: Self::NAME,
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        if data[..8] != Self::discriminator() {
            return Err(AccountDecodeError::Discriminator { kind: Self::NAME });
        }
        let mut reader = AccountReader::new(Self::NAME, &data[8..]);
        Self::read_fields(&mut reader)
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    // Writing into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(v);
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    let _ = out.write_u64::<LittleEndian>(v);
}

fn put_i64(out: &mut Vec<u8>, v: i64) {
    let _ = out.write_i64::<LittleEndian>(v);
}

// ============================================================================
// ShieldPool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldPool {
    pub pool_id: Pubkey,
    pub authority: Pubkey,
    pub total_pool_value: u64,
    pub total_shares: u64,
    pub last_yield_update: i64,
    /// Number of state-changing operations applied to the pool.
    pub nonce: u64,
    pub is_active: bool,
    pub bump: u8,
}

impl ShieldPool {
    /// `total_shares == 0` exactly when `total_pool_value == 0`.
    pub fn is_consistent(&self) -> bool {
        (self.total_shares == 0) == (self.total_pool_value == 0)
    }
}

impl AccountData for ShieldPool {
    const NAME: &'static str = "ShieldPool";
    const FIELDS_LEN: usize = 32 + 32 + 8 + 8 + 8 + 8 + 1 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.pool_id.as_ref());
        out.extend_from_slice(self.authority.as_ref());
        put_u64(out, self.total_pool_value);
        put_u64(out, self.total_shares);
        put_i64(out, self.last_yield_update);
        put_u64(out, self.nonce);
        out.push(self.is_active as u8);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        Ok(Self {
            pool_id: r.pubkey()?,
            authority: r.pubkey()?,
            total_pool_value: r.u64()?,
            total_shares: r.u64()?,
            last_yield_update: r.i64()?,
            nonce: r.u64()?,
            is_active: r.bool("is_active")?,
            bump: r.u8()?,
        })
    }
}

// ============================================================================
// UserShare
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserShare {
    pub pool: Pubkey,
    pub user_commitment: [u8; 32],
    pub encrypted_share_amount: EncryptedShare,
    pub last_update: i64,
    pub bump: u8,
}

impl AccountData for UserShare {
    const NAME: &'static str = "UserShare";
    const FIELDS_LEN: usize = 32 + 32 + ENCRYPTED_SHARE_LEN + 8 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.pool.as_ref());
        out.extend_from_slice(&self.user_commitment);
        out.extend_from_slice(self.encrypted_share_amount.as_bytes());
        put_i64(out, self.last_update);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        Ok(Self {
            pool: r.pubkey()?,
            user_commitment: r.array()?,
            encrypted_share_amount: EncryptedShare::from_bytes(r.array()?),
            last_update: r.i64()?,
            bump: r.u8()?,
        })
    }
}

// ============================================================================
// ScheduledTransfer
// ============================================================================

/// Why a transfer stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Open,
    Cancelled,
    /// Too many consecutive skipped executions.
    Exhausted,
}

impl CloseReason {
    fn tag(self) -> u8 {
        match self {
            CloseReason::Open => 0,
            CloseReason::Cancelled => 1,
            CloseReason::Exhausted => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CloseReason::Open),
            1 => Some(CloseReason::Cancelled),
            2 => Some(CloseReason::Exhausted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTransfer {
    pub transfer_id: Pubkey,
    pub pool: Pubkey,
    pub user_commitment: [u8; 32],
    pub transfer_nonce: u64,
    pub encrypted_payload: EncryptedPayload,
    pub amount: u64,
    pub interval_seconds: u32,
    pub next_execution: i64,
    pub is_active: bool,
    pub close_reason: CloseReason,
    pub skip_count: u8,
    pub execution_count: u64,
    pub total_transferred: u64,
    pub created_at: i64,
    pub bump: u8,
}

impl ScheduledTransfer {
    pub fn is_due(&self, now: i64) -> bool {
        self.is_active && now >= self.next_execution
    }

    /// Next slot, anchored to the previous scheduled time.
    pub fn following_execution(&self) -> Option<i64> {
        self.next_execution
            .checked_add(i64::from(self.interval_seconds))
    }
}

impl AccountData for ScheduledTransfer {
    const NAME: &'static str = "ScheduledTransfer";
    const FIELDS_LEN: usize =
        32 + 32 + 32 + 8 + ENCRYPTED_PAYLOAD_LEN + 8 + 4 + 8 + 1 + 1 + 1 + 8 + 8 + 8 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.transfer_id.as_ref());
        out.extend_from_slice(self.pool.as_ref());
        out.extend_from_slice(&self.user_commitment);
        put_u64(out, self.transfer_nonce);
        out.extend_from_slice(self.encrypted_payload.as_bytes());
        put_u64(out, self.amount);
        put_u32(out, self.interval_seconds);
        put_i64(out, self.next_execution);
        out.push(self.is_active as u8);
        out.push(self.close_reason.tag());
        out.push(self.skip_count);
        put_u64(out, self.execution_count);
        put_u64(out, self.total_transferred);
        put_i64(out, self.created_at);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        let transfer_id = r.pubkey()?;
        let pool = r.pubkey()?;
        let user_commitment = r.array()?;
        let transfer_nonce = r.u64()?;
        let encrypted_payload = EncryptedPayload(r.array::<ENCRYPTED_PAYLOAD_LEN>()?);
        let amount = r.u64()?;
        let interval_seconds = r.u32()?;
        let next_execution = r.i64()?;
        let is_active = r.bool("is_active")?;
        let tag = r.u8()?;
        let close_reason =
            CloseReason::from_tag(tag).ok_or_else(|| r.invalid_enum("close_reason", tag))?;

        Ok(Self {
            transfer_id,
            pool,
            user_commitment,
            transfer_nonce,
            encrypted_payload,
            amount,
            interval_seconds,
            next_execution,
            is_active,
            close_reason,
            skip_count: r.u8()?,
            execution_count: r.u64()?,
            total_transferred: r.u64()?,
            created_at: r.i64()?,
            bump: r.u8()?,
        })
    }
}

// ============================================================================
// NullifierRecord
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullifierRecord {
    pub nullifier: [u8; 32],
    pub operation_type: OperationType,
    pub used_at: i64,
    pub bump: u8,
}

impl AccountData for NullifierRecord {
    const NAME: &'static str = "NullifierRecord";
    const FIELDS_LEN: usize = 32 + 1 + 8 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.nullifier);
        out.push(self.operation_type.tag());
        put_i64(out, self.used_at);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        let nullifier = r.array()?;
        let tag = r.u8()?;
        let operation_type =
            OperationType::from_tag(tag).ok_or_else(|| r.invalid_enum("operation_type", tag))?;
        Ok(Self {
            nullifier,
            operation_type,
            used_at: r.i64()?,
            bump: r.u8()?,
        })
    }
}

// ============================================================================
// TransferHistory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHistory {
    pub transfer: Pubkey,
    pub execution_index: u64,
    pub amount: u64,
    pub status: ExecutionStatus,
    pub executed_at: i64,
    pub bump: u8,
}

impl AccountData for TransferHistory {
    const NAME: &'static str = "TransferHistory";
    const FIELDS_LEN: usize = 32 + 8 + 8 + 1 + 8 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.transfer.as_ref());
        put_u64(out, self.execution_index);
        put_u64(out, self.amount);
        out.push(match self.status {
            ExecutionStatus::Completed => 0,
            ExecutionStatus::Skipped => 1,
        });
        put_i64(out, self.executed_at);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        let transfer = r.pubkey()?;
        let execution_index = r.u64()?;
        let amount = r.u64()?;
        let status = match r.u8()? {
            0 => ExecutionStatus::Completed,
            1 => ExecutionStatus::Skipped,
            other => return Err(r.invalid_enum("status", other)),
        };
        Ok(Self {
            transfer,
            execution_index,
            amount,
            status,
            executed_at: r.i64()?,
            bump: r.u8()?,
        })
    }
}

// ============================================================================
// DepositHistory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositHistory {
    pub commitment: [u8; 32],
    pub deposit_index: u64,
    pub amount: u64,
    pub shares_minted: u64,
    pub timestamp: i64,
    pub bump: u8,
}

impl AccountData for DepositHistory {
    const NAME: &'static str = "DepositHistory";
    const FIELDS_LEN: usize = 32 + 8 + 8 + 8 + 8 + 1;

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.commitment);
        put_u64(out, self.deposit_index);
        put_u64(out, self.amount);
        put_u64(out, self.shares_minted);
        put_i64(out, self.timestamp);
        out.push(self.bump);
    }

    fn read_fields(r: &mut AccountReader<'_>) -> Result<Self, AccountDecodeError> {
        Ok(Self {
            commitment: r.array()?,
            deposit_index: r.u64()?,
            amount: r.u64()?,
            shares_minted: r.u64()?,
            timestamp: r.i64()?,
            bump: r.u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ShieldPool {
        ShieldPool {
            pool_id: Pubkey::new_from_array([1u8; 32]),
            authority: Pubkey::new_from_array([2u8; 32]),
            total_pool_value: 10_000_000,
            total_shares: 9_000_000,
            last_yield_update: 1_700_000_000,
            nonce: 4,
            is_active: true,
            bump: 254,
        }
    }

    fn transfer() -> ScheduledTransfer {
        ScheduledTransfer {
            transfer_id: Pubkey::new_from_array([3u8; 32]),
            pool: Pubkey::new_from_array([1u8; 32]),
            user_commitment: [9u8; 32],
            transfer_nonce: 11,
            encrypted_payload: EncryptedPayload([5u8; ENCRYPTED_PAYLOAD_LEN]),
            amount: 50_000,
            interval_seconds: 86_400,
            next_execution: 1_700_086_400,
            is_active: true,
            close_reason: CloseReason::Open,
            skip_count: 0,
            execution_count: 2,
            total_transferred: 100_000,
            created_at: 1_699_913_600,
            bump: 250,
        }
    }

    #[test]
    fn encode_has_fixed_length_and_discriminator() {
        let bytes = pool().encode();
        assert_eq!(bytes.len(), ShieldPool::LEN);
        assert_eq!(&bytes[..8], &ShieldPool::discriminator());
        assert_eq!(ShieldPool::decode(&bytes).unwrap(), pool());

        let t = transfer();
        assert_eq!(ScheduledTransfer::decode(&t.encode()).unwrap(), t);
    }

    #[test]
    fn discriminators_are_distinct() {
        let all = [
            ShieldPool::discriminator(),
            UserShare::discriminator(),
            ScheduledTransfer::discriminator(),
            NullifierRecord::discriminator(),
            TransferHistory::discriminator(),
            DepositHistory::discriminator(),
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }

    #[test]
    fn decode_rejects_wrong_kind() {
        let bytes = pool().encode();
        // Same length is not enough; the discriminator must match.
        let mut forged = bytes.clone();
        forged[..8].copy_from_slice(&UserShare::discriminator());
        assert_eq!(
            ShieldPool::decode(&forged),
            Err(AccountDecodeError::Discriminator { kind: "ShieldPool" })
        );
        assert!(matches!(
            UserShare::decode(&bytes),
            Err(AccountDecodeError::Length { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncated_and_trailing() {
        let bytes = pool().encode();
        assert!(ShieldPool::decode(&bytes[..bytes.len() - 1]).is_err());

        let mut long = bytes.clone();
        long.push(0);
        assert!(ShieldPool::decode(&long).is_err());
    }

    #[test]
    fn decode_rejects_invalid_bool() {
        let mut bytes = pool().encode();
        let is_active_at = ShieldPool::LEN - 2;
        bytes[is_active_at] = 7;
        assert_eq!(
            ShieldPool::decode(&bytes),
            Err(AccountDecodeError::InvalidBool {
                kind: "ShieldPool",
                field: "is_active",
                value: 7
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_close_reason() {
        let mut bytes = transfer().encode();
        // discriminator + ids + nonce + payload + amount + interval + next + is_active
        let at = 8 + 32 * 3 + 8 + ENCRYPTED_PAYLOAD_LEN + 8 + 4 + 8 + 1;
        bytes[at] = 9;
        assert!(matches!(
            ScheduledTransfer::decode(&bytes),
            Err(AccountDecodeError::InvalidEnum {
                field: "close_reason",
                value: 9,
                ..
            })
        ));
    }

    #[test]
    fn following_execution_is_anchored() {
        let t = transfer();
        assert_eq!(t.following_execution(), Some(1_700_086_400 + 86_400));
        assert!(t.is_due(1_700_086_400));
        assert!(!t.is_due(1_700_086_399));
    }

    #[test]
    fn pool_consistency() {
        let mut p = pool();
        assert!(p.is_consistent());
        p.total_shares = 0;
        assert!(!p.is_consistent());
        p.total_pool_value = 0;
        assert!(p.is_consistent());
    }
}
