//! Share math.
//!
//! All products are taken in `u128` so `amount * total_shares` cannot
//! overflow before the division. Rounding is fixed protocol-wide:
//!
//! | operation | rounding | effect |
//! |-----------|----------|--------|
//! | deposit   | floor    | depositor gets at most their value in shares |
//! | withdraw  | ceil     | withdrawer burns at least their value in shares |
//! | value     | floor    | displayed value is never overstated |
//!
//! Dust always stays in the pool.

use crate::constants::BPS_DENOMINATOR;
use crate::error::LedgerError;

fn to_u64(v: u128) -> Result<u64, LedgerError> {
    u64::try_from(v).map_err(|_| LedgerError::ArithmeticOverflow)
}

/// Shares minted for a deposit of `amount`.
///
/// An empty pool bootstraps at 1:1.
pub fn shares_for_deposit(
    amount: u64,
    total_pool_value: u64,
    total_shares: u64,
) -> Result<u64, LedgerError> {
    if total_shares == 0 {
        if total_pool_value != 0 {
            return Err(LedgerError::InvalidShareCalculation);
        }
        return Ok(amount);
    }
    if total_pool_value == 0 {
        return Err(LedgerError::InvalidShareCalculation);
    }

    let minted = (amount as u128 * total_shares as u128) / total_pool_value as u128;
    let minted = to_u64(minted)?;
    if minted == 0 {
        // Deposit too small to buy a single share at the current price.
        return Err(LedgerError::InvalidShareCalculation);
    }
    Ok(minted)
}

/// Shares burned to withdraw `amount`, rounded up.
pub fn shares_for_withdrawal(
    amount: u64,
    total_pool_value: u64,
    total_shares: u64,
) -> Result<u64, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    if total_pool_value == 0 || total_shares == 0 || amount > total_pool_value {
        return Err(LedgerError::InsufficientBalance);
    }

    let num = amount as u128 * total_shares as u128;
    let den = total_pool_value as u128;
    to_u64(num.div_ceil(den))
}

/// Value of `shares`, rounded down. Zero for an empty pool.
pub fn share_value(
    shares: u64,
    total_pool_value: u64,
    total_shares: u64,
) -> Result<u64, LedgerError> {
    if total_shares == 0 {
        return Ok(0);
    }
    to_u64((shares as u128 * total_pool_value as u128) / total_shares as u128)
}

/// `true` when `observed` is within `tolerance_bps` of `reference`.
pub fn within_tolerance(reference: u64, observed: u64, tolerance_bps: u64) -> bool {
    let diff = reference.abs_diff(observed) as u128;
    diff * BPS_DENOMINATOR as u128 <= reference as u128 * tolerance_bps as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_deposit_is_one_to_one() {
        assert_eq!(shares_for_deposit(1_000_000, 0, 0), Ok(1_000_000));
    }

    #[test]
    fn deposit_into_appreciated_pool() {
        // 10M value backing 9M shares: 1M buys 900k shares.
        assert_eq!(shares_for_deposit(1_000_000, 10_000_000, 9_000_000), Ok(900_000));
    }

    #[test]
    fn deposit_rounds_down() {
        // 10 * 3 / 7 = 4.28..
        assert_eq!(shares_for_deposit(10, 7, 3), Ok(4));
    }

    #[test]
    fn deposit_rejects_broken_pool() {
        assert_eq!(
            shares_for_deposit(10, 5, 0),
            Err(LedgerError::InvalidShareCalculation)
        );
        assert_eq!(
            shares_for_deposit(10, 0, 5),
            Err(LedgerError::InvalidShareCalculation)
        );
    }

    #[test]
    fn dust_deposit_rejected() {
        assert_eq!(
            shares_for_deposit(1, 1_000_000, 1),
            Err(LedgerError::InvalidShareCalculation)
        );
    }

    #[test]
    fn withdrawal_rounds_up() {
        // 10 * 3 / 7 = 4.28.. -> 5
        assert_eq!(shares_for_withdrawal(10, 7, 3), Err(LedgerError::InsufficientBalance));
        assert_eq!(shares_for_withdrawal(5, 7, 3), Ok(3));
        assert_eq!(shares_for_withdrawal(1_000_000, 11_000_000, 9_900_000), Ok(900_000));
        assert_eq!(shares_for_withdrawal(1, 11_000_000, 9_900_000), Ok(1));
    }

    #[test]
    fn withdrawal_never_burns_less_than_value() {
        let (value, shares) = (10_000_003u64, 9_000_001u64);
        for amount in [1u64, 7, 999, 123_457, 5_000_000] {
            let burned = shares_for_withdrawal(amount, value, shares).unwrap();
            assert!(share_value(burned, value, shares).unwrap() >= amount - 1);
            assert!((burned as u128) * (value as u128) >= (amount as u128) * (shares as u128));
        }
    }

    #[test]
    fn withdrawal_from_empty_pool() {
        assert_eq!(shares_for_withdrawal(1, 0, 0), Err(LedgerError::InsufficientBalance));
        assert_eq!(shares_for_withdrawal(0, 10, 10), Err(LedgerError::InvalidAmount));
    }

    #[test]
    fn value_rounds_down_and_handles_empty() {
        assert_eq!(share_value(1_000_000, 1_000_000, 1_000_000), Ok(1_000_000));
        assert_eq!(share_value(3, 7, 3), Ok(7));
        assert_eq!(share_value(1, 7, 3), Ok(2));
        assert_eq!(share_value(10, 0, 0), Ok(0));
    }

    #[test]
    fn large_values_do_not_overflow() {
        let big = 1_000_000_000_000u64;
        assert_eq!(shares_for_deposit(big, big * 10, big * 9), Ok(big * 9 / 10));
        assert_eq!(share_value(u64::MAX, u64::MAX, u64::MAX), Ok(u64::MAX));
    }

    #[test]
    fn tolerance_in_bps() {
        assert!(within_tolerance(10_000_000, 10_100_000, 100));
        assert!(!within_tolerance(10_000_000, 10_100_001, 100));
        assert!(within_tolerance(10_000_000, 9_900_000, 100));
        assert!(!within_tolerance(10_000_000, 9_899_999, 100));
        assert!(within_tolerance(0, 0, 0));
        assert!(!within_tolerance(0, 1, 100));
    }
}
