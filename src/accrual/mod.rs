//! Time-based simple-interest yield (version 2 onward).
//!
//! Yield is tracked through a global index of accumulated `rate * seconds`.
//! Each account remembers the index it last settled at, so changing the rate
//! only affects time after the change. With a constant rate the projection
//! reduces to `balance * rate * elapsed / (10000 * SECONDS_PER_YEAR)`.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::ledger::{Address, Amount, LedgerState, BPS_DENOMINATOR};

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Divisor turning `balance * index_delta` into token units.
const YIELD_DENOMINATOR: u128 = BPS_DENOMINATOR as u128 * SECONDS_PER_YEAR as u128;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccrualState {
    pub yield_rate_bps: u32,
    pub deposits_paused: bool,
    /// Accumulated `rate_bps * seconds` since version 2 went live.
    pub yield_index: u128,
    pub yield_index_updated_at: u64,
}

impl AccrualState {
    pub fn start(yield_rate_bps: u32, now: u64) -> VaultResult<Self> {
        check_bps(yield_rate_bps)?;
        Ok(Self {
            yield_rate_bps,
            deposits_paused: false,
            yield_index: 0,
            yield_index_updated_at: now,
        })
    }

    pub fn index_at(&self, now: u64) -> VaultResult<u128> {
        let elapsed = now.saturating_sub(self.yield_index_updated_at);
        let growth = u128::from(self.yield_rate_bps)
            .checked_mul(u128::from(elapsed))
            .ok_or(VaultError::Overflow)?;
        self.yield_index
            .checked_add(growth)
            .ok_or(VaultError::Overflow)
    }

    pub fn checkpoint(&mut self, now: u64) -> VaultResult<()> {
        self.yield_index = self.index_at(now)?;
        self.yield_index_updated_at = self.yield_index_updated_at.max(now);
        Ok(())
    }

    /// Returns the previous rate.
    pub fn set_rate(&mut self, yield_rate_bps: u32, now: u64) -> VaultResult<u32> {
        check_bps(yield_rate_bps)?;
        self.checkpoint(now)?;
        let old = std::mem::replace(&mut self.yield_rate_bps, yield_rate_bps);
        Ok(old)
    }

    /// Unclaimed yield for `account`, without touching state.
    pub fn pending_yield(&self, ledger: &LedgerState, account: &Address, now: u64) -> VaultResult<Amount> {
        let Some(entry) = ledger.account(account) else {
            return Ok(0);
        };
        if entry.last_yield_timestamp.is_none() {
            return Ok(0);
        }
        let delta = self.index_at(now)?.saturating_sub(entry.yield_index_snapshot);
        accrued(entry.balance, delta)
    }

    /// Mints pending yield into the account and re-anchors it at `now`.
    ///
    /// An account that was never anchored is anchored and earns nothing for
    /// this call. Unknown accounts are left alone.
    pub fn settle(&self, ledger: &mut LedgerState, account: &Address, now: u64) -> VaultResult<Amount> {
        if ledger.account(account).is_none() {
            return Ok(0);
        }
        let earned = self.pending_yield(ledger, account, now)?;
        if earned > 0 {
            ledger.credit(account, earned)?;
            debug!("yield settled for {account}: {earned}");
        }
        self.anchor(ledger, account, now)?;
        Ok(earned)
    }

    /// Anchors an account at `now` only if it has no anchor yet.
    pub fn ensure_anchor(&self, ledger: &mut LedgerState, account: &Address, now: u64) -> VaultResult<()> {
        let unanchored = ledger
            .account(account)
            .is_some_and(|a| a.last_yield_timestamp.is_none());
        if unanchored {
            self.anchor(ledger, account, now)?;
        }
        Ok(())
    }

    /// Drops whatever accrued so far.
    pub fn anchor(&self, ledger: &mut LedgerState, account: &Address, now: u64) -> VaultResult<()> {
        let index = self.index_at(now)?;
        if let Some(entry) = ledger.account_mut(account) {
            entry.last_yield_timestamp = Some(now);
            entry.yield_index_snapshot = index;
        }
        Ok(())
    }
}

/// `floor(balance * delta / YIELD_DENOMINATOR)` without forming the full
/// product: `balance = q * D + r` gives `q * delta + floor(r * delta / D)`.
fn accrued(balance: Amount, delta: u128) -> VaultResult<Amount> {
    let whole = (balance / YIELD_DENOMINATOR)
        .checked_mul(delta)
        .ok_or(VaultError::Overflow)?;
    let part = (balance % YIELD_DENOMINATOR)
        .checked_mul(delta)
        .ok_or(VaultError::Overflow)?
        / YIELD_DENOMINATOR;
    whole.checked_add(part).ok_or(VaultError::Overflow)
}

pub(crate) fn check_bps(bps: u32) -> VaultResult<()> {
    if bps > BPS_DENOMINATOR {
        return Err(VaultError::InvalidBps(bps));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: Address = Address([9u8; 20]);
    const UNIT: Amount = 1_000_000_000_000_000_000;

    fn funded(balance: Amount) -> LedgerState {
        let mut ledger = LedgerState::new(0);
        ledger.credit(&USER, balance).unwrap();
        ledger
    }

    #[test]
    fn first_settle_only_anchors() {
        let accrual = AccrualState::start(1_000, 0).unwrap();
        let mut ledger = funded(100 * UNIT);
        let earned = accrual.settle(&mut ledger, &USER, 5_000).unwrap();
        assert_eq!(earned, 0);
        assert_eq!(
            ledger.account(&USER).unwrap().last_yield_timestamp,
            Some(5_000)
        );
    }

    #[test]
    fn one_year_at_ten_percent() {
        let accrual = AccrualState::start(1_000, 0).unwrap();
        let mut ledger = funded(95 * UNIT);
        accrual.settle(&mut ledger, &USER, 10).unwrap();

        let later = 10 + SECONDS_PER_YEAR;
        assert_eq!(
            accrual.pending_yield(&ledger, &USER, later).unwrap(),
            95 * UNIT / 10
        );
        let earned = accrual.settle(&mut ledger, &USER, later).unwrap();
        assert_eq!(earned, 95 * UNIT / 10);
        assert_eq!(ledger.balance_of(&USER), 95 * UNIT + 95 * UNIT / 10);
        ledger.audit().unwrap();
        assert_eq!(accrual.pending_yield(&ledger, &USER, later).unwrap(), 0);
    }

    #[test]
    fn rate_change_is_not_retroactive() {
        let mut accrual = AccrualState::start(1_000, 0).unwrap();
        let mut ledger = funded(1_000 * UNIT);
        accrual.settle(&mut ledger, &USER, 0).unwrap();

        let half = SECONDS_PER_YEAR / 2;
        assert_eq!(accrual.set_rate(2_000, half).unwrap(), 1_000);
        // half a year at 10% plus half a year at 20%
        let expected = 1_000 * UNIT / 20 + 1_000 * UNIT / 10;
        assert_eq!(
            accrual
                .pending_yield(&ledger, &USER, SECONDS_PER_YEAR)
                .unwrap(),
            expected
        );
    }

    #[test]
    fn rates_above_denominator_are_rejected() {
        assert!(matches!(
            AccrualState::start(10_001, 0),
            Err(VaultError::InvalidBps(10_001))
        ));
        let mut accrual = AccrualState::start(0, 0).unwrap();
        assert!(accrual.set_rate(20_000, 1).is_err());
        assert_eq!(accrual.yield_rate_bps, 0);
    }

    #[test]
    fn large_balances_accrue_exactly() {
        let accrual = AccrualState::start(1_000, 0).unwrap();
        let balance = 1_000_000_000_000 * UNIT;
        let mut ledger = funded(balance);
        accrual.settle(&mut ledger, &USER, 0).unwrap();

        assert_eq!(
            accrual
                .pending_yield(&ledger, &USER, SECONDS_PER_YEAR)
                .unwrap(),
            balance / 10
        );
        assert_eq!(
            accrual.settle(&mut ledger, &USER, SECONDS_PER_YEAR).unwrap(),
            balance / 10
        );
        ledger.audit().unwrap();
    }

    #[test]
    fn split_product_matches_floor_division() {
        for (balance, delta) in [
            (0, 12_345),
            (YIELD_DENOMINATOR - 1, 7),
            (YIELD_DENOMINATOR + 1, 1_000 * u128::from(SECONDS_PER_YEAR)),
            (123_456_789 * UNIT, 3 * u128::from(SECONDS_PER_YEAR)),
        ] {
            assert_eq!(
                accrued(balance, delta).unwrap(),
                balance * delta / YIELD_DENOMINATOR
            );
        }
        assert!(matches!(
            accrued(Amount::MAX, u128::MAX),
            Err(VaultError::Overflow)
        ));
    }

    #[test]
    fn unknown_accounts_earn_nothing() {
        let accrual = AccrualState::start(1_000, 0).unwrap();
        let mut ledger = LedgerState::new(0);
        assert_eq!(accrual.settle(&mut ledger, &USER, 100).unwrap(), 0);
        assert!(ledger.account(&USER).is_none());
    }
}
