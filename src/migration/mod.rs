//! One-way version state machine and the per-version initializers.
//!
//! `initialized` is a reinitializer counter: each initializer may only run
//! while the counter is below its own version number, and bumps it to that
//! number. Combined with the "previous version must be active" check this
//! makes every step run at most once and strictly in order.

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::accrual::{check_bps, AccrualState};
use crate::error::{VaultError, VaultResult};
use crate::layout;
use crate::ledger::{Address, LedgerState};
use crate::state::VaultState;
use crate::withdrawal::DelayState;

/// Counter value that locks out every initializer.
pub const INITIALIZERS_DISABLED: u8 = u8::MAX;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Version {
    #[default]
    Uninitialized,
    V1,
    V2,
    V3,
}

impl Version {
    pub fn next(self) -> Option<Version> {
        match self {
            Version::Uninitialized => Some(Version::V1),
            Version::V1 => Some(Version::V2),
            Version::V2 => Some(Version::V3),
            Version::V3 => None,
        }
    }

    /// Reinitializer number for this version.
    pub fn number(self) -> u8 {
        match self {
            Version::Uninitialized => 0,
            Version::V1 => 1,
            Version::V2 => 2,
            Version::V3 => 3,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Uninitialized => f.write_str("uninitialized"),
            Version::V1 => f.write_str("V1"),
            Version::V2 => f.write_str("V2"),
            Version::V3 => f.write_str("V3"),
        }
    }
}

/// Arguments carried by an upgrade to the next version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Migration {
    V2 { yield_rate_bps: u32 },
    V3 { withdrawal_delay_seconds: u64 },
}

impl Migration {
    pub fn target(&self) -> Version {
        match self {
            Migration::V2 { .. } => Version::V2,
            Migration::V3 { .. } => Version::V3,
        }
    }
}

pub fn initialize(
    state: &mut VaultState,
    asset: Address,
    admin: Address,
    deposit_fee_bps: u32,
) -> VaultResult<()> {
    if state.initialized != 0 {
        return Err(VaultError::AlreadyInitialized);
    }
    if admin.is_zero() {
        return Err(VaultError::ZeroAddress);
    }
    check_bps(deposit_fee_bps)?;
    layout::adopt(&mut state.layout, Version::V1)?;

    state.asset = asset;
    state.ledger = LedgerState::new(deposit_fee_bps);
    state.roles.grant_unchecked(Role::Admin, &admin)?;
    state.roles.grant_unchecked(Role::Upgrader, &admin)?;
    state.initialized = Version::V1.number();
    state.version = Version::V1;
    info!("vault initialized: asset={asset} admin={admin} fee_bps={deposit_fee_bps}");
    Ok(())
}

pub fn initialize_v2(state: &mut VaultState, yield_rate_bps: u32, now: u64) -> VaultResult<()> {
    check_order(state, Version::V2)?;
    let accrual = AccrualState::start(yield_rate_bps, now)?;
    finish(state, Version::V2)?;
    state.accrual = accrual;
    Ok(())
}

pub fn initialize_v3(state: &mut VaultState, withdrawal_delay_seconds: u64) -> VaultResult<()> {
    check_order(state, Version::V3)?;
    finish(state, Version::V3)?;
    state.delay = DelayState::new(withdrawal_delay_seconds);
    Ok(())
}

pub fn apply(state: &mut VaultState, migration: Migration, now: u64) -> VaultResult<()> {
    match migration {
        Migration::V2 { yield_rate_bps } => initialize_v2(state, yield_rate_bps, now),
        Migration::V3 {
            withdrawal_delay_seconds,
        } => initialize_v3(state, withdrawal_delay_seconds),
    }
}

/// For a bare logic instance that must never hold user state.
pub fn disable_initializers(state: &mut VaultState) {
    state.initialized = INITIALIZERS_DISABLED;
}

pub fn implementation_version(state: &VaultState) -> Version {
    state.version
}

/// Fails with `InvalidMigrationOrder` unless `target` is the next version and
/// its initializer has not run yet.
pub fn check_order(state: &VaultState, target: Version) -> VaultResult<()> {
    let in_order = state.version.next() == Some(target);
    if !in_order || state.initialized >= target.number() {
        return Err(VaultError::InvalidMigrationOrder {
            current: state.version,
            target,
        });
    }
    Ok(())
}

fn finish(state: &mut VaultState, target: Version) -> VaultResult<()> {
    layout::adopt(&mut state.layout, target)?;
    info!("migrated {} -> {}", state.version, target);
    state.initialized = target.number();
    state.version = target;
    Ok(())
}
