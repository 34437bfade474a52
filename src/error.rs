use thiserror::Error;

use crate::access::Role;
use crate::asset::AssetError;
use crate::layout::LayoutError;
use crate::ledger::{Address, Amount};
use crate::migration::Version;

/// Every way a vault call can fail.
///
/// A failed call leaves no trace in the vault state: the dispatcher restores
/// the pre-call snapshot before the error reaches the caller.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("account {account} is missing role {role}")]
    Unauthorized { role: Role, account: Address },

    #[error("vault already initialized")]
    AlreadyInitialized,

    #[error("vault not initialized")]
    NotInitialized,

    #[error("invalid migration order: cannot move from {current} to {target}")]
    InvalidMigrationOrder { current: Version, target: Version },

    #[error("insufficient balance: {account} requested {requested}, available {available}")]
    InsufficientBalance {
        account: Address,
        requested: Amount,
        available: Amount,
    },

    #[error("deposits are paused")]
    DepositsPaused,

    #[error("withdrawal request already pending for {account}")]
    RequestAlreadyPending { account: Address },

    #[error("no pending withdrawal request for {account}")]
    NoPendingRequest { account: Address },

    #[error("delay not met: executable at {ready_at}, now {now}")]
    DelayNotMet { ready_at: u64, now: u64 },

    #[error("zero address")]
    ZeroAddress,

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("basis points out of range: {0} > 10000")]
    InvalidBps(u32),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("reentrant call rejected")]
    Reentrancy,

    #[error("{operation} is not available in {version}")]
    UnsupportedOperation {
        operation: &'static str,
        version: Version,
    },

    #[error("incompatible storage layout: {0}")]
    IncompatibleLayout(#[from] LayoutError),

    #[error("ledger invariant violated: total deposits {total} != sum of balances {sum}")]
    InvariantViolation { total: Amount, sum: Amount },

    #[error("asset transfer failed: {0}")]
    Asset(#[from] AssetError),
}

pub type VaultResult<T> = Result<T, VaultError>;
