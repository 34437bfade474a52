use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::ledger::{Address, Amount};
use crate::migration::Version;

/// Record of a completed vault call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    Initialized {
        asset: Address,
        admin: Address,
        deposit_fee_bps: u32,
    },
    Upgraded {
        from: Version,
        to: Version,
    },
    Deposited {
        account: Address,
        gross: Amount,
        fee: Amount,
        net: Amount,
    },
    Withdrawn {
        account: Address,
        amount: Amount,
    },
    YieldClaimed {
        account: Address,
        amount: Amount,
    },
    YieldRateUpdated {
        old_bps: u32,
        new_bps: u32,
    },
    DepositsPaused {
        by: Address,
    },
    DepositsUnpaused {
        by: Address,
    },
    WithdrawalRequested {
        account: Address,
        amount: Amount,
        requested_at: u64,
    },
    WithdrawalExecuted {
        account: Address,
        amount: Amount,
    },
    WithdrawalCancelled {
        account: Address,
        amount: Amount,
    },
    EmergencyWithdrawn {
        account: Address,
        amount: Amount,
        forfeited_yield: Amount,
    },
    WithdrawalDelayUpdated {
        old_seconds: u64,
        new_seconds: u64,
    },
    RoleGranted {
        role: Role,
        account: Address,
        by: Address,
    },
    RoleRevoked {
        role: Role,
        account: Address,
        by: Address,
    },
}
