use serde::{Deserialize, Serialize};

use crate::access::RoleRegistry;
use crate::accrual::AccrualState;
use crate::layout::StorageLayout;
use crate::ledger::{Address, LedgerState};
use crate::migration::Version;
use crate::withdrawal::DelayState;

/// The single persistent record every version reads and writes.
///
/// Fields are grouped by the version that introduced them and only ever
/// appended; state written by an older version deserializes with the newer
/// groups at their defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VaultState {
    // v1
    pub initialized: u8,
    pub version: Version,
    pub asset: Address,
    pub ledger: LedgerState,
    pub roles: RoleRegistry,
    /// Layout this record was last written with.
    pub layout: StorageLayout,
    // v2
    #[serde(default)]
    pub accrual: AccrualState,
    // v3
    #[serde(default)]
    pub delay: DelayState,
}

impl VaultState {
    pub fn new() -> Self {
        Self::default()
    }
}
