//! Storage layout per version.
//!
//! The persistent state is append-only: a version may add slots after the
//! ones it inherited, paid for out of the reserved gap, and nothing else.
//! The state records the layout it was last written with, and every
//! initializer checks that record against the layout it is about to adopt.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::migration::Version;

/// Slots plus gap, identical for every version.
pub const FOOTPRINT: u16 = 56;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: Cow<'static, str>,
    pub words: u16,
}

const fn slot(name: &'static str) -> Slot {
    Slot {
        name: Cow::Borrowed(name),
        words: 1,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub version: Version,
    pub slots: Cow<'static, [Slot]>,
    pub gap: u16,
}

impl StorageLayout {
    pub fn used(&self) -> u16 {
        self.slots.iter().map(|s| s.words).sum()
    }

    pub fn footprint(&self) -> u16 {
        self.used() + self.gap
    }
}

/// Fresh storage: nothing allocated, everything reserved.
impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            version: Version::Uninitialized,
            slots: Cow::Owned(Vec::new()),
            gap: FOOTPRINT,
        }
    }
}

static V1_SLOTS: [Slot; 6] = [
    slot("initialized"),
    slot("asset"),
    slot("total_deposits"),
    slot("deposit_fee_bps"),
    slot("balances"),
    slot("roles"),
];

static V2_SLOTS: [Slot; 12] = [
    slot("initialized"),
    slot("asset"),
    slot("total_deposits"),
    slot("deposit_fee_bps"),
    slot("balances"),
    slot("roles"),
    slot("yield_rate_bps"),
    slot("deposits_paused"),
    slot("yield_index"),
    slot("yield_index_updated_at"),
    slot("last_yield_timestamp"),
    slot("yield_index_snapshot"),
];

static V3_SLOTS: [Slot; 14] = [
    slot("initialized"),
    slot("asset"),
    slot("total_deposits"),
    slot("deposit_fee_bps"),
    slot("balances"),
    slot("roles"),
    slot("yield_rate_bps"),
    slot("deposits_paused"),
    slot("yield_index"),
    slot("yield_index_updated_at"),
    slot("last_yield_timestamp"),
    slot("yield_index_snapshot"),
    slot("withdrawal_delay_seconds"),
    slot("pending_withdrawals"),
];

pub static V1_LAYOUT: StorageLayout = StorageLayout {
    version: Version::V1,
    slots: Cow::Borrowed(&V1_SLOTS),
    gap: 50,
};

pub static V2_LAYOUT: StorageLayout = StorageLayout {
    version: Version::V2,
    slots: Cow::Borrowed(&V2_SLOTS),
    gap: 44,
};

pub static V3_LAYOUT: StorageLayout = StorageLayout {
    version: Version::V3,
    slots: Cow::Borrowed(&V3_SLOTS),
    gap: 42,
};

pub fn layout_for(version: Version) -> Option<&'static StorageLayout> {
    match version {
        Version::Uninitialized => None,
        Version::V1 => Some(&V1_LAYOUT),
        Version::V2 => Some(&V2_LAYOUT),
        Version::V3 => Some(&V3_LAYOUT),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{from} cannot upgrade directly to {to}")]
    VersionSkip { from: Version, to: Version },
    #[error("no storage layout declared for {0}")]
    Undeclared(Version),
    #[error("slot {index} `{expected}` removed")]
    SlotRemoved { index: usize, expected: String },
    #[error("slot {index} changed from `{expected}` to `{found}`")]
    SlotChanged {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("footprint changed from {from} to {to} words")]
    FootprintChanged { from: u16, to: u16 },
}

pub fn validate_upgrade(from: &StorageLayout, to: &StorageLayout) -> Result<(), LayoutError> {
    if from.version.next() != Some(to.version) {
        return Err(LayoutError::VersionSkip {
            from: from.version,
            to: to.version,
        });
    }
    for (index, expected) in from.slots.iter().enumerate() {
        let found = to.slots.get(index).ok_or_else(|| LayoutError::SlotRemoved {
            index,
            expected: expected.name.to_string(),
        })?;
        if found != expected {
            return Err(LayoutError::SlotChanged {
                index,
                expected: expected.name.to_string(),
                found: found.name.to_string(),
            });
        }
    }
    if from.footprint() != to.footprint() {
        return Err(LayoutError::FootprintChanged {
            from: from.footprint(),
            to: to.footprint(),
        });
    }
    Ok(())
}

/// Checks the recorded layout against `target`'s and records the new one.
pub fn adopt(recorded: &mut StorageLayout, target: Version) -> Result<(), LayoutError> {
    let next = layout_for(target).ok_or(LayoutError::Undeclared(target))?;
    validate_upgrade(recorded, next)?;
    *recorded = next.clone();
    Ok(())
}
