//! Upgradeable custodial token vault.
//!
//! A single persistent [`VaultState`] record is driven through three logic
//! versions by a [`Vault`] dispatcher: a fee-adjusted deposit ledger (V1),
//! time-based yield accrual with a deposit pause switch (V2), and a delayed
//! withdrawal queue with an emergency exit (V3).

pub mod access;
pub mod accrual;
pub mod asset;
pub mod clock;
pub mod error;
pub mod events;
pub mod layout;
pub mod ledger;
pub mod migration;
pub mod state;
pub mod store;
pub mod vault;
pub mod withdrawal;

pub use access::Role;
pub use asset::{AssetTransfer, TokenCustody, TokenLedger};
pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use error::{VaultError, VaultResult};
pub use events::VaultEvent;
pub use ledger::{Address, Amount};
pub use migration::{Migration, Version};
pub use state::VaultState;
pub use vault::Vault;
