//! JSON state file holding the vault record and its asset custody.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::asset::TokenCustody;
use crate::ledger::build_merkle;
use crate::migration::INITIALIZERS_DISABLED;
use crate::state::VaultState;

pub const STATE_FORMAT: u8 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {0} not found; run `tvault init` first")]
    Missing(PathBuf),
    #[error("state file {0} already exists")]
    Exists(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported state format {0}")]
    Format(u8),
    #[error("vault asset {vault} does not match custody token {token}")]
    AssetMismatch { vault: String, token: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    pub format: u8,
    pub vault: VaultState,
    pub custody: TokenCustody,
}

impl StateFile {
    pub fn new(vault: VaultState, custody: TokenCustody) -> Self {
        Self {
            format: STATE_FORMAT,
            vault,
            custody,
        }
    }
}

pub fn load(path: &Path) -> Result<StateFile, StoreError> {
    if !path.exists() {
        return Err(StoreError::Missing(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: StateFile = serde_json::from_slice(&bytes)?;
    if file.format != STATE_FORMAT {
        return Err(StoreError::Format(file.format));
    }
    if file.vault.initialized > 0
        && file.vault.initialized != INITIALIZERS_DISABLED
        && file.vault.asset != file.custody.token.address
    {
        return Err(StoreError::AssetMismatch {
            vault: file.vault.asset.to_string(),
            token: file.custody.token.address.to_string(),
        });
    }
    debug!("loaded state from {}", path.display());
    Ok(file)
}

/// Writes through a sibling temp file and renames it into place.
pub fn save(path: &Path, file: &StateFile) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let json = serde_json::to_vec_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).map_err(io_err)?;
    f.write_all(&json).map_err(io_err)?;
    f.sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!("saved state to {}", path.display());
    Ok(())
}

/// Refuses to clobber an existing state file.
pub fn create(path: &Path, file: &StateFile) -> Result<(), StoreError> {
    if path.exists() {
        return Err(StoreError::Exists(path.to_path_buf()));
    }
    save(path, file)
}

/// Commitment over globals, roles and every account.
pub fn state_root(state: &VaultState) -> [u8; 32] {
    let mut globals = Sha256::new();
    globals.update(b"globals");
    globals.update([state.initialized, state.version.number()]);
    globals.update(state.asset.0);
    globals.update(state.ledger.total_deposits.to_le_bytes());
    globals.update(state.ledger.deposit_fee_bps.to_le_bytes());
    globals.update(state.accrual.yield_rate_bps.to_le_bytes());
    globals.update([u8::from(state.accrual.deposits_paused)]);
    globals.update(state.accrual.yield_index.to_le_bytes());
    globals.update(state.accrual.yield_index_updated_at.to_le_bytes());
    globals.update(state.delay.withdrawal_delay_seconds.to_le_bytes());

    let mut roles = Sha256::new();
    roles.update(b"roles");
    for role in crate::access::Role::ALL {
        roles.update(role.to_string().as_bytes());
        for member in state.roles.members(role) {
            roles.update(member.0);
        }
    }

    build_merkle(vec![
        globals.finalize().into(),
        roles.finalize().into(),
        state.ledger.accounts_root(),
    ])
}

pub fn state_root_hex(state: &VaultState) -> String {
    hex::encode(state_root(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::TokenLedger;
    use crate::ledger::Address;
    use crate::migration;

    fn sample() -> StateFile {
        let token = Address([0xee; 20]);
        let mut vault = VaultState::new();
        migration::initialize(&mut vault, token, Address([1; 20]), 500).unwrap();
        vault.ledger.deposit(&Address([2; 20]), 1_000).unwrap();
        StateFile::new(
            vault,
            TokenCustody::new(Address([0xcc; 20]), TokenLedger::new(token)),
        )
    }

    #[test]
    fn save_then_load_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.json");
        let file = sample();
        create(&path, &file).unwrap();
        assert!(matches!(create(&path, &file), Err(StoreError::Exists(_))));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, file);
        assert_eq!(state_root(&loaded.vault), state_root(&file.vault));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent.json")),
            Err(StoreError::Missing(_))
        ));
    }

    #[test]
    fn v1_state_without_later_fields_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let file = sample();
        let mut json = serde_json::to_value(&file).unwrap();
        let vault = json["vault"].as_object_mut().unwrap();
        vault.remove("accrual");
        vault.remove("delay");
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.vault.ledger, file.vault.ledger);
        assert_eq!(loaded.vault.accrual.yield_rate_bps, 0);
    }

    #[test]
    fn root_changes_with_globals() {
        let mut file = sample();
        let before = state_root_hex(&file.vault);
        file.vault.accrual.deposits_paused = true;
        assert_ne!(before, state_root_hex(&file.vault));
        assert_eq!(before.len(), 64);
    }

    #[test]
    fn mismatched_asset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let mut file = sample();
        file.custody.token.address = Address([0x77; 20]);
        save(&path, &file).unwrap();
        assert!(matches!(load(&path), Err(StoreError::AssetMismatch { .. })));
    }

    #[test]
    fn disabled_instance_skips_asset_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let mut vault = VaultState::new();
        migration::disable_initializers(&mut vault);
        let file = StateFile::new(
            vault,
            TokenCustody::new(Address([0xcc; 20]), TokenLedger::new(Address([0xee; 20]))),
        );
        save(&path, &file).unwrap();
        assert_eq!(load(&path).unwrap().vault.initialized, INITIALIZERS_DISABLED);
    }
}
