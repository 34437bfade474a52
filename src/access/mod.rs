//! Role registry gating administrative operations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::ledger::Address;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Upgrader,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::Upgrader];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("ADMIN"),
            Role::Upgrader => f.write_str("UPGRADER"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "UPGRADER" => Ok(Role::Upgrader),
            other => Err(format!("unknown role {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleRegistry {
    members: BTreeMap<Role, BTreeSet<Address>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every role is administered by `ADMIN`.
    pub fn role_admin(&self, _role: Role) -> Role {
        Role::Admin
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.members
            .get(&role)
            .is_some_and(|set| set.contains(account))
    }

    pub fn require_role(&self, role: Role, account: &Address) -> VaultResult<()> {
        if self.has_role(role, account) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized {
                role,
                account: *account,
            })
        }
    }

    /// Returns `true` when the binding was newly added.
    pub fn grant_role(
        &mut self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> VaultResult<bool> {
        self.require_role(self.role_admin(role), caller)?;
        self.grant_unchecked(role, account)
    }

    pub fn revoke_role(
        &mut self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> VaultResult<bool> {
        self.require_role(self.role_admin(role), caller)?;
        Ok(self.remove(role, account))
    }

    pub fn renounce_role(&mut self, caller: &Address, role: Role) -> bool {
        self.remove(role, caller)
    }

    /// Used by the initializer, before any admin exists.
    pub(crate) fn grant_unchecked(&mut self, role: Role, account: &Address) -> VaultResult<bool> {
        if account.is_zero() {
            return Err(VaultError::ZeroAddress);
        }
        let added = self.members.entry(role).or_default().insert(*account);
        if added {
            info!("role {role} granted to {account}");
        }
        Ok(added)
    }

    pub fn members(&self, role: Role) -> impl Iterator<Item = &Address> {
        self.members.get(&role).into_iter().flatten()
    }

    fn remove(&mut self, role: Role, account: &Address) -> bool {
        let removed = self
            .members
            .get_mut(&role)
            .is_some_and(|set| set.remove(account));
        if removed {
            info!("role {role} revoked from {account}");
        }
        removed
    }
}
