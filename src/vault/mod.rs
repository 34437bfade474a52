//! Versioned vault dispatcher.
//!
//! Every mutating call follows the same path: take the reentrancy guard,
//! select the logic for the active version, run checks and effects against
//! the state, then perform the asset interaction. Any failure along the way,
//! including the asset transfer itself, restores the state captured before
//! the call.

mod guard;
mod logic;

use log::{info, warn};

use crate::access::Role;
use crate::asset::AssetTransfer;
use crate::clock::Clock;
use crate::error::{VaultError, VaultResult};
use crate::events::VaultEvent;
use crate::ledger::{Address, Amount};
use crate::migration::{self, Migration, Version};
use crate::state::VaultState;
use crate::withdrawal::{self, WithdrawalRequest};

pub use guard::{ReentrancyGuard, ReentrancyLock};
use logic::{logic_for, Call, Interaction, VersionLogic};

pub struct Vault<A, C> {
    state: VaultState,
    asset: A,
    clock: C,
    lock: ReentrancyLock,
    events: Vec<VaultEvent>,
}

impl<A: AssetTransfer, C: Clock> Vault<A, C> {
    /// An uninitialized vault, ready for [`Vault::initialize`].
    pub fn new(asset: A, clock: C) -> Self {
        Self::from_state(VaultState::new(), asset, clock)
    }

    /// A bare logic instance: initializers are disabled for good.
    pub fn implementation(asset: A, clock: C) -> Self {
        let mut state = VaultState::new();
        migration::disable_initializers(&mut state);
        Self::from_state(state, asset, clock)
    }

    pub fn from_state(state: VaultState, asset: A, clock: C) -> Self {
        Self {
            state,
            asset,
            clock,
            lock: ReentrancyLock::new(),
            events: Vec::new(),
        }
    }

    pub fn into_parts(self) -> (VaultState, A) {
        (self.state, self.asset)
    }

    pub fn state(&self) -> &VaultState {
        &self.state
    }

    pub fn asset(&self) -> &A {
        &self.asset
    }

    pub fn asset_mut(&mut self) -> &mut A {
        &mut self.asset
    }

    pub fn reentrancy_lock(&self) -> ReentrancyLock {
        self.lock.clone()
    }

    pub fn take_events(&mut self) -> Vec<VaultEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- migration ----

    pub fn initialize(&mut self, asset: Address, admin: Address, deposit_fee_bps: u32) -> VaultResult<()> {
        let _guard = self.lock.enter()?;
        self.atomically(|vault| {
            migration::initialize(&mut vault.state, asset, admin, deposit_fee_bps)?;
            vault.events.push(VaultEvent::Initialized {
                asset,
                admin,
                deposit_fee_bps,
            });
            Ok(())
        })
    }

    /// Upgrade entry point: checks the migration order, authorizes the
    /// caller, then runs the target version's initializer, which also
    /// validates the recorded storage layout against the new one.
    pub fn upgrade(&mut self, caller: Address, migration: Migration) -> VaultResult<()> {
        let _guard = self.lock.enter()?;
        self.atomically(|vault| {
            let from = vault.state.version;
            migration::check_order(&vault.state, migration.target())?;
            vault.state.roles.require_role(Role::Upgrader, &caller)?;
            let now = vault.clock.now();
            migration::apply(&mut vault.state, migration, now)?;
            let to = vault.state.version;
            info!("upgrade by {caller}: {from} -> {to}");
            vault.events.push(VaultEvent::Upgraded { from, to });
            Ok(())
        })
    }

    pub fn implementation_version(&self) -> Version {
        migration::implementation_version(&self.state)
    }

    // ---- access control ----

    pub fn grant_role(&mut self, caller: Address, role: Role, account: Address) -> VaultResult<()> {
        self.transact(caller, |_, call| {
            if call.state.roles.grant_role(&call.caller, role, &account)? {
                call.events.push(VaultEvent::RoleGranted {
                    role,
                    account,
                    by: call.caller,
                });
            }
            Ok(((), Interaction::None))
        })
    }

    pub fn revoke_role(&mut self, caller: Address, role: Role, account: Address) -> VaultResult<()> {
        self.transact(caller, |_, call| {
            if call.state.roles.revoke_role(&call.caller, role, &account)? {
                call.events.push(VaultEvent::RoleRevoked {
                    role,
                    account,
                    by: call.caller,
                });
            }
            Ok(((), Interaction::None))
        })
    }

    pub fn renounce_role(&mut self, caller: Address, role: Role) -> VaultResult<()> {
        self.transact(caller, |_, call| {
            if call.state.roles.renounce_role(&call.caller, role) {
                call.events.push(VaultEvent::RoleRevoked {
                    role,
                    account: call.caller,
                    by: call.caller,
                });
            }
            Ok(((), Interaction::None))
        })
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.state.roles.has_role(role, account)
    }

    // ---- ledger ----

    pub fn deposit(&mut self, caller: Address, amount: Amount) -> VaultResult<()> {
        self.transact(caller, |logic, call| Ok(((), logic.deposit(call, amount)?)))
    }

    pub fn withdraw(&mut self, caller: Address, amount: Amount) -> VaultResult<()> {
        self.transact(caller, |logic, call| Ok(((), logic.withdraw(call, amount)?)))
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.state.ledger.balance_of(account)
    }

    pub fn total_deposits(&self) -> Amount {
        self.state.ledger.total_deposits
    }

    pub fn deposit_fee_bps(&self) -> u32 {
        self.state.ledger.deposit_fee_bps
    }

    pub fn asset_token(&self) -> Address {
        self.state.asset
    }

    /// `total_deposits == sum(balances)`.
    pub fn audit(&self) -> VaultResult<()> {
        self.state.ledger.audit()
    }

    // ---- yield ----

    pub fn claim_yield(&mut self, caller: Address) -> VaultResult<Amount> {
        self.transact(caller, |logic, call| {
            Ok((logic.claim_yield(call)?, Interaction::None))
        })
    }

    pub fn set_yield_rate(&mut self, caller: Address, bps: u32) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.set_yield_rate(call, bps)?, Interaction::None))
        })
    }

    pub fn pause_deposits(&mut self, caller: Address) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.set_deposits_paused(call, true)?, Interaction::None))
        })
    }

    pub fn unpause_deposits(&mut self, caller: Address) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.set_deposits_paused(call, false)?, Interaction::None))
        })
    }

    pub fn is_deposits_paused(&self) -> bool {
        self.state.accrual.deposits_paused
    }

    pub fn yield_rate_bps(&self) -> u32 {
        self.state.accrual.yield_rate_bps
    }

    /// Unclaimed yield projected to the current time.
    pub fn user_yield(&self, account: &Address) -> VaultResult<Amount> {
        let logic = logic_for(self.state.version)?;
        logic.pending_yield(&self.state, account, self.clock.now())
    }

    // ---- withdrawal queue ----

    pub fn request_withdrawal(&mut self, caller: Address, amount: Amount) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.request_withdrawal(call, amount)?, Interaction::None))
        })
    }

    pub fn execute_withdrawal(&mut self, caller: Address) -> VaultResult<Amount> {
        self.transact(caller, |logic, call| logic.execute_withdrawal(call))
    }

    pub fn cancel_withdrawal(&mut self, caller: Address) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.cancel_withdrawal(call)?, Interaction::None))
        })
    }

    pub fn emergency_withdraw(&mut self, caller: Address) -> VaultResult<Amount> {
        self.transact(caller, |logic, call| logic.emergency_withdraw(call))
    }

    pub fn set_withdrawal_delay(&mut self, caller: Address, seconds: u64) -> VaultResult<()> {
        self.transact(caller, |logic, call| {
            Ok((logic.set_withdrawal_delay(call, seconds)?, Interaction::None))
        })
    }

    pub fn withdrawal_delay(&self) -> u64 {
        self.state.delay.withdrawal_delay_seconds
    }

    pub fn withdrawal_request(&self, account: &Address) -> Option<WithdrawalRequest> {
        withdrawal::pending(&self.state.ledger, account)
    }

    // ---- plumbing ----

    fn transact<T>(
        &mut self,
        caller: Address,
        op: impl FnOnce(&dyn VersionLogic, &mut Call<'_>) -> VaultResult<(T, Interaction)>,
    ) -> VaultResult<T> {
        let _guard = self.lock.enter()?;
        let logic = logic_for(self.state.version)?;
        self.atomically(|vault| {
            let now = vault.clock.now();
            let (value, interaction) = {
                let mut call = Call {
                    state: &mut vault.state,
                    caller,
                    now,
                    events: &mut vault.events,
                };
                op(logic, &mut call)?
            };
            vault.interact(interaction)?;
            Ok(value)
        })
    }

    fn interact(&mut self, interaction: Interaction) -> VaultResult<()> {
        match interaction {
            Interaction::None => Ok(()),
            Interaction::TransferIn { from, amount } => {
                self.asset.transfer_in(&from, amount).map_err(VaultError::from)
            }
            Interaction::TransferOut { to, amount } => {
                self.asset.transfer_out(&to, amount).map_err(VaultError::from)
            }
        }
    }

    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> VaultResult<T>) -> VaultResult<T> {
        let checkpoint = self.state.clone();
        let mark = self.events.len();
        let result = f(self);
        if let Err(err) = &result {
            warn!("call rejected: {err}");
            self.state = checkpoint;
            self.events.truncate(mark);
        }
        result
    }
}
