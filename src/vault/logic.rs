//! Per-version behavior table.
//!
//! Each version is a zero-sized implementation of [`VersionLogic`]; the
//! dispatcher picks one from the persisted version tag. Operations a version
//! does not offer fall through to the default and report
//! `UnsupportedOperation`. Logic functions only check and mutate state; any
//! asset movement is returned as an [`Interaction`] for the dispatcher to
//! perform afterwards.

use log::{info, warn};

use crate::access::Role;
use crate::error::{VaultError, VaultResult};
use crate::events::VaultEvent;
use crate::ledger::{Address, Amount};
use crate::migration::Version;
use crate::state::VaultState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interaction {
    None,
    TransferIn { from: Address, amount: Amount },
    TransferOut { to: Address, amount: Amount },
}

pub(crate) struct Call<'a> {
    pub state: &'a mut VaultState,
    pub caller: Address,
    pub now: u64,
    pub events: &'a mut Vec<VaultEvent>,
}

impl Call<'_> {
    fn require(&self, role: Role) -> VaultResult<()> {
        self.state.roles.require_role(role, &self.caller)
    }

    fn emit(&mut self, event: VaultEvent) {
        self.events.push(event);
    }
}

fn unsupported<T>(version: Version, operation: &'static str) -> VaultResult<T> {
    Err(VaultError::UnsupportedOperation { operation, version })
}

pub(crate) trait VersionLogic {
    fn version(&self) -> Version;

    fn deposit(&self, _call: &mut Call<'_>, _amount: Amount) -> VaultResult<Interaction> {
        unsupported(self.version(), "deposit")
    }

    fn withdraw(&self, _call: &mut Call<'_>, _amount: Amount) -> VaultResult<Interaction> {
        unsupported(self.version(), "withdraw")
    }

    fn claim_yield(&self, _call: &mut Call<'_>) -> VaultResult<Amount> {
        unsupported(self.version(), "claim_yield")
    }

    fn set_yield_rate(&self, _call: &mut Call<'_>, _bps: u32) -> VaultResult<()> {
        unsupported(self.version(), "set_yield_rate")
    }

    fn set_deposits_paused(&self, _call: &mut Call<'_>, _paused: bool) -> VaultResult<()> {
        unsupported(self.version(), "pause_deposits")
    }

    fn pending_yield(&self, _state: &VaultState, _account: &Address, _now: u64) -> VaultResult<Amount> {
        unsupported(self.version(), "get_user_yield")
    }

    fn request_withdrawal(&self, _call: &mut Call<'_>, _amount: Amount) -> VaultResult<()> {
        unsupported(self.version(), "request_withdrawal")
    }

    fn execute_withdrawal(&self, _call: &mut Call<'_>) -> VaultResult<(Amount, Interaction)> {
        unsupported(self.version(), "execute_withdrawal")
    }

    fn cancel_withdrawal(&self, _call: &mut Call<'_>) -> VaultResult<()> {
        unsupported(self.version(), "cancel_withdrawal")
    }

    fn emergency_withdraw(&self, _call: &mut Call<'_>) -> VaultResult<(Amount, Interaction)> {
        unsupported(self.version(), "emergency_withdraw")
    }

    fn set_withdrawal_delay(&self, _call: &mut Call<'_>, _seconds: u64) -> VaultResult<()> {
        unsupported(self.version(), "set_withdrawal_delay")
    }
}

pub(crate) struct V1Logic;
pub(crate) struct V2Logic;
pub(crate) struct V3Logic;

pub(crate) fn logic_for(version: Version) -> VaultResult<&'static dyn VersionLogic> {
    match version {
        Version::Uninitialized => Err(VaultError::NotInitialized),
        Version::V1 => Ok(&V1Logic),
        Version::V2 => Ok(&V2Logic),
        Version::V3 => Ok(&V3Logic),
    }
}

impl VersionLogic for V1Logic {
    fn version(&self) -> Version {
        Version::V1
    }

    fn deposit(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
        plain_deposit(call, amount)
    }

    fn withdraw(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
        plain_withdraw(call, amount)
    }
}

impl VersionLogic for V2Logic {
    fn version(&self) -> Version {
        Version::V2
    }

    fn deposit(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
        accruing_deposit(call, amount)
    }

    fn withdraw(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
        settle(call)?;
        plain_withdraw(call, amount)
    }

    fn claim_yield(&self, call: &mut Call<'_>) -> VaultResult<Amount> {
        claim_yield(call)
    }

    fn set_yield_rate(&self, call: &mut Call<'_>, bps: u32) -> VaultResult<()> {
        set_yield_rate(call, bps)
    }

    fn set_deposits_paused(&self, call: &mut Call<'_>, paused: bool) -> VaultResult<()> {
        set_deposits_paused(call, paused)
    }

    fn pending_yield(&self, state: &VaultState, account: &Address, now: u64) -> VaultResult<Amount> {
        state.accrual.pending_yield(&state.ledger, account, now)
    }
}

/// Everything from V2 except the direct `withdraw`, which the delay queue
/// replaces.
impl VersionLogic for V3Logic {
    fn version(&self) -> Version {
        Version::V3
    }

    fn deposit(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
        accruing_deposit(call, amount)
    }

    fn claim_yield(&self, call: &mut Call<'_>) -> VaultResult<Amount> {
        claim_yield(call)
    }

    fn set_yield_rate(&self, call: &mut Call<'_>, bps: u32) -> VaultResult<()> {
        set_yield_rate(call, bps)
    }

    fn set_deposits_paused(&self, call: &mut Call<'_>, paused: bool) -> VaultResult<()> {
        set_deposits_paused(call, paused)
    }

    fn pending_yield(&self, state: &VaultState, account: &Address, now: u64) -> VaultResult<Amount> {
        state.accrual.pending_yield(&state.ledger, account, now)
    }

    fn request_withdrawal(&self, call: &mut Call<'_>, amount: Amount) -> VaultResult<()> {
        let (caller, now) = (call.caller, call.now);
        let state = &mut *call.state;
        let request = state.delay.request(&mut state.ledger, &caller, amount, now)?;
        info!("withdrawal requested: {caller} amount={amount}");
        call.emit(VaultEvent::WithdrawalRequested {
            account: caller,
            amount: request.amount,
            requested_at: request.requested_at,
        });
        Ok(())
    }

    fn execute_withdrawal(&self, call: &mut Call<'_>) -> VaultResult<(Amount, Interaction)> {
        let (caller, now) = (call.caller, call.now);
        let request = call.state.delay.ready(&call.state.ledger, &caller, now)?;
        settle(call)?;
        let state = &mut *call.state;
        let amount = state.delay.complete(&mut state.ledger, &caller, request)?;
        info!("withdrawal executed: {caller} amount={amount}");
        call.emit(VaultEvent::WithdrawalExecuted {
            account: caller,
            amount,
        });
        Ok((amount, Interaction::TransferOut { to: caller, amount }))
    }

    fn cancel_withdrawal(&self, call: &mut Call<'_>) -> VaultResult<()> {
        let caller = call.caller;
        let state = &mut *call.state;
        let request = state.delay.cancel(&mut state.ledger, &caller)?;
        call.emit(VaultEvent::WithdrawalCancelled {
            account: caller,
            amount: request.amount,
        });
        Ok(())
    }

    fn emergency_withdraw(&self, call: &mut Call<'_>) -> VaultResult<(Amount, Interaction)> {
        let (caller, now) = (call.caller, call.now);
        let state = &mut *call.state;
        // Reported only; the exit must not depend on it.
        let forfeited = state
            .accrual
            .pending_yield(&state.ledger, &caller, now)
            .unwrap_or_else(|err| {
                warn!("forfeited yield for {caller} not computable: {err}");
                0
            });
        let amount = state.delay.emergency(&mut state.ledger, &caller)?;
        state.accrual.anchor(&mut state.ledger, &caller, now)?;
        info!("emergency withdrawal: {caller} amount={amount} forfeited_yield={forfeited}");
        call.emit(VaultEvent::EmergencyWithdrawn {
            account: caller,
            amount,
            forfeited_yield: forfeited,
        });
        Ok((amount, Interaction::TransferOut { to: caller, amount }))
    }

    fn set_withdrawal_delay(&self, call: &mut Call<'_>, seconds: u64) -> VaultResult<()> {
        call.require(Role::Admin)?;
        let old = std::mem::replace(&mut call.state.delay.withdrawal_delay_seconds, seconds);
        info!("withdrawal delay {old}s -> {seconds}s");
        call.emit(VaultEvent::WithdrawalDelayUpdated {
            old_seconds: old,
            new_seconds: seconds,
        });
        Ok(())
    }
}

fn plain_deposit(call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
    let caller = call.caller;
    let receipt = call.state.ledger.deposit(&caller, amount)?;
    info!(
        "deposit: {caller} gross={} fee={} net={}",
        receipt.gross, receipt.fee, receipt.net
    );
    call.emit(VaultEvent::Deposited {
        account: caller,
        gross: receipt.gross,
        fee: receipt.fee,
        net: receipt.net,
    });
    Ok(Interaction::TransferIn {
        from: caller,
        amount,
    })
}

fn plain_withdraw(call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
    let caller = call.caller;
    call.state.ledger.withdraw(&caller, amount)?;
    info!("withdraw: {caller} amount={amount}");
    call.emit(VaultEvent::Withdrawn {
        account: caller,
        amount,
    });
    Ok(Interaction::TransferOut { to: caller, amount })
}

fn accruing_deposit(call: &mut Call<'_>, amount: Amount) -> VaultResult<Interaction> {
    if call.state.accrual.deposits_paused {
        return Err(VaultError::DepositsPaused);
    }
    if amount == 0 {
        return Err(VaultError::InvalidAmount);
    }
    settle(call)?;
    let interaction = plain_deposit(call, amount)?;
    let (caller, now) = (call.caller, call.now);
    let state = &mut *call.state;
    state.accrual.ensure_anchor(&mut state.ledger, &caller, now)?;
    Ok(interaction)
}

/// Credits pending yield before the principal changes.
fn settle(call: &mut Call<'_>) -> VaultResult<Amount> {
    let (caller, now) = (call.caller, call.now);
    let state = &mut *call.state;
    let earned = state.accrual.settle(&mut state.ledger, &caller, now)?;
    if earned > 0 {
        call.emit(VaultEvent::YieldClaimed {
            account: caller,
            amount: earned,
        });
    }
    Ok(earned)
}

fn claim_yield(call: &mut Call<'_>) -> VaultResult<Amount> {
    let earned = settle(call)?;
    info!("yield claimed: {} amount={earned}", call.caller);
    Ok(earned)
}

fn set_yield_rate(call: &mut Call<'_>, bps: u32) -> VaultResult<()> {
    call.require(Role::Admin)?;
    let now = call.now;
    let old = call.state.accrual.set_rate(bps, now)?;
    info!("yield rate {old}bps -> {bps}bps");
    call.emit(VaultEvent::YieldRateUpdated {
        old_bps: old,
        new_bps: bps,
    });
    Ok(())
}

fn set_deposits_paused(call: &mut Call<'_>, paused: bool) -> VaultResult<()> {
    call.require(Role::Admin)?;
    call.state.accrual.deposits_paused = paused;
    let by = call.caller;
    info!("deposits {} by {by}", if paused { "paused" } else { "unpaused" });
    call.emit(if paused {
        VaultEvent::DepositsPaused { by }
    } else {
        VaultEvent::DepositsUnpaused { by }
    });
    Ok(())
}
