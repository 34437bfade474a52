//! Time-locked withdrawal queue (version 3 onward).

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::ledger::{Address, Amount, LedgerState};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub amount: Amount,
    pub requested_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DelayState {
    pub withdrawal_delay_seconds: u64,
}

impl DelayState {
    pub fn new(withdrawal_delay_seconds: u64) -> Self {
        Self {
            withdrawal_delay_seconds,
        }
    }

    /// Reserves `amount` without debiting it.
    pub fn request(
        &self,
        ledger: &mut LedgerState,
        account: &Address,
        amount: Amount,
        now: u64,
    ) -> VaultResult<WithdrawalRequest> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount);
        }
        if pending(ledger, account).is_some() {
            return Err(VaultError::RequestAlreadyPending { account: *account });
        }
        let available = ledger.balance_of(account);
        if amount > available {
            return Err(VaultError::InsufficientBalance {
                account: *account,
                requested: amount,
                available,
            });
        }
        let request = WithdrawalRequest {
            amount,
            requested_at: now,
        };
        // balance >= amount > 0, so the account exists
        if let Some(entry) = ledger.account_mut(account) {
            entry.pending_withdrawal = Some(request);
        }
        debug!("withdrawal requested by {account}: {amount} at {now}");
        Ok(request)
    }

    /// Checks the pending request against the delay in force right now.
    pub fn ready(&self, ledger: &LedgerState, account: &Address, now: u64) -> VaultResult<WithdrawalRequest> {
        let request =
            pending(ledger, account).ok_or(VaultError::NoPendingRequest { account: *account })?;
        let ready_at = request
            .requested_at
            .saturating_add(self.withdrawal_delay_seconds);
        if now < ready_at {
            return Err(VaultError::DelayNotMet { ready_at, now });
        }
        Ok(request)
    }

    /// Debits a matured request and clears it.
    pub fn complete(&self, ledger: &mut LedgerState, account: &Address, request: WithdrawalRequest) -> VaultResult<Amount> {
        ledger.debit(account, request.amount)?;
        clear(ledger, account);
        Ok(request.amount)
    }

    pub fn cancel(&self, ledger: &mut LedgerState, account: &Address) -> VaultResult<WithdrawalRequest> {
        let request =
            pending(ledger, account).ok_or(VaultError::NoPendingRequest { account: *account })?;
        clear(ledger, account);
        Ok(request)
    }

    /// Takes the whole ledger balance immediately and drops any pending request.
    pub fn emergency(&self, ledger: &mut LedgerState, account: &Address) -> VaultResult<Amount> {
        let balance = ledger.balance_of(account);
        if balance == 0 {
            return Err(VaultError::InsufficientBalance {
                account: *account,
                requested: 0,
                available: 0,
            });
        }
        ledger.debit(account, balance)?;
        clear(ledger, account);
        Ok(balance)
    }
}

pub fn pending(ledger: &LedgerState, account: &Address) -> Option<WithdrawalRequest> {
    ledger.account(account).and_then(|a| a.pending_withdrawal)
}

fn clear(ledger: &mut LedgerState, account: &Address) {
    if let Some(entry) = ledger.account_mut(account) {
        entry.pending_withdrawal = None;
    }
}
