//! Fungible asset collaborator.
//!
//! The vault only needs to pull a deposit into custody and push a withdrawal
//! back out. [`TokenLedger`] is a self-contained mintable token with
//! allowances, and [`TokenCustody`] binds it to the vault's custody address.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Address, Amount};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("insufficient token balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("insufficient allowance from {owner} to {spender}: need {needed}, allowed {allowed}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: Amount,
        allowed: Amount,
    },
    #[error("token supply overflow")]
    Overflow,
}

pub trait AssetTransfer {
    /// Moves `amount` from `from` into vault custody.
    fn transfer_in(&mut self, from: &Address, amount: Amount) -> Result<(), AssetError>;

    /// Moves `amount` out of vault custody to `to`.
    fn transfer_out(&mut self, to: &Address, amount: Amount) -> Result<(), AssetError>;
}

impl<T: AssetTransfer + ?Sized> AssetTransfer for &mut T {
    fn transfer_in(&mut self, from: &Address, amount: Amount) -> Result<(), AssetError> {
        (**self).transfer_in(from, amount)
    }

    fn transfer_out(&mut self, to: &Address, amount: Amount) -> Result<(), AssetError> {
        (**self).transfer_out(to, amount)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenLedger {
    pub address: Address,
    pub total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl TokenLedger {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn mint(&mut self, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(AssetError::Overflow)?;
        let balance = self.balances.entry(*to).or_default();
        *balance = balance.checked_add(amount).ok_or(AssetError::Overflow)?;
        self.total_supply = supply;
        debug!("token mint {to}: {amount}");
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(AssetError::InsufficientBalance {
                account: *from,
                needed: amount,
                available,
            });
        }
        self.balances.insert(*from, available - amount);
        let dest = self.balances.entry(*to).or_default();
        *dest = dest.checked_add(amount).ok_or(AssetError::Overflow)?;
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(AssetError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                needed: amount,
                allowed,
            });
        }
        self.transfer(from, to, amount)?;
        self.approve(from, spender, allowed - amount);
        Ok(())
    }
}

/// A token ledger as seen from the vault's custody account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCustody {
    pub custody: Address,
    pub token: TokenLedger,
}

impl TokenCustody {
    pub fn new(custody: Address, token: TokenLedger) -> Self {
        Self { custody, token }
    }

    pub fn held(&self) -> Amount {
        self.token.balance_of(&self.custody)
    }
}

impl AssetTransfer for TokenCustody {
    fn transfer_in(&mut self, from: &Address, amount: Amount) -> Result<(), AssetError> {
        let custody = self.custody;
        self.token.transfer_from(&custody, from, &custody, amount)
    }

    fn transfer_out(&mut self, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let custody = self.custody;
        self.token.transfer(&custody, to, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT: Address = Address([0xaa; 20]);
    const USER: Address = Address([0x01; 20]);

    fn custody() -> TokenCustody {
        TokenCustody::new(VAULT, TokenLedger::new(Address([0xee; 20])))
    }

    #[test]
    fn transfer_in_consumes_allowance() {
        let mut c = custody();
        c.token.mint(&USER, 100).unwrap();
        assert!(matches!(
            c.transfer_in(&USER, 60),
            Err(AssetError::InsufficientAllowance { allowed: 0, .. })
        ));

        c.token.approve(&USER, &VAULT, 100);
        c.transfer_in(&USER, 60).unwrap();
        assert_eq!(c.held(), 60);
        assert_eq!(c.token.balance_of(&USER), 40);
        assert_eq!(c.token.allowance(&USER, &VAULT), 40);
    }

    #[test]
    fn transfer_out_is_bounded_by_custody() {
        let mut c = custody();
        c.token.mint(&VAULT, 10).unwrap();
        assert!(c.transfer_out(&USER, 11).is_err());
        c.transfer_out(&USER, 10).unwrap();
        assert_eq!(c.token.balance_of(&USER), 10);
        assert_eq!(c.token.total_supply, 10);
    }
}
