use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};
use crate::withdrawal::WithdrawalRequest;

pub type Amount = u128;

/// Denominator for every basis-point quantity (fees, yield rates).
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("address must be 20 bytes, got {0}")]
    Length(usize),
}

/// 20-byte principal identifier, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Last 20 bytes of SHA-256 over a public key.
    pub fn from_public_key(key: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(key).into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut out = [0u8; 20];
        rng.fill_bytes(&mut out);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(AddressParseError::Length(bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-principal ledger entry. Fields after `balance` were appended by later
/// versions and default to empty when reading older state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Account {
    pub balance: Amount,
    #[serde(default)]
    pub last_yield_timestamp: Option<u64>,
    #[serde(default)]
    pub yield_index_snapshot: u128,
    #[serde(default)]
    pub pending_withdrawal: Option<WithdrawalRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositReceipt {
    pub gross: Amount,
    pub fee: Amount,
    pub net: Amount,
}

/// Balances plus the global `total_deposits` counter they must always sum to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerState {
    pub total_deposits: Amount,
    pub deposit_fee_bps: u32,
    pub accounts: BTreeMap<Address, Account>,
}

impl LedgerState {
    pub fn new(deposit_fee_bps: u32) -> Self {
        Self {
            deposit_fee_bps,
            ..Self::default()
        }
    }

    /// `floor(amount * fee_bps / 10000)`.
    pub fn deposit_fee(&self, amount: Amount) -> VaultResult<Amount> {
        let scaled = amount
            .checked_mul(Amount::from(self.deposit_fee_bps))
            .ok_or(VaultError::Overflow)?;
        Ok(scaled / Amount::from(BPS_DENOMINATOR))
    }

    /// Credits `amount` net of the deposit fee, creating the account on first
    /// use. The fee leaves the ledger entirely.
    pub fn deposit(&mut self, account: &Address, amount: Amount) -> VaultResult<DepositReceipt> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount);
        }
        let fee = self.deposit_fee(amount)?;
        let net = amount - fee;
        self.credit(account, net)?;
        debug!("ledger deposit {account}: gross={amount} fee={fee} net={net}");
        Ok(DepositReceipt {
            gross: amount,
            fee,
            net,
        })
    }

    pub fn withdraw(&mut self, account: &Address, amount: Amount) -> VaultResult<()> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount);
        }
        self.debit(account, amount)
    }

    /// Adds to a balance and to `total_deposits` together.
    pub fn credit(&mut self, account: &Address, amount: Amount) -> VaultResult<()> {
        let total = self
            .total_deposits
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        let entry = self.accounts.entry(*account).or_default();
        entry.balance = entry
            .balance
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        self.total_deposits = total;
        Ok(())
    }

    pub fn debit(&mut self, account: &Address, amount: Amount) -> VaultResult<()> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(VaultError::InsufficientBalance {
                account: *account,
                requested: amount,
                available,
            });
        }
        let total = self
            .total_deposits
            .checked_sub(amount)
            .ok_or_else(|| VaultError::InvariantViolation {
                total: self.total_deposits,
                sum: self.sum_of_balances(),
            })?;
        if let Some(entry) = self.accounts.get_mut(account) {
            entry.balance -= amount;
        }
        self.total_deposits = total;
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts.get(account).map(|a| a.balance).unwrap_or(0)
    }

    pub fn account(&self, account: &Address) -> Option<&Account> {
        self.accounts.get(account)
    }

    pub fn account_mut(&mut self, account: &Address) -> Option<&mut Account> {
        self.accounts.get_mut(account)
    }

    pub fn sum_of_balances(&self) -> Amount {
        self.accounts
            .values()
            .fold(0, |acc: Amount, a| acc.saturating_add(a.balance))
    }

    pub fn audit(&self) -> VaultResult<()> {
        let sum = self.sum_of_balances();
        if sum != self.total_deposits {
            return Err(VaultError::InvariantViolation {
                total: self.total_deposits,
                sum,
            });
        }
        Ok(())
    }

    /// Deterministic commitment over every account entry.
    pub fn accounts_root(&self) -> [u8; 32] {
        let leaves = self
            .accounts
            .iter()
            .map(|(address, account)| {
                let mut hasher = Sha256::new();
                hasher.update(b"acct");
                hasher.update(address.0);
                hasher.update(account.balance.to_le_bytes());
                hasher.update(account.last_yield_timestamp.unwrap_or(0).to_le_bytes());
                hasher.update(account.yield_index_snapshot.to_le_bytes());
                if let Some(req) = &account.pending_withdrawal {
                    hasher.update(req.amount.to_le_bytes());
                    hasher.update(req.requested_at.to_le_bytes());
                }
                hasher.finalize().into()
            })
            .collect();
        build_merkle(leaves)
    }
}

pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"vault-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[test]
    fn deposit_deducts_fee_with_floor_rounding() {
        let mut ledger = LedgerState::new(500);
        let receipt = ledger.deposit(&addr(1), 100).unwrap();
        assert_eq!(receipt.fee, 5);
        assert_eq!(receipt.net, 95);
        assert_eq!(ledger.balance_of(&addr(1)), 95);
        assert_eq!(ledger.total_deposits, 95);

        // 19 * 500 / 10000 = 0.95 -> 0
        let receipt = ledger.deposit(&addr(2), 19).unwrap();
        assert_eq!(receipt.fee, 0);
        assert_eq!(receipt.net, 19);
    }

    #[test]
    fn full_fee_yields_zero_credit_without_error() {
        let mut ledger = LedgerState::new(10_000);
        let receipt = ledger.deposit(&addr(1), 7).unwrap();
        assert_eq!(receipt.net, 0);
        assert_eq!(ledger.balance_of(&addr(1)), 0);
        assert!(ledger.account(&addr(1)).is_some());
        ledger.audit().unwrap();
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let mut ledger = LedgerState::new(0);
        assert!(matches!(
            ledger.deposit(&addr(1), 0),
            Err(VaultError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.withdraw(&addr(1), 0),
            Err(VaultError::InvalidAmount)
        ));
    }

    #[test]
    fn withdraw_beyond_balance_fails_and_leaves_state() {
        let mut ledger = LedgerState::new(0);
        ledger.deposit(&addr(1), 10).unwrap();
        let err = ledger.withdraw(&addr(1), 11).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientBalance {
                requested: 11,
                available: 10,
                ..
            }
        ));
        assert_eq!(ledger.balance_of(&addr(1)), 10);
        assert_eq!(ledger.total_deposits, 10);

        ledger.withdraw(&addr(1), 10).unwrap();
        assert_eq!(ledger.total_deposits, 0);
        assert_eq!(ledger.account(&addr(1)).unwrap().balance, 0);
    }

    #[test]
    fn accounts_root_tracks_balances() {
        let mut ledger = LedgerState::new(0);
        ledger.credit(&addr(1), 1_000).unwrap();
        ledger.credit(&addr(2), 2_000).unwrap();
        let root1 = ledger.accounts_root();
        assert_eq!(root1, ledger.accounts_root());
        ledger.credit(&addr(2), 1).unwrap();
        assert_ne!(root1, ledger.accounts_root());
    }

    #[test]
    fn address_parses_with_and_without_prefix() {
        let a: Address = "0x0101010101010101010101010101010101010101".parse().unwrap();
        assert_eq!(a, addr(1));
        let b: Address = "0101010101010101010101010101010101010101".parse().unwrap();
        assert_eq!(a, b);
        assert!("0x0101".parse::<Address>().is_err());
        assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{a}\""));
    }
}
