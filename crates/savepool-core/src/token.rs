//! Funds-movement capability consumed by the engine.
//!
//! The engine never moves currency itself. Every pull from a participant and
//! every payout goes through a [`TokenLedger`], which a deployment backs with
//! whatever settlement rail it uses. [`MemoryTokenLedger`] is the in-process
//! implementation used by tests, the scenario runner and the simulator.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Amount};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("insufficient balance in {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },
    #[error("{owner} approved {approved}, transfer needs {required}")]
    InsufficientAllowance {
        owner: Address,
        approved: Amount,
        required: Amount,
    },
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// ERC-20 shaped view of the settlement rail.
///
/// `transfer` moves funds out of the engine's custody account;
/// `transfer_from` pulls funds the owner approved for the engine.
pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, account: &Address) -> Amount;

    fn transfer(&self, to: &Address, amount: Amount) -> Result<(), TokenError>;

    fn transfer_from(&self, from: &Address, to: &Address, amount: Amount)
        -> Result<(), TokenError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

#[derive(Default)]
struct MemoryState {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, Amount>,
    frozen: BTreeSet<Address>,
    transfers: Vec<TokenTransfer>,
}

impl MemoryState {
    fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), TokenError> {
        let balance = self.balances.entry(account.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TokenError::Rejected(format!("balance overflow for {account}")))?;
        Ok(())
    }

    fn move_funds(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), TokenError> {
        if self.frozen.contains(to) {
            return Err(TokenError::Rejected(format!("{to} cannot receive funds")));
        }
        let available = self.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: from.clone(),
                available,
                required: amount,
            });
        }
        self.credit(to, amount)?;
        if let Some(balance) = self.balances.get_mut(from) {
            *balance -= amount;
        }
        self.transfers.push(TokenTransfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }
}

/// In-memory token ledger where the engine's custody account is the only
/// spender allowances are granted to.
pub struct MemoryTokenLedger {
    custody: Address,
    state: Mutex<MemoryState>,
}

impl MemoryTokenLedger {
    pub fn new(custody: Address) -> Self {
        Self {
            custody,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn custody(&self) -> &Address {
        &self.custody
    }

    pub fn mint(&self, to: &Address, amount: Amount) -> Result<(), TokenError> {
        self.state.lock().credit(to, amount)
    }

    /// Set how much the engine may pull from `owner`.
    pub fn approve(&self, owner: &Address, amount: Amount) {
        self.state.lock().allowances.insert(owner.clone(), amount);
    }

    pub fn allowance(&self, owner: &Address) -> Amount {
        self.state.lock().allowances.get(owner).copied().unwrap_or(0)
    }

    /// Make every transfer *to* `account` fail. Used to exercise rollback.
    pub fn freeze(&self, account: &Address) {
        self.state.lock().frozen.insert(account.clone());
    }

    pub fn unfreeze(&self, account: &Address) {
        self.state.lock().frozen.remove(account);
    }

    pub fn balances(&self) -> BTreeMap<Address, Amount> {
        self.state.lock().balances.clone()
    }

    pub fn transfers(&self) -> Vec<TokenTransfer> {
        self.state.lock().transfers.clone()
    }
}

impl TokenLedger for MemoryTokenLedger {
    fn balance_of(&self, account: &Address) -> Amount {
        self.state.lock().balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&self, to: &Address, amount: Amount) -> Result<(), TokenError> {
        self.state.lock().move_funds(&self.custody, to, amount)
    }

    fn transfer_from(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TokenError> {
        let mut state = self.state.lock();
        let approved = state.allowances.get(from).copied().unwrap_or(0);
        if approved < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: from.clone(),
                approved,
                required: amount,
            });
        }
        state.move_funds(from, to, amount)?;
        if approved != Amount::MAX {
            state.allowances.insert(from.clone(), approved - amount);
        }
        Ok(())
    }
}
