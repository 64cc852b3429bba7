use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{checked_add, Address, Amount};

/// Running balance of registration fees, mirrored by the token balance of
/// `account`.
pub struct Treasury {
    account: Address,
    balance: Mutex<Amount>,
}

impl Treasury {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            balance: Mutex::new(0),
        }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn balance(&self) -> Amount {
        *self.balance.lock()
    }

    /// Checked before any funds move, so the later credit cannot fail.
    pub(crate) fn ensure_room(&self, amount: Amount) -> Result<()> {
        checked_add(*self.balance.lock(), amount).map(|_| ())
    }

    pub(crate) fn credit(&self, amount: Amount) -> Result<Amount> {
        let mut balance = self.balance.lock();
        *balance = checked_add(*balance, amount)?;
        Ok(*balance)
    }
}
