use serde::{Deserialize, Serialize};

use crate::error::{Result, SavingsError};
use crate::types::{Address, Amount, BPS_DENOMINATOR};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralPolicy {
    pub bps: u32,
    /// Bonuses below this are not paid.
    pub minimum_payout: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralPayout {
    pub recipient: Address,
    pub amount: Amount,
}

impl ReferralPolicy {
    pub fn bonus_for(&self, contribution: Amount) -> Result<Amount> {
        contribution
            .checked_mul(self.bps as Amount)
            .map(|scaled| scaled / BPS_DENOMINATOR as Amount)
            .ok_or(SavingsError::AmountOverflow)
    }

    /// Payout owed for `contribution` by `member`, if any. A missing, zero or
    /// self-referring referrer disables the bonus.
    pub fn calculate_payout(
        &self,
        contribution: Amount,
        member: &Address,
        referrer: Option<&Address>,
    ) -> Result<Option<ReferralPayout>> {
        let recipient = match referrer {
            Some(r) if !r.is_empty() && !r.is_zero() && r != member => r,
            _ => return Ok(None),
        };
        if self.bps == 0 || contribution == 0 {
            return Ok(None);
        }
        let amount = self.bonus_for(contribution)?;
        if amount == 0 || amount < self.minimum_payout {
            return Ok(None);
        }
        Ok(Some(ReferralPayout {
            recipient: recipient.clone(),
            amount,
        }))
    }
}
