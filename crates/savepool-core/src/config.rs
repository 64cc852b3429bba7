use serde::{Deserialize, Serialize};

use crate::error::{Result, SavingsError};
use crate::referral::ReferralPolicy;
use crate::types::{Address, Amount, BPS_DENOMINATOR, UNIT};

pub const DEFAULT_REGISTRATION_FEE: Amount = UNIT / 1_000; // 0.001 token
pub const DEFAULT_REFERRAL_BPS: u32 = 100;
pub const DEFAULT_CUSTODY_ACCOUNT: &str = "savepool:custody";
pub const DEFAULT_TREASURY_ACCOUNT: &str = "savepool:treasury";
pub const DEFAULT_REQUEST_LOG_CAPACITY: usize = 10_000;

pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_POOL_NAME_LEN: usize = 64;
pub const MAX_DESCRIPTION_LEN: usize = 280;
pub const MIN_POOL_MEMBERS: u32 = 2;

/// How many goals an owner may have open at once.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalPolicy {
    pub max_active_per_owner: usize,
}

impl Default for GoalPolicy {
    fn default() -> Self {
        Self {
            max_active_per_owner: 1,
        }
    }
}

/// Engine configuration. Every field has a default, so a partial JSON
/// document is enough to override a single value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub registration_fee: Amount,
    pub referral_bps: u32,
    pub minimum_referral_payout: Amount,
    pub goals: GoalPolicy,
    /// Account holding goal deposits and pool contributions.
    pub custody_account: Address,
    /// Account receiving registration fees.
    pub treasury_account: Address,
    /// Completed idempotency keys kept for replay. The oldest is evicted
    /// first; a replay after eviction executes again.
    pub request_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registration_fee: DEFAULT_REGISTRATION_FEE,
            referral_bps: DEFAULT_REFERRAL_BPS,
            minimum_referral_payout: 1,
            goals: GoalPolicy::default(),
            custody_account: Address::new(DEFAULT_CUSTODY_ACCOUNT),
            treasury_account: Address::new(DEFAULT_TREASURY_ACCOUNT),
            request_log_capacity: DEFAULT_REQUEST_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.referral_bps > BPS_DENOMINATOR {
            return Err(SavingsError::InvalidConfig(format!(
                "referral_bps {} exceeds {}",
                self.referral_bps, BPS_DENOMINATOR
            )));
        }
        if self.goals.max_active_per_owner == 0 {
            return Err(SavingsError::InvalidConfig(
                "goals.max_active_per_owner must be at least 1".into(),
            ));
        }
        if self.request_log_capacity == 0 {
            return Err(SavingsError::InvalidConfig(
                "request_log_capacity must be at least 1".into(),
            ));
        }
        if self.custody_account.is_empty() || self.treasury_account.is_empty() {
            return Err(SavingsError::InvalidConfig(
                "custody and treasury accounts must be set".into(),
            ));
        }
        if self.custody_account == self.treasury_account {
            return Err(SavingsError::InvalidConfig(
                "custody and treasury accounts must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn referral_policy(&self) -> ReferralPolicy {
        ReferralPolicy {
            bps: self.referral_bps,
            minimum_payout: self.minimum_referral_payout,
        }
    }
}
