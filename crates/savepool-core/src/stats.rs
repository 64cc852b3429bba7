use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::Amount;

/// Aggregate counters. Maintained incrementally by committing operations,
/// never recomputed by scanning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_users: u64,
    /// Gross amount accepted into goals and pools.
    pub total_volume: Amount,
    /// Carried for consumers; yield accrual lives outside this engine.
    pub total_yield: Amount,
    pub total_goals: u64,
    pub total_pools: u64,
    pub referral_payouts: Amount,
}

#[derive(Default)]
pub(crate) struct StatsCounter {
    inner: Mutex<Stats>,
}

impl StatsCounter {
    pub(crate) fn update(&self, apply: impl FnOnce(&mut Stats)) {
        apply(&mut self.inner.lock());
    }

    pub(crate) fn snapshot(&self) -> Stats {
        *self.inner.lock()
    }
}
