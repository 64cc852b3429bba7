use std::sync::Arc;

use crate::clock::Clock;
use crate::events::{EventLog, SavingsEvent};
use crate::profile::{Milestone, ProfileStore};
use crate::stats::StatsCounter;
use crate::token::TokenLedger;
use crate::types::{Address, Timestamp};

/// Handles shared by the registry and both ledgers.
#[derive(Clone)]
pub(crate) struct LedgerContext {
    pub token: Arc<dyn TokenLedger>,
    pub clock: Arc<dyn Clock>,
    pub profiles: Arc<ProfileStore>,
    pub stats: Arc<StatsCounter>,
    pub events: Arc<EventLog>,
    pub custody: Address,
}

impl LedgerContext {
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Bump a profile milestone and queue a `BadgeAwarded` event when it
    /// unlocks a badge for the first time.
    pub(crate) fn reach(
        &self,
        address: &Address,
        milestone: Milestone,
        events: &mut Vec<SavingsEvent>,
    ) {
        if let Some(badge) = self.profiles.reach(address, milestone) {
            events.push(SavingsEvent::BadgeAwarded {
                address: address.clone(),
                badge,
            });
        }
    }
}
