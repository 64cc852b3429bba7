use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SavingsError};
use crate::types::{Address, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Saver,
    GoalCrusher,
    PoolFounder,
    TeamPlayer,
    Connector,
}

/// Profile-level events the ledgers report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Milestone {
    GoalCreated,
    GoalCompleted,
    PoolCreated,
    PoolJoined,
    ReferralEarned,
}

impl Milestone {
    fn badge(self) -> Badge {
        match self {
            Milestone::GoalCreated => Badge::Saver,
            Milestone::GoalCompleted => Badge::GoalCrusher,
            Milestone::PoolCreated => Badge::PoolFounder,
            Milestone::PoolJoined => Badge::TeamPlayer,
            Milestone::ReferralEarned => Badge::Connector,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub address: Address,
    pub username: String,
    pub is_registered: bool,
    pub registered_at: Timestamp,
    pub goals_completed: u32,
    pub pools_joined: u32,
    pub pools_created: u32,
    pub badges: BTreeSet<Badge>,
}

impl UserProfile {
    pub(crate) fn new(address: Address, username: String, registered_at: Timestamp) -> Self {
        Self {
            address,
            username,
            is_registered: true,
            registered_at,
            goals_completed: 0,
            pools_joined: 0,
            pools_created: 0,
            badges: BTreeSet::new(),
        }
    }

    /// Apply a milestone and return the badge if this is the first time.
    fn reach(&mut self, milestone: Milestone) -> Option<Badge> {
        match milestone {
            Milestone::GoalCompleted => self.goals_completed += 1,
            Milestone::PoolCreated => self.pools_created += 1,
            Milestone::PoolJoined => self.pools_joined += 1,
            Milestone::GoalCreated | Milestone::ReferralEarned => {}
        }
        let badge = milestone.badge();
        self.badges.insert(badge).then_some(badge)
    }
}

/// Registered profiles. Entries are never removed.
#[derive(Default)]
pub(crate) struct ProfileStore {
    profiles: RwLock<BTreeMap<Address, UserProfile>>,
}

impl ProfileStore {
    pub(crate) fn is_registered(&self, address: &Address) -> bool {
        self.profiles
            .read()
            .get(address)
            .map(|p| p.is_registered)
            .unwrap_or(false)
    }

    pub(crate) fn get(&self, address: &Address) -> Option<UserProfile> {
        self.profiles.read().get(address).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Insert `profile` once `effects` succeeds. The write lock is held
    /// across the duplicate check, `effects` and the insert, so concurrent
    /// registrations of one address cannot both pass.
    pub(crate) fn insert_with(
        &self,
        profile: UserProfile,
        effects: impl FnOnce(&UserProfile) -> Result<()>,
    ) -> Result<()> {
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&profile.address) {
            return Err(SavingsError::AlreadyRegistered(profile.address));
        }
        effects(&profile)?;
        profiles.insert(profile.address.clone(), profile);
        Ok(())
    }

    /// Record a milestone for a registered address. Unknown addresses are
    /// ignored and yield no badge.
    pub(crate) fn reach(&self, address: &Address, milestone: Milestone) -> Option<Badge> {
        self.profiles
            .write()
            .get_mut(address)
            .and_then(|profile| profile.reach(milestone))
    }
}
