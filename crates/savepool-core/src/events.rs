use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::Badge;
use crate::types::{Address, Amount, GoalId, PoolId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SavingsEvent {
    UserRegistered {
        address: Address,
        username: String,
    },
    GoalCreated {
        owner: Address,
        goal_id: GoalId,
        target_amount: Amount,
        lock_duration: u64,
    },
    DepositMade {
        owner: Address,
        goal_id: GoalId,
        amount: Amount,
        new_total: Amount,
    },
    GoalCompleted {
        owner: Address,
        goal_id: GoalId,
    },
    PoolCreated {
        pool_id: PoolId,
        creator: Address,
        name: String,
        target_amount: Amount,
        max_members: u32,
        lock_duration: u64,
    },
    MemberJoined {
        pool_id: PoolId,
        member: Address,
        /// Amount pulled from the member.
        contribution_amount: Amount,
        /// Amount credited to the pool after any referral bonus.
        credited_amount: Amount,
    },
    ReferralBonusPaid {
        pool_id: PoolId,
        referrer: Address,
        bonus_amount: Amount,
    },
    PoolCompleted {
        pool_id: PoolId,
        total: Amount,
    },
    BadgeAwarded {
        address: Address,
        badge: Badge,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub seq: u64,
    pub at: Timestamp,
    pub event: SavingsEvent,
}

/// Append-only, totally ordered log of committed events.
#[derive(Default)]
pub struct EventLog {
    records: Mutex<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch under one lock so a transaction's events stay adjacent.
    pub(crate) fn append(&self, at: Timestamp, events: Vec<SavingsEvent>) {
        let mut records = self.records.lock();
        for event in events {
            let seq = records.len() as u64 + 1;
            debug!(seq, ?event, "event recorded");
            records.push(EventRecord { seq, at, event });
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<EventRecord> {
        let records = self.records.lock();
        let start = (seq as usize).min(records.len());
        records[start..].to_vec()
    }
}
