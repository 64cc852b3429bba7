//! Individually owned, target-bounded savings goals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::GoalPolicy;
use crate::context::LedgerContext;
use crate::error::{Result, SavingsError};
use crate::events::SavingsEvent;
use crate::profile::Milestone;
use crate::types::{checked_add, Address, Amount, GoalId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavingsGoal {
    pub id: GoalId,
    pub owner: Address,
    pub target_amount: Amount,
    pub current_amount: Amount,
    /// Seconds.
    pub lock_duration: u64,
    pub created_at: Timestamp,
    pub unlocks_at: Timestamp,
    pub is_active: bool,
    pub completed_at: Option<Timestamp>,
}

impl SavingsGoal {
    pub fn remaining(&self) -> Amount {
        self.target_amount - self.current_amount
    }

    pub fn is_unlocked(&self, now: Timestamp) -> bool {
        now >= self.unlocks_at
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositReceipt {
    pub goal_id: GoalId,
    /// Amount actually pulled from the owner; smaller than requested when an
    /// over-target deposit was clamped.
    pub accepted: Amount,
    pub new_total: Amount,
    pub completed: bool,
}

type OwnerGoals = Arc<Mutex<Vec<SavingsGoal>>>;

/// Goals are grouped per owner; the owner's mutex serializes every mutation
/// of that owner's goals.
pub struct GoalLedger {
    ctx: LedgerContext,
    policy: GoalPolicy,
    next_id: AtomicU64,
    owners: RwLock<BTreeMap<Address, OwnerGoals>>,
}

impl GoalLedger {
    pub(crate) fn new(ctx: LedgerContext, policy: GoalPolicy) -> Self {
        Self {
            ctx,
            policy,
            next_id: AtomicU64::new(1),
            owners: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> GoalPolicy {
        self.policy
    }

    fn slot(&self, owner: &Address) -> Option<OwnerGoals> {
        self.owners.read().get(owner).cloned()
    }

    fn slot_or_insert(&self, owner: &Address) -> OwnerGoals {
        if let Some(slot) = self.slot(owner) {
            return slot;
        }
        self.owners.write().entry(owner.clone()).or_default().clone()
    }

    pub fn create_goal(
        &self,
        owner: &Address,
        target_amount: Amount,
        lock_duration: u64,
    ) -> Result<GoalId> {
        if target_amount == 0 {
            return Err(SavingsError::ZeroAmount);
        }
        let slot = self.slot_or_insert(owner);
        let mut goals = slot.lock();
        let active = goals.iter().filter(|g| g.is_active).count();
        if active >= self.policy.max_active_per_owner {
            warn!(%owner, active, "goal rejected: active goal limit reached");
            return Err(SavingsError::ActiveGoalExists {
                owner: owner.clone(),
                active,
            });
        }
        let now = self.ctx.now();
        let id = GoalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        goals.push(SavingsGoal {
            id,
            owner: owner.clone(),
            target_amount,
            current_amount: 0,
            lock_duration,
            created_at: now,
            unlocks_at: now.saturating_add(lock_duration),
            is_active: true,
            completed_at: None,
        });

        let mut events = vec![SavingsEvent::GoalCreated {
            owner: owner.clone(),
            goal_id: id,
            target_amount,
            lock_duration,
        }];
        self.ctx.reach(owner, Milestone::GoalCreated, &mut events);
        self.ctx.stats.update(|s| s.total_goals += 1);
        self.ctx.events.append(now, events);
        info!(%owner, goal = %id, target_amount, lock_duration, "goal created");
        Ok(id)
    }

    /// Deposit into the owner's most recently created active goal.
    pub fn deposit(
        &self,
        owner: &Address,
        amount: Amount,
        allow_over_target: bool,
    ) -> Result<DepositReceipt> {
        self.deposit_where(owner, amount, allow_over_target, |goals| {
            goals
                .iter()
                .rposition(|g| g.is_active)
                .ok_or_else(|| SavingsError::GoalNotFound(owner.clone()))
        })
    }

    pub fn deposit_to(
        &self,
        owner: &Address,
        goal_id: GoalId,
        amount: Amount,
        allow_over_target: bool,
    ) -> Result<DepositReceipt> {
        self.deposit_where(owner, amount, allow_over_target, |goals| {
            let idx = goals
                .iter()
                .position(|g| g.id == goal_id)
                .ok_or_else(|| SavingsError::UnknownGoal {
                    owner: owner.clone(),
                    goal_id,
                })?;
            if !goals[idx].is_active {
                return Err(SavingsError::GoalInactive(goal_id));
            }
            Ok(idx)
        })
    }

    fn deposit_where(
        &self,
        owner: &Address,
        amount: Amount,
        allow_over_target: bool,
        select: impl FnOnce(&[SavingsGoal]) -> Result<usize>,
    ) -> Result<DepositReceipt> {
        let slot = self
            .slot(owner)
            .ok_or_else(|| SavingsError::GoalNotFound(owner.clone()))?;
        let mut goals = slot.lock();
        let idx = select(&goals)?;
        if amount == 0 {
            return Err(SavingsError::ZeroAmount);
        }

        let goal = &goals[idx];
        let requested_total = checked_add(goal.current_amount, amount)?;
        let accepted = if requested_total > goal.target_amount {
            if !allow_over_target {
                warn!(%owner, goal = %goal.id, amount, "deposit rejected: exceeds target");
                return Err(SavingsError::ExceedsTarget {
                    amount,
                    current: goal.current_amount,
                    target: goal.target_amount,
                });
            }
            goal.remaining()
        } else {
            amount
        };

        let now = self.ctx.now();
        let mut staged = goal.clone();
        staged.current_amount += accepted;
        let completed = staged.current_amount == staged.target_amount;
        if completed {
            staged.is_active = false;
            staged.completed_at = Some(now);
        }

        self.ctx
            .token
            .transfer_from(owner, &self.ctx.custody, accepted)?;

        let receipt = DepositReceipt {
            goal_id: staged.id,
            accepted,
            new_total: staged.current_amount,
            completed,
        };
        goals[idx] = staged;

        let mut events = vec![SavingsEvent::DepositMade {
            owner: owner.clone(),
            goal_id: receipt.goal_id,
            amount: accepted,
            new_total: receipt.new_total,
        }];
        if completed {
            events.push(SavingsEvent::GoalCompleted {
                owner: owner.clone(),
                goal_id: receipt.goal_id,
            });
            self.ctx.reach(owner, Milestone::GoalCompleted, &mut events);
        }
        self.ctx
            .stats
            .update(|s| s.total_volume = s.total_volume.saturating_add(accepted));
        self.ctx.events.append(now, events);
        info!(
            %owner,
            goal = %receipt.goal_id,
            accepted,
            new_total = receipt.new_total,
            completed,
            "deposit committed"
        );
        Ok(receipt)
    }

    /// Snapshot of the owner's most recent goal.
    pub fn get_goal(&self, owner: &Address) -> Result<SavingsGoal> {
        let slot = self
            .slot(owner)
            .ok_or_else(|| SavingsError::GoalNotFound(owner.clone()))?;
        let goals = slot.lock();
        goals
            .last()
            .cloned()
            .ok_or_else(|| SavingsError::GoalNotFound(owner.clone()))
    }

    pub fn goals_of(&self, owner: &Address) -> Vec<SavingsGoal> {
        match self.slot(owner) {
            Some(slot) => {
                let goals = slot.lock();
                goals.clone()
            }
            None => Vec::new(),
        }
    }

    /// Every goal, ordered by owner then creation.
    pub fn all_goals(&self) -> Vec<SavingsGoal> {
        let slots: Vec<OwnerGoals> = self.owners.read().values().cloned().collect();
        slots
            .iter()
            .flat_map(|slot| slot.lock().clone())
            .collect()
    }
}
