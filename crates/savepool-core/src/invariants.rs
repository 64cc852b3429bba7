//! Conservation and structural checks over a registry at rest.
//!
//! Each ledger snapshot is taken under its own lock, so the audit is only
//! meaningful while no mutation is in flight.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::registry::Registry;
use crate::types::{Address, Amount, GoalId, PoolId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    GoalOverTarget {
        goal_id: GoalId,
        current: Amount,
        target: Amount,
    },
    CompletedGoalStillActive {
        goal_id: GoalId,
    },
    PoolBalanceMismatch {
        pool_id: PoolId,
        recorded: Amount,
        summed: Option<Amount>,
    },
    MemberCountMismatch {
        pool_id: PoolId,
        recorded: u32,
        listed: usize,
    },
    PoolOverCapacity {
        pool_id: PoolId,
        members: u32,
        max_members: u32,
    },
    PoolOverTarget {
        pool_id: PoolId,
        current: Amount,
        target: Amount,
    },
    DuplicateMember {
        pool_id: PoolId,
        member: Address,
    },
    CustodyMismatch {
        expected: Option<Amount>,
        actual: Amount,
    },
    TreasuryMismatch {
        recorded: Amount,
        actual: Amount,
    },
    UserCountMismatch {
        counted: u64,
        profiles: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::GoalOverTarget { goal_id, current, target } => {
                write!(f, "{goal_id} holds {current} above target {target}")
            }
            Violation::CompletedGoalStillActive { goal_id } => {
                write!(f, "{goal_id} reached its target but is still active")
            }
            Violation::PoolBalanceMismatch { pool_id, recorded, summed } => {
                write!(f, "{pool_id} records {recorded}, members sum to {summed:?}")
            }
            Violation::MemberCountMismatch { pool_id, recorded, listed } => {
                write!(f, "{pool_id} counts {recorded} members but lists {listed}")
            }
            Violation::PoolOverCapacity { pool_id, members, max_members } => {
                write!(f, "{pool_id} has {members} members, cap {max_members}")
            }
            Violation::PoolOverTarget { pool_id, current, target } => {
                write!(f, "{pool_id} holds {current} above target {target}")
            }
            Violation::DuplicateMember { pool_id, member } => {
                write!(f, "{member} appears twice in {pool_id}")
            }
            Violation::CustodyMismatch { expected, actual } => {
                write!(f, "custody holds {actual}, ledgers account for {expected:?}")
            }
            Violation::TreasuryMismatch { recorded, actual } => {
                write!(f, "treasury records {recorded}, token balance is {actual}")
            }
            Violation::UserCountMismatch { counted, profiles } => {
                write!(f, "stats count {counted} users, {profiles} profiles exist")
            }
        }
    }
}

pub fn audit(registry: &Registry) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut locked: Option<Amount> = Some(0);

    for goal in registry.goals().all_goals() {
        if goal.current_amount > goal.target_amount {
            violations.push(Violation::GoalOverTarget {
                goal_id: goal.id,
                current: goal.current_amount,
                target: goal.target_amount,
            });
        }
        if goal.current_amount == goal.target_amount && goal.is_active {
            violations.push(Violation::CompletedGoalStillActive { goal_id: goal.id });
        }
        locked = locked.and_then(|sum| sum.checked_add(goal.current_amount));
    }

    for pool in registry.pools().pools() {
        let summed = pool.contribution_total();
        if summed != Some(pool.current_amount) {
            violations.push(Violation::PoolBalanceMismatch {
                pool_id: pool.id,
                recorded: pool.current_amount,
                summed,
            });
        }
        if pool.current_members as usize != pool.members.len() {
            violations.push(Violation::MemberCountMismatch {
                pool_id: pool.id,
                recorded: pool.current_members,
                listed: pool.members.len(),
            });
        }
        if pool.current_members > pool.max_members {
            violations.push(Violation::PoolOverCapacity {
                pool_id: pool.id,
                members: pool.current_members,
                max_members: pool.max_members,
            });
        }
        if pool.current_amount > pool.target_amount {
            violations.push(Violation::PoolOverTarget {
                pool_id: pool.id,
                current: pool.current_amount,
                target: pool.target_amount,
            });
        }
        let mut seen = BTreeSet::new();
        for m in &pool.members {
            if !seen.insert(&m.member) {
                violations.push(Violation::DuplicateMember {
                    pool_id: pool.id,
                    member: m.member.clone(),
                });
            }
        }
        locked = locked.and_then(|sum| sum.checked_add(pool.current_amount));
    }

    // Contributions stranded by a failed refund still sit in custody.
    locked = locked.and_then(|sum| {
        registry
            .pools()
            .unrefunded_total()
            .and_then(|stranded| sum.checked_add(stranded))
    });

    let custody = registry.token().balance_of(registry.custody_account());
    if locked != Some(custody) {
        violations.push(Violation::CustodyMismatch {
            expected: locked,
            actual: custody,
        });
    }

    let treasury = registry.treasury();
    let actual = registry.token().balance_of(treasury.account());
    if actual != treasury.balance() {
        violations.push(Violation::TreasuryMismatch {
            recorded: treasury.balance(),
            actual,
        });
    }

    let counted = registry.get_stats().total_users;
    let profiles = registry.user_count();
    if counted != profiles as u64 {
        violations.push(Violation::UserCountMismatch { counted, profiles });
    }

    violations
}
