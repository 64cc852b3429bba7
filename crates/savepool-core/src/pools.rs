//! Collectively funded group pools with a membership cap and referral bonus.
//!
//! Referral bonuses are carved out of the contribution that triggered them:
//! the member pays the accepted amount, the referrer receives
//! `accepted * bps / 10_000` from custody, and the pool plus the member's
//! [`Membership`] are credited with the remainder. The sum of membership
//! contributions therefore always equals the pool's `current_amount`, and
//! the custody account holds exactly that amount for the pool.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{MAX_DESCRIPTION_LEN, MAX_POOL_NAME_LEN, MIN_POOL_MEMBERS};
use crate::context::LedgerContext;
use crate::error::{Result, SavingsError};
use crate::events::SavingsEvent;
use crate::profile::Milestone;
use crate::referral::{ReferralPayout, ReferralPolicy};
use crate::types::{checked_add, Address, Amount, PoolId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub pool_id: PoolId,
    pub member: Address,
    /// Net amount credited to the pool.
    pub contribution_amount: Amount,
    /// Gross amount pulled from the member.
    pub paid_amount: Amount,
    pub referrer: Option<Address>,
    pub joined_at: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupPool {
    pub id: PoolId,
    pub creator: Address,
    pub name: String,
    pub description: String,
    pub target_amount: Amount,
    pub current_amount: Amount,
    pub max_members: u32,
    pub current_members: u32,
    pub lock_duration: u64,
    pub created_at: Timestamp,
    pub unlocks_at: Timestamp,
    pub is_active: bool,
    pub completed_at: Option<Timestamp>,
    pub members: Vec<Membership>,
}

impl GroupPool {
    pub fn has_member(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.member == address)
    }

    pub fn remaining(&self) -> Amount {
        self.target_amount.saturating_sub(self.current_amount)
    }

    pub fn is_full(&self) -> bool {
        self.current_members >= self.max_members
    }

    pub fn contribution_total(&self) -> Option<Amount> {
        self.members
            .iter()
            .try_fold(0 as Amount, |acc, m| acc.checked_add(m.contribution_amount))
    }
}

/// Parameters for a new pool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target_amount: Amount,
    pub max_members: u32,
    #[serde(default)]
    pub lock_duration: u64,
}

impl NewPool {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SavingsError::MissingField { field: "name" });
        }
        if self.name.chars().count() > MAX_POOL_NAME_LEN {
            return Err(SavingsError::FieldTooLong {
                field: "name",
                max: MAX_POOL_NAME_LEN,
            });
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(SavingsError::FieldTooLong {
                field: "description",
                max: MAX_DESCRIPTION_LEN,
            });
        }
        if self.target_amount == 0 {
            return Err(SavingsError::ZeroAmount);
        }
        if self.max_members < MIN_POOL_MEMBERS {
            return Err(SavingsError::MemberLimitTooLow {
                requested: self.max_members,
                min: MIN_POOL_MEMBERS,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub contribution_amount: Amount,
    /// Accept only the pool's remaining headroom instead of failing when the
    /// contribution would overshoot the target.
    #[serde(default)]
    pub allow_partial: bool,
    #[serde(default)]
    pub referrer: Option<Address>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinReceipt {
    pub pool_id: PoolId,
    pub paid: Amount,
    pub credited: Amount,
    pub referral: Option<ReferralPayout>,
    pub pool_completed: bool,
}

type PoolHandle = Arc<Mutex<GroupPool>>;

pub struct PoolLedger {
    ctx: LedgerContext,
    referral: ReferralPolicy,
    treasury: Address,
    next_id: AtomicU64,
    pools: RwLock<BTreeMap<PoolId, PoolHandle>>,
    /// Contributions stuck in custody after a payout and its refund both
    /// failed, per member. Nothing else accounts for these funds.
    unrefunded: Mutex<BTreeMap<Address, Amount>>,
}

impl PoolLedger {
    pub(crate) fn new(ctx: LedgerContext, referral: ReferralPolicy, treasury: Address) -> Self {
        Self {
            ctx,
            referral,
            treasury,
            next_id: AtomicU64::new(1),
            pools: RwLock::new(BTreeMap::new()),
            unrefunded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn referral_policy(&self) -> ReferralPolicy {
        self.referral
    }

    /// Custody and treasury never earn referral bonuses.
    fn is_engine_account(&self, address: &Address) -> bool {
        address == &self.ctx.custody || address == &self.treasury
    }

    pub fn unrefunded(&self) -> BTreeMap<Address, Amount> {
        self.unrefunded.lock().clone()
    }

    pub fn unrefunded_total(&self) -> Option<Amount> {
        self.unrefunded
            .lock()
            .values()
            .try_fold(0 as Amount, |acc, v| acc.checked_add(*v))
    }

    fn handle(&self, pool_id: PoolId) -> Result<PoolHandle> {
        self.pools
            .read()
            .get(&pool_id)
            .cloned()
            .ok_or(SavingsError::PoolNotFound(pool_id))
    }

    pub fn create_pool(&self, creator: &Address, params: NewPool) -> Result<PoolId> {
        params.validate()?;
        let now = self.ctx.now();
        // The map lock is held until the events are appended, so ids and
        // `PoolCreated` events appear in order and precede any join.
        let mut pools = self.pools.write();
        let id = PoolId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let pool = GroupPool {
            id,
            creator: creator.clone(),
            name: params.name,
            description: params.description,
            target_amount: params.target_amount,
            current_amount: 0,
            max_members: params.max_members,
            current_members: 0,
            lock_duration: params.lock_duration,
            created_at: now,
            unlocks_at: now.saturating_add(params.lock_duration),
            is_active: true,
            completed_at: None,
            members: Vec::new(),
        };
        let mut events = vec![SavingsEvent::PoolCreated {
            pool_id: id,
            creator: creator.clone(),
            name: pool.name.clone(),
            target_amount: pool.target_amount,
            max_members: pool.max_members,
            lock_duration: pool.lock_duration,
        }];
        pools.insert(id, Arc::new(Mutex::new(pool)));

        self.ctx.reach(creator, Milestone::PoolCreated, &mut events);
        self.ctx.stats.update(|s| s.total_pools += 1);
        self.ctx.events.append(now, events);
        info!(%creator, pool = %id, "pool created");
        Ok(id)
    }

    /// Join `pool_id` with a contribution. Every precondition is checked
    /// before funds move; a failed transfer leaves the pool untouched.
    pub fn join_pool(
        &self,
        pool_id: PoolId,
        member: &Address,
        request: JoinRequest,
    ) -> Result<JoinReceipt> {
        let handle = self.handle(pool_id)?;
        let mut pool = handle.lock();

        if !pool.is_active {
            return Err(SavingsError::PoolClosed(pool_id));
        }
        if pool.is_full() {
            warn!(pool = %pool_id, %member, "join rejected: pool full");
            return Err(SavingsError::PoolFull {
                pool_id,
                max_members: pool.max_members,
            });
        }
        if pool.has_member(member) {
            return Err(SavingsError::AlreadyMember {
                pool_id,
                member: member.clone(),
            });
        }
        let amount = request.contribution_amount;
        if amount == 0 {
            return Err(SavingsError::ZeroAmount);
        }
        let requested_total = checked_add(pool.current_amount, amount)?;
        let paid = if requested_total > pool.target_amount {
            if !request.allow_partial {
                warn!(pool = %pool_id, %member, amount, "join rejected: over target");
                return Err(SavingsError::PoolOverTarget {
                    pool_id,
                    amount,
                    current: pool.current_amount,
                    target: pool.target_amount,
                });
            }
            pool.remaining()
        } else {
            amount
        };

        let referrer = request
            .referrer
            .as_ref()
            .filter(|r| !self.is_engine_account(r));
        if referrer.is_none() && request.referrer.is_some() {
            debug!(pool = %pool_id, %member, "engine account named as referrer, no bonus");
        }
        let referral = self.referral.calculate_payout(paid, member, referrer)?;
        let bonus = referral.as_ref().map(|p| p.amount).unwrap_or(0);
        let credited = paid - bonus;

        let now = self.ctx.now();
        let mut staged = pool.clone();
        staged.current_amount += credited;
        staged.current_members += 1;
        staged.members.push(Membership {
            pool_id,
            member: member.clone(),
            contribution_amount: credited,
            paid_amount: paid,
            referrer: referrer.cloned(),
            joined_at: now,
        });
        let pool_completed = staged.current_amount >= staged.target_amount;
        if pool_completed {
            staged.is_active = false;
            staged.completed_at = Some(now);
        }

        self.settle(member, paid, referral.as_ref())?;
        *pool = staged;

        let mut events = vec![SavingsEvent::MemberJoined {
            pool_id,
            member: member.clone(),
            contribution_amount: paid,
            credited_amount: credited,
        }];
        self.ctx.reach(member, Milestone::PoolJoined, &mut events);
        if let Some(payout) = &referral {
            events.push(SavingsEvent::ReferralBonusPaid {
                pool_id,
                referrer: payout.recipient.clone(),
                bonus_amount: payout.amount,
            });
            self.ctx
                .reach(&payout.recipient, Milestone::ReferralEarned, &mut events);
        }
        if pool_completed {
            events.push(SavingsEvent::PoolCompleted {
                pool_id,
                total: pool.current_amount,
            });
        }
        self.ctx.stats.update(|s| {
            s.total_volume = s.total_volume.saturating_add(paid);
            s.referral_payouts = s.referral_payouts.saturating_add(bonus);
        });
        self.ctx.events.append(now, events);
        info!(
            pool = %pool_id,
            %member,
            paid,
            credited,
            bonus,
            members = pool.current_members,
            "member joined"
        );

        Ok(JoinReceipt {
            pool_id,
            paid,
            credited,
            referral,
            pool_completed,
        })
    }

    /// Pull the contribution, then pay the referrer. A failed payout refunds
    /// the member so the join leaves no trace on the token ledger. When the
    /// refund fails too, the contribution stays in custody and is recorded
    /// under [`PoolLedger::unrefunded`].
    fn settle(
        &self,
        member: &Address,
        paid: Amount,
        referral: Option<&ReferralPayout>,
    ) -> Result<()> {
        let token = &self.ctx.token;
        token.transfer_from(member, &self.ctx.custody, paid)?;
        let Some(payout) = referral else {
            return Ok(());
        };
        if let Err(cause) = token.transfer(&payout.recipient, payout.amount) {
            warn!(referrer = %payout.recipient, %cause, "referral payout failed, refunding member");
            return match token.transfer(member, paid) {
                Ok(()) => Err(SavingsError::Token(cause)),
                Err(refund) => {
                    error!(%member, paid, %refund, "refund after failed referral payout failed");
                    let mut unrefunded = self.unrefunded.lock();
                    let owed = unrefunded.entry(member.clone()).or_default();
                    *owed = owed.saturating_add(paid);
                    Err(SavingsError::CompensationFailed {
                        refund_to: member.clone(),
                        cause,
                        refund,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn get_pool(&self, pool_id: PoolId) -> Result<GroupPool> {
        Ok(self.handle(pool_id)?.lock().clone())
    }

    /// Snapshot of every pool in id order.
    pub fn pools(&self) -> Vec<GroupPool> {
        let handles: Vec<PoolHandle> = self.pools.read().values().cloned().collect();
        handles.iter().map(|h| h.lock().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}
