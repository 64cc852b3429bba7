//! Registration gate and dispatch point for both ledgers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{EngineConfig, MAX_USERNAME_LEN};
use crate::context::LedgerContext;
use crate::error::{Result, SavingsError};
use crate::events::{EventLog, EventRecord, SavingsEvent};
use crate::goals::{DepositReceipt, GoalLedger, SavingsGoal};
use crate::pools::{GroupPool, JoinReceipt, JoinRequest, NewPool, PoolLedger};
use crate::profile::{Badge, ProfileStore, UserProfile};
use crate::stats::{Stats, StatsCounter};
use crate::token::TokenLedger;
use crate::treasury::Treasury;
use crate::types::{Address, Amount, GoalId, PoolId, RequestId};

/// A mutating operation, as submitted through [`Registry::execute`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        fee_paid: Amount,
    },
    CreateGoal {
        target_amount: Amount,
        lock_duration: u64,
    },
    Deposit {
        goal_id: Option<GoalId>,
        amount: Amount,
        allow_over_target: bool,
    },
    CreatePool(NewPool),
    JoinPool {
        pool_id: PoolId,
        request: JoinRequest,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Idempotency key; `None` executes unconditionally.
    pub id: Option<RequestId>,
    pub caller: Address,
    pub command: Command,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Registered,
    GoalCreated { goal_id: GoalId },
    Deposited(DepositReceipt),
    PoolCreated { pool_id: PoolId },
    Joined(JoinReceipt),
}

enum RequestState {
    InFlight,
    Done { command: Command, outcome: Outcome },
}

type RequestKey = (Address, RequestId);

/// Idempotency keys scoped to their caller. Completed entries are kept in
/// insertion order and the oldest is dropped once `capacity` is exceeded.
struct RequestLog {
    capacity: usize,
    states: BTreeMap<RequestKey, RequestState>,
    completed: VecDeque<RequestKey>,
}

impl RequestLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            states: BTreeMap::new(),
            completed: VecDeque::new(),
        }
    }

    fn complete(&mut self, key: RequestKey, command: Command, outcome: Outcome) {
        self.states
            .insert(key.clone(), RequestState::Done { command, outcome });
        self.completed.push_back(key);
        while self.completed.len() > self.capacity {
            if let Some(oldest) = self.completed.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.completed.len()
    }
}

pub struct Registry {
    config: EngineConfig,
    ctx: LedgerContext,
    treasury: Treasury,
    goals: GoalLedger,
    pools: PoolLedger,
    requests: Mutex<RequestLog>,
}

impl Registry {
    pub fn new(
        config: EngineConfig,
        token: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = LedgerContext {
            token,
            clock,
            profiles: Arc::new(ProfileStore::default()),
            stats: Arc::new(StatsCounter::default()),
            events: Arc::new(EventLog::new()),
            custody: config.custody_account.clone(),
        };
        Ok(Self {
            treasury: Treasury::new(config.treasury_account.clone()),
            goals: GoalLedger::new(ctx.clone(), config.goals),
            pools: PoolLedger::new(
                ctx.clone(),
                config.referral_policy(),
                config.treasury_account.clone(),
            ),
            requests: Mutex::new(RequestLog::new(config.request_log_capacity)),
            config,
            ctx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registration_fee(&self) -> Amount {
        self.config.registration_fee
    }

    pub fn referral_bps(&self) -> u32 {
        self.config.referral_bps
    }

    pub fn custody_account(&self) -> &Address {
        &self.ctx.custody
    }

    pub fn token(&self) -> &Arc<dyn TokenLedger> {
        &self.ctx.token
    }

    pub fn goals(&self) -> &GoalLedger {
        &self.goals
    }

    pub fn pools(&self) -> &PoolLedger {
        &self.pools
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    pub fn register_user(&self, caller: &Address, username: &str, fee_paid: Amount) -> Result<()> {
        if caller.is_empty() {
            return Err(SavingsError::MissingField { field: "address" });
        }
        let username = username.trim();
        if username.is_empty() {
            return Err(SavingsError::MissingField { field: "username" });
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(SavingsError::FieldTooLong {
                field: "username",
                max: MAX_USERNAME_LEN,
            });
        }
        let required = self.config.registration_fee;
        if fee_paid < required {
            warn!(%caller, fee_paid, required, "registration rejected: fee too low");
            return Err(SavingsError::InsufficientFee {
                paid: fee_paid,
                required,
            });
        }

        let now = self.ctx.now();
        let profile = UserProfile::new(caller.clone(), username.to_string(), now);
        self.ctx.profiles.insert_with(profile, |profile| {
            self.treasury.ensure_room(fee_paid)?;
            if fee_paid > 0 {
                self.ctx
                    .token
                    .transfer_from(&profile.address, self.treasury.account(), fee_paid)?;
            }
            self.treasury.credit(fee_paid)?;
            self.ctx.stats.update(|s| s.total_users += 1);
            self.ctx.events.append(
                now,
                vec![SavingsEvent::UserRegistered {
                    address: profile.address.clone(),
                    username: profile.username.clone(),
                }],
            );
            Ok(())
        })?;
        info!(%caller, username, fee_paid, "user registered");
        Ok(())
    }

    fn ensure_registered(&self, caller: &Address) -> Result<()> {
        if self.ctx.profiles.is_registered(caller) {
            Ok(())
        } else {
            Err(SavingsError::NotRegistered(caller.clone()))
        }
    }

    pub fn create_savings_goal(
        &self,
        caller: &Address,
        target_amount: Amount,
        lock_duration: u64,
    ) -> Result<GoalId> {
        self.ensure_registered(caller)?;
        self.goals.create_goal(caller, target_amount, lock_duration)
    }

    pub fn deposit_to_goal(
        &self,
        caller: &Address,
        amount: Amount,
        allow_over_target: bool,
    ) -> Result<DepositReceipt> {
        self.ensure_registered(caller)?;
        self.goals.deposit(caller, amount, allow_over_target)
    }

    pub fn deposit_to_goal_id(
        &self,
        caller: &Address,
        goal_id: GoalId,
        amount: Amount,
        allow_over_target: bool,
    ) -> Result<DepositReceipt> {
        self.ensure_registered(caller)?;
        self.goals
            .deposit_to(caller, goal_id, amount, allow_over_target)
    }

    pub fn create_group_pool(&self, caller: &Address, params: NewPool) -> Result<PoolId> {
        self.ensure_registered(caller)?;
        self.pools.create_pool(caller, params)
    }

    pub fn join_group_pool(
        &self,
        caller: &Address,
        pool_id: PoolId,
        request: JoinRequest,
    ) -> Result<JoinReceipt> {
        self.ensure_registered(caller)?;
        self.pools.join_pool(pool_id, caller, request)
    }

    /// Run a command. Keys are scoped to the caller. A key that already
    /// succeeded with the same command returns the stored outcome without
    /// touching any ledger; reusing it for another command is rejected.
    /// Failed requests are forgotten so they can be retried under the same
    /// key.
    pub fn execute(&self, request: Request) -> Result<Outcome> {
        let Request {
            id,
            caller,
            command,
        } = request;
        let Some(id) = id else {
            return self.dispatch(&caller, command);
        };
        let key = (caller, id);
        {
            let mut requests = self.requests.lock();
            match requests.states.get(&key) {
                Some(RequestState::Done {
                    command: recorded,
                    outcome,
                }) => {
                    if recorded != &command {
                        warn!(
                            caller = %key.0,
                            request = %key.1,
                            "request key reused for a different command"
                        );
                        return Err(SavingsError::RequestKeyReused(key.1));
                    }
                    info!(
                        caller = %key.0,
                        request = %key.1,
                        "replayed request, returning recorded outcome"
                    );
                    return Ok(outcome.clone());
                }
                Some(RequestState::InFlight) => {
                    return Err(SavingsError::RequestInFlight(key.1));
                }
                None => {
                    requests.states.insert(key.clone(), RequestState::InFlight);
                }
            }
        }
        let result = self.dispatch(&key.0, command.clone());
        let mut requests = self.requests.lock();
        match &result {
            Ok(outcome) => requests.complete(key, command, outcome.clone()),
            Err(_) => {
                requests.states.remove(&key);
            }
        }
        result
    }

    /// Completed idempotency keys currently retained.
    pub fn recorded_requests(&self) -> usize {
        self.requests.lock().len()
    }

    fn dispatch(&self, caller: &Address, command: Command) -> Result<Outcome> {
        match command {
            Command::Register { username, fee_paid } => self
                .register_user(caller, &username, fee_paid)
                .map(|()| Outcome::Registered),
            Command::CreateGoal {
                target_amount,
                lock_duration,
            } => self
                .create_savings_goal(caller, target_amount, lock_duration)
                .map(|goal_id| Outcome::GoalCreated { goal_id }),
            Command::Deposit {
                goal_id: None,
                amount,
                allow_over_target,
            } => self
                .deposit_to_goal(caller, amount, allow_over_target)
                .map(Outcome::Deposited),
            Command::Deposit {
                goal_id: Some(goal_id),
                amount,
                allow_over_target,
            } => self
                .deposit_to_goal_id(caller, goal_id, amount, allow_over_target)
                .map(Outcome::Deposited),
            Command::CreatePool(params) => self
                .create_group_pool(caller, params)
                .map(|pool_id| Outcome::PoolCreated { pool_id }),
            Command::JoinPool { pool_id, request } => self
                .join_group_pool(caller, pool_id, request)
                .map(Outcome::Joined),
        }
    }

    pub fn get_user_profile(&self, address: &Address) -> Result<UserProfile> {
        self.ctx
            .profiles
            .get(address)
            .ok_or_else(|| SavingsError::ProfileNotFound(address.clone()))
    }

    pub fn get_user_badges(&self, address: &Address) -> Result<BTreeSet<Badge>> {
        self.get_user_profile(address).map(|p| p.badges)
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.ctx.profiles.is_registered(address)
    }

    pub fn user_count(&self) -> usize {
        self.ctx.profiles.len()
    }

    pub fn get_goal(&self, owner: &Address) -> Result<SavingsGoal> {
        self.goals.get_goal(owner)
    }

    pub fn get_pool(&self, pool_id: PoolId) -> Result<GroupPool> {
        self.pools.get_pool(pool_id)
    }

    pub fn get_stats(&self) -> Stats {
        self.ctx.stats.snapshot()
    }

    pub fn treasury_balance(&self) -> Amount {
        self.treasury.balance()
    }

    pub fn events(&self) -> &EventLog {
        &self.ctx.events
    }

    pub fn events_since(&self, seq: u64) -> Vec<EventRecord> {
        self.ctx.events.since(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::types::tokens;
    use crate::ErrorKind;

    #[test]
    fn registration_pays_treasury_and_creates_profile() {
        let h = Harness::new();
        let alice = Address::from("alice");
        h.token.mint(&alice, tokens(1)).unwrap();
        h.token.approve(&alice, tokens(1));
        let fee = h.registry.registration_fee();

        h.registry.register_user(&alice, "alice", fee).unwrap();
        let profile = h.registry.get_user_profile(&alice).unwrap();
        assert!(profile.is_registered);
        assert_eq!(profile.username, "alice");
        assert_eq!(h.registry.treasury_balance(), fee);
        assert_eq!(h.token.balance_of(h.registry.treasury().account()), fee);
        assert_eq!(h.registry.get_stats().total_users, 1);
        assert_eq!(
            h.registry.events().snapshot()[0].event,
            SavingsEvent::UserRegistered {
                address: alice.clone(),
                username: "alice".into(),
            }
        );
    }

    #[test]
    fn second_registration_fails_and_keeps_profile() {
        let h = Harness::new();
        let alice = h.user("alice");
        h.registry
            .create_group_pool(
                &alice,
                NewPool {
                    name: "p".into(),
                    description: String::new(),
                    target_amount: 10,
                    max_members: 2,
                    lock_duration: 0,
                },
            )
            .unwrap();
        let before = h.registry.get_user_profile(&alice).unwrap();
        let treasury = h.registry.treasury_balance();

        let err = h
            .registry
            .register_user(&alice, "mallory", h.registry.registration_fee())
            .unwrap_err();
        assert_eq!(err, SavingsError::AlreadyRegistered(alice.clone()));
        assert_eq!(h.registry.get_user_profile(&alice).unwrap(), before);
        assert_eq!(h.registry.treasury_balance(), treasury);
    }

    #[test]
    fn underpaid_or_unfunded_registration_leaves_no_profile() {
        let h = Harness::new();
        let bob = Address::from("bob");
        let fee = h.registry.registration_fee();
        let err = h.registry.register_user(&bob, "bob", fee - 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        // Fee is high enough but bob never approved the engine.
        let err = h.registry.register_user(&bob, "bob", fee).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(!h.registry.is_registered(&bob));
        assert_eq!(h.registry.get_stats().total_users, 0);
        assert!(h.registry.events().is_empty());
    }

    #[test]
    fn usernames_are_validated() {
        let h = Harness::new();
        let fee = h.registry.registration_fee();
        assert_eq!(
            h.registry.register_user(&"x".into(), "   ", fee).unwrap_err(),
            SavingsError::MissingField { field: "username" }
        );
        let long = "n".repeat(33);
        assert!(matches!(
            h.registry.register_user(&"x".into(), &long, fee).unwrap_err(),
            SavingsError::FieldTooLong { .. }
        ));
    }

    #[test]
    fn unregistered_callers_are_turned_away() {
        let h = Harness::new();
        let ghost = Address::from("ghost");
        assert_eq!(
            h.registry.create_savings_goal(&ghost, 10, 0).unwrap_err(),
            SavingsError::NotRegistered(ghost.clone())
        );
        assert_eq!(
            h.registry.deposit_to_goal(&ghost, 10, false).unwrap_err().kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            h.registry
                .join_group_pool(&ghost, PoolId(1), JoinRequest::default())
                .unwrap_err()
                .kind(),
            ErrorKind::Authorization
        );
        assert!(matches!(
            h.registry.get_user_profile(&ghost).unwrap_err(),
            SavingsError::ProfileNotFound(_)
        ));
    }

    #[test]
    fn replayed_request_returns_recorded_outcome() {
        let h = Harness::new();
        let alice = h.user("alice");
        h.registry.create_savings_goal(&alice, tokens(10), 0).unwrap();
        let request = Request {
            id: Some("dep-1".into()),
            caller: alice.clone(),
            command: Command::Deposit {
                goal_id: None,
                amount: tokens(3),
                allow_over_target: false,
            },
        };
        let first = h.registry.execute(request.clone()).unwrap();
        let balance = h.token.balance_of(&alice);
        let again = h.registry.execute(request).unwrap();
        assert_eq!(first, again);
        assert_eq!(h.token.balance_of(&alice), balance);
        assert_eq!(h.registry.get_goal(&alice).unwrap().current_amount, tokens(3));
    }

    #[test]
    fn failed_request_can_be_retried_under_same_id() {
        let h = Harness::new();
        let alice = h.user("alice");
        let request = Request {
            id: Some("goal-1".into()),
            caller: alice.clone(),
            command: Command::Deposit {
                goal_id: None,
                amount: tokens(1),
                allow_over_target: false,
            },
        };
        assert!(h.registry.execute(request.clone()).is_err());
        h.registry.create_savings_goal(&alice, tokens(10), 0).unwrap();
        let outcome = h.registry.execute(request).unwrap();
        assert!(matches!(outcome, Outcome::Deposited(_)));
    }

    #[test]
    fn request_keys_are_scoped_to_caller_and_command() {
        let h = Harness::new();
        let alice = h.user("alice");
        let bob = h.user("bob");
        h.registry.create_savings_goal(&alice, tokens(10), 0).unwrap();
        let pool = h
            .registry
            .create_group_pool(
                &alice,
                NewPool {
                    name: "p".into(),
                    description: String::new(),
                    target_amount: tokens(50),
                    max_members: 3,
                    lock_duration: 0,
                },
            )
            .unwrap();
        let deposit = Command::Deposit {
            goal_id: None,
            amount: tokens(3),
            allow_over_target: false,
        };
        let join = Command::JoinPool {
            pool_id: pool,
            request: JoinRequest {
                contribution_amount: tokens(5),
                ..JoinRequest::default()
            },
        };
        h.registry
            .execute(Request {
                id: Some("k1".into()),
                caller: alice.clone(),
                command: deposit,
            })
            .unwrap();

        // Same key, different caller: runs on its own.
        let outcome = h
            .registry
            .execute(Request {
                id: Some("k1".into()),
                caller: bob.clone(),
                command: join.clone(),
            })
            .unwrap();
        assert!(matches!(outcome, Outcome::Joined(_)));
        assert_eq!(h.registry.get_pool(pool).unwrap().current_members, 1);

        // Same caller and key, different command: rejected, nothing moves.
        let balance = h.token.balance_of(&alice);
        let err = h
            .registry
            .execute(Request {
                id: Some("k1".into()),
                caller: alice.clone(),
                command: join,
            })
            .unwrap_err();
        assert_eq!(err, SavingsError::RequestKeyReused("k1".into()));
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(h.token.balance_of(&alice), balance);
        assert_eq!(h.registry.get_pool(pool).unwrap().current_members, 1);
    }

    #[test]
    fn request_log_drops_oldest_key_past_capacity() {
        let h = Harness::with_config(EngineConfig {
            request_log_capacity: 2,
            ..EngineConfig::default()
        });
        let alice = h.user("alice");
        h.registry.create_savings_goal(&alice, tokens(10), 0).unwrap();
        let deposit = |id: &str| Request {
            id: Some(id.into()),
            caller: alice.clone(),
            command: Command::Deposit {
                goal_id: None,
                amount: tokens(1),
                allow_over_target: false,
            },
        };
        for id in ["a", "b", "c"] {
            h.registry.execute(deposit(id)).unwrap();
        }
        assert_eq!(h.registry.recorded_requests(), 2);

        // "c" is still recorded, "a" was evicted and runs again.
        h.registry.execute(deposit("c")).unwrap();
        assert_eq!(h.registry.get_goal(&alice).unwrap().current_amount, tokens(3));
        h.registry.execute(deposit("a")).unwrap();
        assert_eq!(h.registry.get_goal(&alice).unwrap().current_amount, tokens(4));
        assert_eq!(h.registry.recorded_requests(), 2);
    }

    #[test]
    fn stats_reads_are_stable_without_writes() {
        let h = Harness::new();
        let alice = h.user("alice");
        h.registry.create_savings_goal(&alice, tokens(10), 0).unwrap();
        h.registry.deposit_to_goal(&alice, tokens(2), false).unwrap();
        let first = h.registry.get_stats();
        assert_eq!(first, h.registry.get_stats());
        assert_eq!(first.total_volume, tokens(2));
        assert_eq!(first.total_goals, 1);
        assert_eq!(first.total_yield, 0);
    }
}
