//! Scripted runs: seed balances, replay a list of requests against a fresh
//! registry and check each step against the error kind it was expected to
//! produce.
//!
//! ```json
//! {
//!   "accounts": [{ "address": "alice", "balance": "100" }],
//!   "steps": [
//!     { "caller": "alice", "op": "register", "username": "alice" },
//!     { "caller": "alice", "op": "create_goal", "target": "10", "lock_duration": 2592000 },
//!     { "id": "d1", "caller": "alice", "op": "deposit", "amount": "15", "expect": "over_target" }
//!   ]
//! }
//! ```

use std::sync::Arc;

use savepool_core::clock::{Clock, ManualClock};
use savepool_core::config::EngineConfig;
use savepool_core::events::EventRecord;
use savepool_core::invariants::{audit, Violation};
use savepool_core::pools::{JoinRequest, NewPool};
use savepool_core::stats::Stats;
use savepool_core::token::{MemoryTokenLedger, TokenError};
use savepool_core::{
    Address, Amount, Command, ErrorKind, GoalId, Outcome, PoolId, Registry, Request, RequestId,
    SavingsError, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::LedgerSnapshot;

pub const DEFAULT_START_TIME: Timestamp = 1_700_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("invalid engine configuration: {0}")]
    Config(#[source] SavingsError),
    #[error("could not fund {address}: {source}")]
    Funding {
        address: Address,
        #[source]
        source: TokenError,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(default = "default_start_time")]
    pub start_time: Timestamp,
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
    pub steps: Vec<Step>,
}

fn default_start_time() -> Timestamp {
    DEFAULT_START_TIME
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountSeed {
    pub address: Address,
    #[serde(with = "serde_units")]
    pub balance: Amount,
    /// Allowance granted to the engine; unlimited when omitted.
    #[serde(default, with = "serde_units::option")]
    pub allowance: Option<Amount>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: Option<RequestId>,
    pub caller: Address,
    /// Seconds to move the clock forward before the step runs.
    #[serde(default)]
    pub advance: u64,
    #[serde(flatten)]
    pub op: StepOp,
    #[serde(default)]
    pub expect: Option<ErrorKind>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepOp {
    Register {
        username: String,
        /// Defaults to the configured registration fee.
        #[serde(default, with = "serde_units::option")]
        fee: Option<Amount>,
    },
    CreateGoal {
        #[serde(with = "serde_units")]
        target: Amount,
        #[serde(default)]
        lock_duration: u64,
    },
    Deposit {
        #[serde(default)]
        goal_id: Option<u64>,
        #[serde(with = "serde_units")]
        amount: Amount,
        #[serde(default)]
        allow_over_target: bool,
    },
    CreatePool {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(with = "serde_units")]
        target: Amount,
        max_members: u32,
        #[serde(default)]
        lock_duration: u64,
    },
    JoinPool {
        pool_id: u64,
        #[serde(with = "serde_units")]
        amount: Amount,
        #[serde(default)]
        allow_partial: bool,
        #[serde(default)]
        referrer: Option<Address>,
    },
}

impl StepOp {
    pub fn name(&self) -> &'static str {
        match self {
            StepOp::Register { .. } => "register",
            StepOp::CreateGoal { .. } => "create_goal",
            StepOp::Deposit { .. } => "deposit",
            StepOp::CreatePool { .. } => "create_pool",
            StepOp::JoinPool { .. } => "join_pool",
        }
    }

    fn into_command(self, registration_fee: Amount) -> Command {
        match self {
            StepOp::Register { username, fee } => Command::Register {
                username,
                fee_paid: fee.unwrap_or(registration_fee),
            },
            StepOp::CreateGoal {
                target,
                lock_duration,
            } => Command::CreateGoal {
                target_amount: target,
                lock_duration,
            },
            StepOp::Deposit {
                goal_id,
                amount,
                allow_over_target,
            } => Command::Deposit {
                goal_id: goal_id.map(GoalId),
                amount,
                allow_over_target,
            },
            StepOp::CreatePool {
                name,
                description,
                target,
                max_members,
                lock_duration,
            } => Command::CreatePool(NewPool {
                name,
                description,
                target_amount: target,
                max_members,
                lock_duration,
            }),
            StepOp::JoinPool {
                pool_id,
                amount,
                allow_partial,
                referrer,
            } => Command::JoinPool {
                pool_id: PoolId(pool_id),
                request: JoinRequest {
                    contribution_amount: amount,
                    allow_partial,
                    referrer,
                },
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Ok { outcome: Outcome },
    Err { kind: ErrorKind, message: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub caller: Address,
    pub op: &'static str,
    #[serde(flatten)]
    pub result: StepResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<ErrorKind>,
    pub matched: bool,
}

pub struct ScenarioRun {
    pub reports: Vec<StepReport>,
    pub events: Vec<EventRecord>,
    pub stats: Stats,
    pub snapshot: LedgerSnapshot,
    pub violations: Vec<Violation>,
}

impl ScenarioRun {
    pub fn mismatches(&self) -> usize {
        self.reports.iter().filter(|r| !r.matched).count()
    }

    pub fn passed(&self) -> bool {
        self.mismatches() == 0 && self.violations.is_empty()
    }
}

/// Run `scenario` against a fresh in-memory ledger. `config` takes precedence
/// over a configuration embedded in the scenario file.
pub fn run(scenario: Scenario, config: Option<EngineConfig>) -> Result<ScenarioRun, ScenarioError> {
    let config = config.or(scenario.config).unwrap_or_default();
    let token = Arc::new(MemoryTokenLedger::new(config.custody_account.clone()));
    let clock = Arc::new(ManualClock::new(scenario.start_time));
    let registry =
        Registry::new(config, token.clone(), clock.clone()).map_err(ScenarioError::Config)?;

    for seed in &scenario.accounts {
        token
            .mint(&seed.address, seed.balance)
            .map_err(|source| ScenarioError::Funding {
                address: seed.address.clone(),
                source,
            })?;
        token.approve(&seed.address, seed.allowance.unwrap_or(Amount::MAX));
    }
    debug!(accounts = scenario.accounts.len(), "seeded balances");

    let mut reports = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.into_iter().enumerate() {
        if step.advance > 0 {
            clock.advance(step.advance);
        }
        let op = step.op.name();
        let request = Request {
            id: step.id.clone(),
            caller: step.caller.clone(),
            command: step.op.into_command(registry.registration_fee()),
        };
        let result = match registry.execute(request) {
            Ok(outcome) => StepResult::Ok { outcome },
            Err(err) => StepResult::Err {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        let matched = match (&result, step.expect) {
            (StepResult::Ok { .. }, None) => true,
            (StepResult::Err { kind, .. }, Some(expected)) => *kind == expected,
            _ => false,
        };
        if !matched {
            warn!(index, op, caller = %step.caller, "step did not match expectation");
        }
        reports.push(StepReport {
            index,
            id: step.id,
            caller: step.caller,
            op,
            result,
            expected: step.expect,
            matched,
        });
    }

    let violations = audit(&registry);
    let snapshot = LedgerSnapshot::capture(&registry, &token, clock.now());
    info!(
        steps = reports.len(),
        violations = violations.len(),
        root = %snapshot.state_root_hex(),
        "scenario finished"
    );
    Ok(ScenarioRun {
        events: registry.events().snapshot(),
        stats: registry.get_stats(),
        reports,
        snapshot,
        violations,
    })
}

/// Token amounts as decimal strings ("20", "0.2").
mod serde_units {
    use savepool_core::types::parse_units;
    use savepool_core::Amount;
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_units(&text).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Amount>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|text| parse_units(&text).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use savepool_core::events::SavingsEvent;
    use savepool_core::types::{tokens, UNIT};

    use super::*;

    fn parse(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    const POOL_SCENARIO: &str = r#"{
        "accounts": [
            { "address": "creator", "balance": "100" },
            { "address": "user1", "balance": "100" },
            { "address": "user2", "balance": "100" },
            { "address": "user3", "balance": "100" }
        ],
        "steps": [
            { "caller": "creator", "op": "register", "username": "creator" },
            { "caller": "user1", "op": "register", "username": "user1" },
            { "caller": "user2", "op": "register", "username": "user2" },
            { "caller": "user3", "op": "register", "username": "user3" },
            { "caller": "creator", "op": "create_pool", "name": "Trip", "target": "100", "max_members": 5 },
            { "caller": "user1", "op": "join_pool", "pool_id": 1, "amount": "20" },
            { "caller": "user2", "op": "join_pool", "pool_id": 1, "amount": "20" },
            { "caller": "user2", "op": "join_pool", "pool_id": 1, "amount": "20", "referrer": "user1", "expect": "duplicate" },
            { "id": "j3", "caller": "user3", "op": "join_pool", "pool_id": 1, "amount": "20", "referrer": "user1" },
            { "id": "j3", "caller": "user3", "op": "join_pool", "pool_id": 1, "amount": "20", "referrer": "user1" }
        ]
    }"#;

    #[test]
    fn pool_scenario_runs_clean() {
        let run = run(parse(POOL_SCENARIO), None).unwrap();
        assert!(run.passed(), "{:?}", run.reports);
        let pool = &run.snapshot.pools[0];
        assert_eq!(pool.current_members, 3);
        assert_eq!(pool.current_amount, tokens(60) - UNIT / 5);
        assert_eq!(run.stats.referral_payouts, UNIT / 5);

        // The replayed "j3" request pays the bonus once.
        let bonuses = run
            .events
            .iter()
            .filter(|r| matches!(r.event, SavingsEvent::ReferralBonusPaid { .. }))
            .count();
        assert_eq!(bonuses, 1);
        assert!(matches!(
            run.reports[9].result,
            StepResult::Ok {
                outcome: Outcome::Joined(_)
            }
        ));
    }

    #[test]
    fn unexpected_outcomes_are_reported() {
        let scenario = parse(
            r#"{
                "accounts": [{ "address": "alice", "balance": "1" }],
                "steps": [
                    { "caller": "alice", "op": "register", "username": "alice" },
                    { "caller": "alice", "op": "create_goal", "target": "10" },
                    { "caller": "alice", "op": "deposit", "amount": "0.5", "expect": "over_target" },
                    { "caller": "alice", "op": "deposit", "amount": "50" }
                ]
            }"#,
        );
        let run = run(scenario, None).unwrap();
        assert_eq!(run.mismatches(), 2);
        assert!(!run.passed());
        assert!(!run.reports[2].matched);
        match &run.reports[3].result {
            StepResult::Err { kind, .. } => assert_eq!(*kind, ErrorKind::OverTarget),
            other => panic!("unexpected {other:?}"),
        }
        assert!(run.violations.is_empty());
    }

    #[test]
    fn cli_config_overrides_scenario_config() {
        let scenario = parse(
            r#"{
                "config": { "registration_fee": 5 },
                "accounts": [{ "address": "alice", "balance": "1", "allowance": "0.5" }],
                "steps": [
                    { "caller": "alice", "op": "register", "username": "alice", "fee": "0.000000000000000004", "expect": "authorization" }
                ]
            }"#,
        );
        let run_embedded = run(scenario.clone(), None).unwrap();
        assert!(run_embedded.passed());

        let free = EngineConfig {
            registration_fee: 0,
            ..EngineConfig::default()
        };
        let run_override = run(scenario, Some(free)).unwrap();
        assert_eq!(run_override.mismatches(), 1);
        assert_eq!(run_override.stats.total_users, 1);
    }

    #[test]
    fn clock_advances_between_steps() {
        let scenario = parse(
            r#"{
                "start_time": 100,
                "accounts": [{ "address": "alice", "balance": "10" }],
                "steps": [
                    { "caller": "alice", "op": "register", "username": "alice" },
                    { "caller": "alice", "op": "create_goal", "target": "1", "lock_duration": 50, "advance": 25 }
                ]
            }"#,
        );
        let run = run(scenario, None).unwrap();
        let goal = &run.snapshot.goals[0];
        assert_eq!(goal.created_at, 125);
        assert_eq!(goal.unlocks_at, 175);
        assert_eq!(run.snapshot.meta.timestamp, 125);
    }

    #[test]
    fn bundled_scenario_passes() {
        let run = run(parse(include_str!("../../scenarios/pool-referral.json")), None).unwrap();
        assert!(run.passed(), "{:?}", run.reports);
        let pool = &run.snapshot.pools[0];
        assert!(!pool.is_active);
        assert_eq!(pool.current_amount, pool.target_amount);
        assert_eq!(pool.current_members, 4);
        assert_eq!(run.snapshot.goals.len(), 2);
        assert_eq!(run.stats.total_users, 5);
    }

    #[test]
    fn malformed_amounts_fail_to_parse() {
        let err = serde_json::from_str::<Scenario>(
            r#"{ "steps": [{ "caller": "a", "op": "deposit", "amount": "1.x" }] }"#,
        );
        assert!(err.is_err());
    }
}
