use std::{collections::BTreeMap, path::PathBuf, process::ExitCode, sync::Arc, thread};

use anyhow::Context;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use savepool_cli::{init_tracing, ledger::LedgerSnapshot, load_config};
use savepool_core::{
    clock::{Clock, SystemClock},
    invariants::audit,
    pools::{JoinRequest, NewPool},
    token::MemoryTokenLedger,
    types::{format_units, tokens, SECONDS_PER_DAY},
    Address, Command, ErrorKind, PoolId, Registry, Request, RequestId,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// Hammer one registry from several threads and audit the result.
#[derive(Parser)]
#[command(name = "savepool-simulate", version)]
struct Args {
    #[arg(long, default_value_t = 7)]
    seed: u64,
    #[arg(long, default_value_t = 32)]
    users: usize,
    #[arg(long, default_value_t = 4)]
    pools: usize,
    /// Operations per thread
    #[arg(long, default_value_t = 500)]
    ops: usize,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Default, Serialize)]
struct Tally {
    ok: BTreeMap<&'static str, u64>,
    failed: BTreeMap<ErrorKind, u64>,
    replays: u64,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        for (op, n) in other.ok {
            *self.ok.entry(op).or_default() += n;
        }
        for (kind, n) in other.failed {
            *self.failed.entry(kind).or_default() += n;
        }
        self.replays += other.replays;
    }
}

struct World<'a> {
    registry: &'a Registry,
    users: &'a [Address],
    pools: usize,
}

impl World<'_> {
    fn random_command(&self, rng: &mut StdRng) -> Command {
        let amount = tokens(rng.gen_range(1..=60)) / 4;
        match rng.gen_range(0..10) {
            0..=3 => Command::Deposit {
                goal_id: None,
                amount,
                allow_over_target: rng.gen_bool(0.3),
            },
            4..=7 => {
                let referrer = rng
                    .gen_bool(0.5)
                    .then(|| self.users[rng.gen_range(0..self.users.len())].clone());
                Command::JoinPool {
                    pool_id: PoolId(rng.gen_range(1..=self.pools as u64 + 1)),
                    request: JoinRequest {
                        contribution_amount: amount,
                        allow_partial: rng.gen_bool(0.3),
                        referrer,
                    },
                }
            }
            8 => Command::CreateGoal {
                target_amount: tokens(rng.gen_range(5..=100)),
                lock_duration: rng.gen_range(0..=90) * SECONDS_PER_DAY,
            },
            _ => Command::Register {
                username: "again".into(),
                fee_paid: self.registry.registration_fee(),
            },
        }
    }

    fn worker(&self, worker: usize, seed: u64, ops: usize) -> Tally {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
        let mut tally = Tally::default();
        let mut last: Option<Request> = None;
        for i in 0..ops {
            // Occasionally resend the previous request under the same id.
            let request = match last.take() {
                Some(previous) if rng.gen_bool(0.05) => {
                    tally.replays += 1;
                    previous
                }
                _ => {
                    let caller = self.users[rng.gen_range(0..self.users.len())].clone();
                    Request {
                        id: Some(RequestId::from(format!("w{worker}-{i}").as_str())),
                        caller,
                        command: self.random_command(&mut rng),
                    }
                }
            };
            let op = op_name(&request.command);
            match self.registry.execute(request.clone()) {
                Ok(_) => *tally.ok.entry(op).or_default() += 1,
                Err(err) => {
                    debug!(worker, op, %err, "operation rejected");
                    *tally.failed.entry(err.kind()).or_default() += 1;
                }
            }
            last = Some(request);
        }
        tally
    }
}

fn op_name(command: &Command) -> &'static str {
    match command {
        Command::Register { .. } => "register",
        Command::CreateGoal { .. } => "create_goal",
        Command::Deposit { .. } => "deposit",
        Command::CreatePool(_) => "create_pool",
        Command::JoinPool { .. } => "join_pool",
    }
}

fn setup(args: &Args, registry: &Registry, token: &MemoryTokenLedger) -> anyhow::Result<Vec<Address>> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let users: Vec<Address> = (0..args.users)
        .map(|i| Address::new(format!("user{i:03}")))
        .collect();
    for user in &users {
        token
            .mint(user, tokens(1_000))
            .with_context(|| format!("funding {user}"))?;
        token.approve(user, u128::MAX);
        registry
            .register_user(user, user.as_str(), registry.registration_fee())
            .with_context(|| format!("registering {user}"))?;
        registry
            .create_savings_goal(user, tokens(rng.gen_range(10..=200)), 30 * SECONDS_PER_DAY)
            .with_context(|| format!("goal for {user}"))?;
    }
    for (i, creator) in users.iter().cycle().take(args.pools).enumerate() {
        registry
            .create_group_pool(
                creator,
                NewPool {
                    name: format!("pool {i}"),
                    description: String::new(),
                    target_amount: tokens(rng.gen_range(50..=500)),
                    max_members: rng.gen_range(2..=12),
                    lock_duration: 0,
                },
            )
            .with_context(|| format!("pool {i}"))?;
    }
    Ok(users)
}

#[derive(Serialize)]
struct Report<'a> {
    seed: u64,
    threads: usize,
    operations: usize,
    tally: &'a Tally,
    stats: savepool_core::stats::Stats,
    treasury: String,
    state_root: String,
    violations: Vec<savepool_core::invariants::Violation>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);
    anyhow::ensure!(args.users > 0, "--users must be at least 1");
    anyhow::ensure!(args.threads > 0, "--threads must be at least 1");

    let config = load_config(args.config.as_deref())?;
    let token = Arc::new(MemoryTokenLedger::new(config.custody_account.clone()));
    let registry = Registry::new(config, token.clone(), Arc::new(SystemClock))
        .context("building registry")?;
    let users = setup(&args, &registry, &token)?;
    info!(users = users.len(), pools = args.pools, threads = args.threads, "simulation starting");

    let world = World {
        registry: &registry,
        users: &users,
        pools: args.pools,
    };
    let mut tally = Tally::default();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..args.threads)
            .map(|w| {
                let world = &world;
                scope.spawn(move || world.worker(w, args.seed, args.ops))
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(part) => tally.merge(part),
                Err(_) => error!("worker panicked"),
            }
        }
    });

    let violations = audit(&registry);
    let snapshot = LedgerSnapshot::capture(&registry, &token, SystemClock.now());
    let report = Report {
        seed: args.seed,
        threads: args.threads,
        operations: args.threads * args.ops,
        tally: &tally,
        stats: registry.get_stats(),
        treasury: format_units(snapshot.treasury),
        state_root: snapshot.state_root_hex(),
        violations,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.violations.is_empty() {
        info!(root = %report.state_root, "simulation finished clean");
        Ok(ExitCode::SUCCESS)
    } else {
        for violation in &report.violations {
            error!(%violation, "invariant violated");
        }
        Ok(ExitCode::FAILURE)
    }
}
