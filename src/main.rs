use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use savepool_cli::{
    init_tracing, load_config,
    scenario::{self, Scenario, ScenarioRun},
};
use savepool_core::events::EventRecord;
use savepool_core::invariants::Violation;
use savepool_core::stats::Stats;
use savepool_core::Amount;
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "savepool")]
#[command(about = "Run scripted scenarios against the SavePool ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file and print one JSON report per step
    Run {
        scenario: PathBuf,
        /// Write the committed event log as JSON lines
        #[arg(long)]
        events: Option<PathBuf>,
        /// Engine configuration, overriding the scenario's own
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the final ledger snapshot as JSON
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Print the effective engine configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            scenario,
            events,
            config,
            snapshot,
        } => run_cmd(&scenario, events.as_deref(), config.as_deref(), snapshot.as_deref()),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_cmd(
    path: &Path,
    events_out: Option<&Path>,
    config_path: Option<&Path>,
    snapshot_out: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let bytes = fs::read(path).with_context(|| format!("reading scenario {}", path.display()))?;
    let parsed: Scenario = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    let config = match config_path {
        Some(p) => Some(load_config(Some(p))?),
        None => None,
    };
    info!(scenario = %path.display(), steps = parsed.steps.len(), "running scenario");
    let run = scenario::run(parsed, config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for report in &run.reports {
        serde_json::to_writer(&mut out, report)?;
        writeln!(out)?;
    }
    print_summary(&mut out, &run)?;

    if let Some(p) = events_out {
        write_events(p, &run.events)?;
    }
    if let Some(p) = snapshot_out {
        write_file(p, &serde_json::to_vec_pretty(&run.snapshot)?)?;
    }

    if run.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        for violation in &run.violations {
            error!(%violation, "invariant violated");
        }
        error!(mismatches = run.mismatches(), "scenario failed");
        Ok(ExitCode::FAILURE)
    }
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: Summary<'a>,
}

#[derive(Serialize)]
struct Summary<'a> {
    steps: usize,
    mismatches: usize,
    events: usize,
    stats: &'a Stats,
    treasury: Amount,
    state_root: String,
    violations: &'a [Violation],
}

fn print_summary(out: &mut impl Write, run: &ScenarioRun) -> anyhow::Result<()> {
    let summary = Summary {
        steps: run.reports.len(),
        mismatches: run.mismatches(),
        events: run.events.len(),
        stats: &run.stats,
        treasury: run.snapshot.treasury,
        state_root: run.snapshot.state_root_hex(),
        violations: &run.violations,
    };
    serde_json::to_writer(&mut *out, &SummaryLine { summary })?;
    writeln!(out)?;
    Ok(())
}

fn write_events(path: &Path, events: &[EventRecord]) -> anyhow::Result<()> {
    ensure_parent(path)?;
    let file =
        fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in events {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    info!(path = %path.display(), events = events.len(), "event log written");
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    ensure_parent(path)?;
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    Ok(())
}
