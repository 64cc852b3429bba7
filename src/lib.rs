//! Command-line front end for the SavePool engine: scripted scenario runs,
//! state digests and a concurrent workload simulator.

use std::fs;
use std::path::Path;

use anyhow::Context;
use savepool_core::config::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod ledger;
pub mod scenario;

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Read an engine configuration from JSON, or fall back to the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let bytes = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(config)
}
