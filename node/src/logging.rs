//! # Logging
//!
//! `tracing` subscriber setup for `custody-node`. Output goes to stderr;
//! stdout is reserved for the `simulate` report.
//!
//! Targets worth filtering on:
//!
//! - `custody_contracts::vault` — deposits, withdrawals, recoveries,
//!   rejected calls, payout rollbacks (`info`/`warn`/`error`)
//! - `custody_protocol::gateway::memory` — transfers the in-memory gateway
//!   refuses (`trace`)
//! - `custody_node` — startup, snapshot load/save, shutdown
//! - `tower_http` — request spans from the API's trace layer
//!
//! `RUST_LOG` replaces the subcommand's default filter entirely.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for `custody-node run`.
pub const RUN_FILTER: &str = "custody_node=info,custody_contracts=info,tower_http=debug";

/// Default filter for `custody-node simulate`. Rejected steps are already in
/// the report, so only problems are logged.
pub const SIMULATE_FILTER: &str = "warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, with source locations.
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(default_filter);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init(),
    }
    .context("failed to install tracing subscriber")?;

    tracing::debug!(?format, filter = default_filter, "logging initialized");
    Ok(())
}
