// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Node
//!
//! Entry point for the `custody-node` binary. Parses CLI arguments,
//! initializes logging and metrics, hosts a vault ledger over the in-memory
//! gateway, and serves the HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`      — start the node
//! - `simulate` — replay a JSON scenario and print the report
//! - `version`  — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod persist;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use custody_contracts::VaultLedger;
use custody_protocol::config::LEDGER_VERSION;
use custody_protocol::InMemoryGateway;

use cli::{Commands, CustodyNodeCli};
use metrics::NodeMetrics;
use persist::NodeSnapshot;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CustodyNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Simulate(args) => run_simulation(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: API server and metrics endpoint. Persists the snapshot
/// on shutdown when one is configured.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::RUN_FILTER, args.log_format)?;

    let (gateway, ledger) = open_ledger(&args)?;
    let ledger = Arc::new(ledger);

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        owner = %ledger.owner(),
        authorization = %ledger.config().authorization,
        "starting custody-node"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics
        .last_event_seq
        .set(ledger.last_event_seq() as i64);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (ledger {})",
            env!("CARGO_PKG_VERSION"),
            LEDGER_VERSION,
        ),
        ledger: Arc::clone(&ledger),
        gateway: Arc::clone(&gateway),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(path) = &args.snapshot {
        let snapshot = NodeSnapshot::capture(&ledger, &gateway)?;
        persist::save(path, &snapshot)?;
        tracing::info!(path = %path.display(), "snapshot written");
    }

    tracing::info!("custody-node stopped");
    Ok(())
}

/// Restores the ledger from the snapshot file if there is one, otherwise
/// builds an empty ledger from the resolved configuration.
fn open_ledger(args: &cli::RunArgs) -> Result<(Arc<InMemoryGateway>, VaultLedger)> {
    if let Some(path) = &args.snapshot {
        if let Some(snapshot) = persist::load(path)? {
            let (gateway, ledger) = snapshot.restore()?;
            tracing::info!(
                path = %path.display(),
                events = ledger.last_event_seq(),
                "ledger restored from snapshot"
            );
            warn_on_config_drift(args, &ledger);
            return Ok((gateway, ledger));
        }
        tracing::info!(path = %path.display(), "no snapshot yet, starting empty");
    }

    let config = args.ledger_config()?;
    let gateway = Arc::new(InMemoryGateway::new(config.custody_account));
    let ledger = VaultLedger::new(config, gateway.clone());
    Ok((gateway, ledger))
}

/// The owner is fixed at construction, so a restored ledger keeps the one
/// it was built with. Warns about command-line overrides that disagree.
fn warn_on_config_drift(args: &cli::RunArgs, ledger: &VaultLedger) {
    if let Some(owner) = args.owner {
        if owner != ledger.owner() {
            tracing::warn!(
                requested = %owner,
                restored = %ledger.owner(),
                "--owner ignored: snapshot keeps its original owner"
            );
        }
    }
    if let Some(policy) = args.auth_policy {
        if policy != ledger.config().authorization {
            tracing::warn!(
                requested = %policy,
                restored = %ledger.config().authorization,
                "--auth-policy ignored: snapshot keeps its original policy"
            );
        }
    }
    if let Some(retention) = args.event_retention {
        if retention != ledger.config().event_retention {
            tracing::warn!(
                requested = retention,
                restored = ledger.config().event_retention,
                "--event-retention ignored: snapshot keeps its original retention"
            );
        }
    }
}

/// Replays a scenario file and prints the report as JSON on stdout.
fn run_simulation(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(logging::SIMULATE_FILTER, args.log_format)?;

    let scenario = read_scenario(&args.file)?;
    let report = simulate::run_scenario(scenario).context("invalid scenario config")?;
    let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
    println!("{}", json);
    Ok(())
}

fn read_scenario(path: &Path) -> Result<simulate::Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid scenario {}", path.display()))
}

/// Prints version information to stdout.
fn print_version() {
    println!("custody-node {}", env!("CARGO_PKG_VERSION"));
    println!("ledger       {}", LEDGER_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
