//! # CLI Interface
//!
//! Defines the command-line argument structure for `custody-node` using
//! `clap` derive. Supports three subcommands: `run`, `simulate`, and
//! `version`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use custody_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEVNET_CUSTODY_ACCOUNT};
use custody_protocol::{Address, AuthorizationPolicy, LedgerConfig};

use crate::logging::LogFormat;

/// Custody ledger node.
///
/// Hosts a vault ledger over an in-memory transfer gateway, serves the
/// HTTP API, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "custody-node",
    about = "Custodial vault ledger node",
    version,
    propagate_version = true
)]
pub struct CustodyNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the custody node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Replay a JSON scenario against a fresh ledger and print the outcome.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a JSON ledger configuration file.
    ///
    /// Fields given on the command line override the file.
    #[arg(long, short = 'c', env = "CUSTODY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Recovery owner address (hex).
    #[arg(long, env = "CUSTODY_OWNER")]
    pub owner: Option<Address>,

    /// How deposits treat the caller's authorization: pull-only, verify, or
    /// adjust.
    #[arg(long, env = "CUSTODY_AUTH_POLICY")]
    pub auth_policy: Option<AuthorizationPolicy>,

    /// Number of ledger notifications kept for `/events` and snapshots.
    #[arg(long, env = "CUSTODY_EVENT_RETENTION")]
    pub event_retention: Option<usize>,

    /// Port for the HTTP API.
    #[arg(long, env = "CUSTODY_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CUSTODY_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Snapshot file. Loaded on startup if present, written on shutdown.
    #[arg(long, env = "CUSTODY_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Scenario file (JSON).
    pub file: PathBuf,

    /// Log output format. Logs go to stderr, the report to stdout.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// Resolves the ledger configuration from the config file (if any) and
    /// the command-line overrides.
    pub fn ledger_config(&self) -> Result<LedgerConfig> {
        let from_file = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let cfg: LedgerConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                Some(cfg)
            }
            None => None,
        };

        let mut config = match (from_file, self.owner) {
            (Some(mut cfg), owner) => {
                if let Some(owner) = owner {
                    cfg.owner = owner;
                }
                cfg
            }
            (None, Some(owner)) => LedgerConfig::new(owner, DEVNET_CUSTODY_ACCOUNT),
            (None, None) => bail!("no ledger owner configured: pass --owner or --config"),
        };

        if let Some(policy) = self.auth_policy {
            config.authorization = policy;
        }
        if let Some(retention) = self.event_retention {
            config.event_retention = retention;
        }
        config.validate().context("invalid ledger config")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        CustodyNodeCli::command().debug_assert();
    }

    fn parse_run(args: &[&str]) -> RunArgs {
        let argv = std::iter::once("custody-node")
            .chain(std::iter::once("run"))
            .chain(args.iter().copied());
        match CustodyNodeCli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn owner_flag_builds_devnet_config() {
        let owner = Address::from_low_u8(0x01);
        let args = parse_run(&["--owner", &owner.to_hex(), "--auth-policy", "pull-only"]);

        let cfg = args.ledger_config().unwrap();
        assert_eq!(cfg.owner, owner);
        assert_eq!(cfg.custody_account, DEVNET_CUSTODY_ACCOUNT);
        assert_eq!(cfg.authorization, AuthorizationPolicy::PullOnly);
        assert_eq!(args.api_port, DEFAULT_API_PORT);
    }

    #[test]
    fn missing_owner_is_an_error() {
        let args = parse_run(&[]);
        assert!(args.ledger_config().is_err());
    }

    #[test]
    fn zero_owner_is_an_error() {
        let args = parse_run(&["--owner", &Address::ZERO.to_hex()]);
        assert!(args.ledger_config().is_err());
    }

    #[test]
    fn event_retention_override() {
        let owner = Address::from_low_u8(0x01).to_hex();
        let cfg = parse_run(&["--owner", &owner, "--event-retention", "64"])
            .ledger_config()
            .unwrap();
        assert_eq!(cfg.event_retention, 64);

        let args = parse_run(&["--owner", &owner, "--event-retention", "0"]);
        assert!(args.ledger_config().is_err());
    }

    #[test]
    fn config_file_with_overrides() {
        let file_owner = Address::from_low_u8(0x02);
        let custody = Address::from_low_u8(0xCC);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"owner":"{}","custody_account":"{}","authorization":"adjust"}}"#,
            file_owner, custody
        )
        .unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let cfg = parse_run(&["--config", &path]).ledger_config().unwrap();
        assert_eq!(cfg.owner, file_owner);
        assert_eq!(cfg.custody_account, custody);
        assert_eq!(cfg.authorization, AuthorizationPolicy::Adjust);

        let override_owner = Address::from_low_u8(0x03);
        let cfg = parse_run(&["--config", &path, "--owner", &override_owner.to_hex()])
            .ledger_config()
            .unwrap();
        assert_eq!(cfg.owner, override_owner);
        assert_eq!(cfg.custody_account, custody);
    }

    #[test]
    fn bad_address_rejected_by_parser() {
        let result = CustodyNodeCli::try_parse_from(["custody-node", "run", "--owner", "0x12"]);
        assert!(result.is_err());
    }
}
