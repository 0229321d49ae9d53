//! # Ledger Configuration & Constants
//!
//! Every magic number the custody ledger relies on lives here, next to the
//! [`LedgerConfig`] that a host hands to the ledger at construction time.
//! The owner is baked into that config and never changes afterwards, so pick
//! it carefully.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::address::Address;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Ledger software version reported by the node.
pub const LEDGER_VERSION: &str = "0.1.0";

/// Snapshot format version. Bump when [`LedgerConfig`] or the persisted
/// ledger layout changes shape.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Accounting
// ---------------------------------------------------------------------------

/// Byte length of an [`Address`].
pub const ADDRESS_LENGTH: usize = 20;

/// Balances at or above this threshold stay in the holdings index.
/// Anything below it is purged on withdrawal to bound the index size.
pub const MIN_TRACKED_BALANCE: u128 = 1;

/// Committed notifications a ledger keeps by default. Older ones are
/// dropped from the front of the log; sequence numbers keep counting.
pub const DEFAULT_EVENT_RETENTION: usize = 10_000;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port for `custody-node run`.
pub const DEFAULT_API_PORT: u16 = 9851;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9852;

/// Default custody account used by devnet nodes when none is configured.
pub const DEVNET_CUSTODY_ACCOUNT: Address = Address::from_low_u8(0xC0);

// ---------------------------------------------------------------------------
// Authorization Policy
// ---------------------------------------------------------------------------

/// How the deposit path deals with the caller's authorization record before
/// pulling funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationPolicy {
    /// Pull straight away. A refused pull surfaces as `TransferFailed`.
    PullOnly,
    /// Query the authorization first and fail with
    /// `InsufficientAuthorization` when it does not cover the deposit.
    #[default]
    Verify,
    /// Top the authorization up to the deposit amount, resetting it to zero
    /// first when it is non-zero (some tokens refuse non-zero → non-zero
    /// changes), then re-check it.
    Adjust,
}

impl fmt::Display for AuthorizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizationPolicy::PullOnly => write!(f, "pull_only"),
            AuthorizationPolicy::Verify => write!(f, "verify"),
            AuthorizationPolicy::Adjust => write!(f, "adjust"),
        }
    }
}

impl std::str::FromStr for AuthorizationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pull_only" => Ok(AuthorizationPolicy::PullOnly),
            "verify" => Ok(AuthorizationPolicy::Verify),
            "adjust" => Ok(AuthorizationPolicy::Adjust),
            other => Err(format!("unknown authorization policy: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Rejected ledger configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the zero address cannot own the ledger")]
    ZeroOwner,

    #[error("the zero address cannot be the custody account")]
    ZeroCustodyAccount,

    #[error("event retention must keep at least one event")]
    ZeroEventRetention,
}

/// Construction-time configuration of a vault ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The only identity allowed to run recovery. Immutable once the ledger
    /// is built.
    pub owner: Address,
    /// The ledger's own account at the transfer gateway. Authorization
    /// queries name it as the spender.
    pub custody_account: Address,
    /// Deposit-side authorization handling.
    #[serde(default)]
    pub authorization: AuthorizationPolicy,
    /// How many committed notifications the ledger keeps in memory and in
    /// snapshots.
    #[serde(default = "default_event_retention")]
    pub event_retention: usize,
}

fn default_event_retention() -> usize {
    DEFAULT_EVENT_RETENTION
}

impl LedgerConfig {
    /// Config with the default [`AuthorizationPolicy`] and event retention.
    pub fn new(owner: Address, custody_account: Address) -> Self {
        Self {
            owner,
            custody_account,
            authorization: AuthorizationPolicy::default(),
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }

    /// Builder-style override of the authorization policy.
    pub fn with_authorization(mut self, policy: AuthorizationPolicy) -> Self {
        self.authorization = policy;
        self
    }

    /// Builder-style override of the event retention.
    pub fn with_event_retention(mut self, retention: usize) -> Self {
        self.event_retention = retention;
        self
    }

    /// Checks the config before a ledger is built from it.
    ///
    /// # Errors
    ///
    /// A zero owner would let the zero caller pass the recovery check, and a
    /// zero custody account cannot hold funds. A retention of zero would
    /// lose the sequence counter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_zero() {
            return Err(ConfigError::ZeroOwner);
        }
        if self.custody_account.is_zero() {
            return Err(ConfigError::ZeroCustodyAccount);
        }
        if self.event_retention == 0 {
            return Err(ConfigError::ZeroEventRetention);
        }
        Ok(())
    }
}
