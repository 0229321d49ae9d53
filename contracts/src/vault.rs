//! # Vault Ledger Contract
//!
//! Custodial ledger for fungible tokens. Users deposit tokens through the
//! [`TransferGateway`], the ledger records an exact balance per
//! `(token, user)`, keeps a per-user index of held tokens, and pays out on
//! withdrawal up to the recorded balance. The owner fixed at construction
//! can sweep whatever custody holds of a token.
//!
//! ## Security Model
//!
//! - **Reentrancy**: deposit, withdraw, and recover run inside the
//!   [`ReentrancyGuard`]. A gateway that calls back into any of them
//!   mid-transfer gets [`VaultError::Reentrant`]; the outer call carries on.
//!   Reads never take the guard.
//! - **Checks-effects-interactions**: a withdrawal debits and untracks
//!   before the payout. If the payout is refused, or the gateway panics
//!   while paying out, the debit and the untrack are undone and no
//!   notification is committed.
//! - **Checked arithmetic**: underflow is `InsufficientBalance`, overflow is
//!   `BalanceOverflow`. Nothing wraps.
//! - **Owner gating**: recovery checks the caller against the configured
//!   owner before touching the gateway.
//!
//! ## Recovery caveat
//!
//! Recovery sweeps the *entire* custodied amount of a token. Custody holds
//! user deposits too, so sweeping a token that users still hold drains their
//! backing. The ledger logs a warning in that case but does not refuse.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use custody_protocol::config::SNAPSHOT_FORMAT_VERSION;
use custody_protocol::{
    AccountId, Amount, AuthorizationPolicy, ConfigError, LedgerConfig, LedgerEvent, LedgerEventKind, TokenId,
    TransferGateway, MIN_TRACKED_BALANCE,
};

use crate::balance_store::{BalanceError, BalanceStore};
use crate::guard::{Entered, ReentrancyGuard};
use crate::holdings::{HoldingsIndex, IndexError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which way a refused transfer was going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Into custody (deposit).
    Pull,
    /// Out of custody (withdrawal or recovery).
    Push,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Pull => write!(f, "pull"),
            TransferDirection::Push => write!(f, "push"),
        }
    }
}

/// Errors surfaced by vault ledger operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The token identifier is the zero address.
    #[error("invalid token: the zero address is not a token")]
    InvalidToken,

    /// The amount is zero.
    #[error("invalid amount: must be greater than zero")]
    InvalidAmount,

    /// Withdrawal exceeds the tracked balance.
    #[error("insufficient balance: available {available}, requested {requested} (token {token})")]
    InsufficientBalance {
        token: TokenId,
        available: Amount,
        requested: Amount,
    },

    /// The gateway does not permit pulling the deposit amount, even after
    /// any adjustment attempt.
    #[error("insufficient authorization: authorized {authorized}, requested {requested} (token {token})")]
    InsufficientAuthorization {
        token: TokenId,
        authorized: Amount,
        requested: Amount,
    },

    /// The gateway refused a pull or push.
    #[error("transfer failed: gateway refused to {direction} {amount} of token {token}")]
    TransferFailed {
        token: TokenId,
        direction: TransferDirection,
        amount: Amount,
    },

    /// A mutating call was attempted while another one is in flight on the
    /// same thread.
    #[error("reentrant call rejected")]
    Reentrant,

    /// Custody holds none of the token.
    #[error("nothing to recover for token {token}")]
    NothingToRecover { token: TokenId },

    /// Recovery was attempted by someone other than the owner.
    #[error("caller {caller} is not the ledger owner")]
    NotOwner { caller: AccountId },

    /// A credit would exceed `Amount::MAX`.
    #[error("balance overflow crediting {amount} of token {token}")]
    BalanceOverflow { token: TokenId, amount: Amount },
}

impl VaultError {
    /// Stable snake_case name, used by the API and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::InvalidToken => "invalid_token",
            VaultError::InvalidAmount => "invalid_amount",
            VaultError::InsufficientBalance { .. } => "insufficient_balance",
            VaultError::InsufficientAuthorization { .. } => "insufficient_authorization",
            VaultError::TransferFailed { .. } => "transfer_failed",
            VaultError::Reentrant => "reentrant",
            VaultError::NothingToRecover { .. } => "nothing_to_recover",
            VaultError::NotOwner { .. } => "not_owner",
            VaultError::BalanceOverflow { .. } => "balance_overflow",
        }
    }
}

impl From<BalanceError> for VaultError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientBalance {
                token,
                available,
                requested,
                ..
            } => VaultError::InsufficientBalance {
                token,
                available,
                requested,
            },
            BalanceError::Overflow { token, credit, .. } => VaultError::BalanceOverflow {
                token,
                amount: credit,
            },
        }
    }
}

/// Errors raised while rebuilding a ledger from a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot carries a config no ledger may be built from.
    #[error("invalid ledger config: {0}")]
    Config(#[from] ConfigError),

    /// The snapshot was written by an incompatible version.
    #[error("unsupported snapshot format version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },

    /// The holdings index and its presence flags disagree.
    #[error("holdings index is inconsistent: {0}")]
    Index(#[from] IndexError),

    /// Balances of a token do not sum within range.
    #[error("balance store is inconsistent: {0}")]
    Balance(#[from] BalanceError),

    /// A user holds a balance of a token that is missing from their index.
    #[error("user {user} holds {amount} of token {token} but the token is not tracked")]
    UntrackedBalance {
        user: AccountId,
        token: TokenId,
        amount: Amount,
    },

    /// Event sequence numbers are not strictly increasing.
    #[error("event log out of order at seq {seq}")]
    EventOrder { seq: u64 },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LedgerState {
    balances: BalanceStore,
    holdings: HoldingsIndex,
    /// Most recent notifications, at most `event_retention` of them.
    events: VecDeque<LedgerEvent>,
    last_seq: u64,
    event_retention: usize,
}

impl LedgerState {
    fn new(event_retention: usize) -> Self {
        Self {
            balances: BalanceStore::new(),
            holdings: HoldingsIndex::new(),
            events: VecDeque::new(),
            last_seq: 0,
            event_retention,
        }
    }

    fn commit(&mut self, kinds: Vec<LedgerEventKind>) {
        let timestamp = Utc::now();
        for kind in kinds {
            self.last_seq += 1;
            self.events.push_back(LedgerEvent {
                seq: self.last_seq,
                timestamp,
                kind,
            });
        }
        self.trim_events();
    }

    fn trim_events(&mut self) {
        let excess = self.events.len().saturating_sub(self.event_retention);
        if excess > 0 {
            self.events.drain(..excess);
        }
    }
}

/// Undo record for a withdrawal between its debit and its payout.
///
/// Dropping it unsettled re-credits the debit and puts the token back in
/// its index slot. That covers a refused payout as well as a gateway that
/// panics inside `push`, since the drop still runs while unwinding.
struct PendingPayout<'a> {
    state: &'a RwLock<LedgerState>,
    user: AccountId,
    token: TokenId,
    amount: Amount,
    untracked_slot: Option<usize>,
    settled: bool,
}

impl PendingPayout<'_> {
    /// The payout went through; keep the debit. Returns the index slot the
    /// token was untracked from, if any.
    fn settle(mut self) -> Option<usize> {
        self.settled = true;
        self.untracked_slot
    }
}

impl Drop for PendingPayout<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.state.write();
        // The same amount was debited under the guard, so this cannot
        // overflow. The index is reinstated regardless.
        if let Err(err) = state.balances.credit(self.token, self.user, self.amount) {
            error!(
                user = %self.user,
                token = %self.token,
                %err,
                "withdrawal rollback could not re-credit"
            );
        }
        if let Some(slot) = self.untracked_slot {
            state.holdings.reinstate(self.user, self.token, slot);
        }
        if std::thread::panicking() {
            error!(
                user = %self.user,
                token = %self.token,
                amount = self.amount,
                "gateway panicked during payout, rolled back"
            );
        } else {
            warn!(
                user = %self.user,
                token = %self.token,
                amount = self.amount,
                "withdrawal payout refused, rolled back"
            );
        }
    }
}

/// Serializable copy of a ledger's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub format_version: u16,
    pub taken_at: DateTime<Utc>,
    pub config: LedgerConfig,
    pub balances: BalanceStore,
    pub holdings: HoldingsIndex,
    pub events: Vec<LedgerEvent>,
}

// ---------------------------------------------------------------------------
// VaultLedger
// ---------------------------------------------------------------------------

/// The custodial balance ledger.
///
/// All methods take `&self`; share it behind an `Arc`. Mutating operations
/// are serialized by the reentrancy guard, so two of them never interleave.
pub struct VaultLedger {
    config: LedgerConfig,
    gateway: Arc<dyn TransferGateway>,
    guard: ReentrancyGuard,
    state: RwLock<LedgerState>,
}

impl fmt::Debug for VaultLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultLedger")
            .field("config", &self.config)
            .field("locked", &self.guard.is_entered())
            .finish_non_exhaustive()
    }
}

impl VaultLedger {
    /// Creates an empty ledger.
    pub fn new(config: LedgerConfig, gateway: Arc<dyn TransferGateway>) -> Self {
        info!(
            owner = %config.owner,
            custody = %config.custody_account,
            authorization = %config.authorization,
            "vault ledger created"
        );
        let state = LedgerState::new(config.event_retention);
        Self {
            config,
            gateway,
            guard: ReentrancyGuard::new(),
            state: RwLock::new(state),
        }
    }

    /// The construction-time configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The recovery owner.
    pub fn owner(&self) -> AccountId {
        self.config.owner
    }

    /// Whether a mutating operation is currently in flight.
    pub fn is_locked(&self) -> bool {
        self.guard.is_entered()
    }

    // -----------------------------------------------------------------------
    // Deposit
    // -----------------------------------------------------------------------

    /// Pulls `amount` of `token` from `caller` into custody and credits it.
    ///
    /// Returns the caller's new balance.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Reentrant`] if called from inside another mutating call.
    /// - [`VaultError::InvalidToken`] / [`VaultError::InvalidAmount`] on bad input.
    /// - [`VaultError::BalanceOverflow`] if the credit could not be recorded.
    /// - [`VaultError::InsufficientAuthorization`] under the `Verify` and
    ///   `Adjust` policies when the pull is not authorized.
    /// - [`VaultError::TransferFailed`] if the gateway refuses the pull.
    ///
    /// On any error the ledger state is unchanged.
    pub fn deposit(
        &self,
        caller: AccountId,
        token: TokenId,
        amount: Amount,
    ) -> Result<Amount, VaultError> {
        let _entered = self.enter("deposit", caller)?;
        validate(token, amount)?;

        // Refuse before any funds move if the credit could never be booked.
        self.state.read().balances.check_credit(token, caller, amount)?;

        self.ensure_authorization(caller, token, amount)?;

        if !self.gateway.pull(token, caller, amount) {
            warn!(%caller, %token, amount, "deposit pull refused by gateway");
            return Err(VaultError::TransferFailed {
                token,
                direction: TransferDirection::Pull,
                amount,
            });
        }

        let mut state = self.state.write();
        let new_balance = state.balances.credit(token, caller, amount)?;
        if state.holdings.track(caller, token) {
            debug!(user = %caller, %token, "token tracked");
        }
        state.commit(vec![LedgerEventKind::Deposited {
            user: caller,
            token,
            amount,
        }]);

        info!(%caller, %token, amount, balance = new_balance, "deposit");
        Ok(new_balance)
    }

    fn ensure_authorization(
        &self,
        caller: AccountId,
        token: TokenId,
        amount: Amount,
    ) -> Result<(), VaultError> {
        let policy = self.config.authorization;
        if policy == AuthorizationPolicy::PullOnly {
            return Ok(());
        }

        let mut authorized = self.gateway.authorized_amount(token, caller);
        if authorized < amount && policy == AuthorizationPolicy::Adjust {
            // Non-standard tokens refuse non-zero to non-zero changes.
            let reset = authorized == 0 || self.gateway.set_authorization(token, caller, 0);
            if reset && self.gateway.set_authorization(token, caller, amount) {
                debug!(%caller, %token, from = authorized, to = amount, "authorization adjusted");
            } else {
                warn!(%caller, %token, amount, "authorization adjustment refused");
            }
            authorized = self.gateway.authorized_amount(token, caller);
        }

        if authorized < amount {
            warn!(%caller, %token, authorized, amount, "deposit not authorized");
            return Err(VaultError::InsufficientAuthorization {
                token,
                authorized,
                requested: amount,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Withdraw
    // -----------------------------------------------------------------------

    /// Debits `amount` of `token` from `caller` and pushes it out of custody.
    ///
    /// Returns the caller's remaining balance. When it falls below
    /// [`MIN_TRACKED_BALANCE`] the token leaves the caller's holdings.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Reentrant`] if called from inside another mutating call.
    /// - [`VaultError::InvalidToken`] / [`VaultError::InvalidAmount`] on bad input.
    /// - [`VaultError::InsufficientBalance`] if `amount` exceeds the balance.
    /// - [`VaultError::TransferFailed`] if the gateway refuses the payout;
    ///   the debit and untrack are rolled back first. A panicking gateway
    ///   gets the same rollback before the panic propagates.
    pub fn withdraw(
        &self,
        caller: AccountId,
        token: TokenId,
        amount: Amount,
    ) -> Result<Amount, VaultError> {
        let _entered = self.enter("withdraw", caller)?;
        validate(token, amount)?;

        let (remaining, pending) = {
            let mut state = self.state.write();
            let available = state.balances.read(token, caller);
            if available < amount {
                warn!(%caller, %token, available, amount, "withdrawal exceeds balance");
                return Err(VaultError::InsufficientBalance {
                    token,
                    available,
                    requested: amount,
                });
            }
            let remaining = state.balances.debit(token, caller, amount)?;
            let untracked_slot = if remaining < MIN_TRACKED_BALANCE {
                state.holdings.untrack(caller, token)
            } else {
                None
            };
            let pending = PendingPayout {
                state: &self.state,
                user: caller,
                token,
                amount,
                untracked_slot,
                settled: false,
            };
            (remaining, pending)
        };

        if !self.gateway.push(token, caller, amount) {
            drop(pending);
            return Err(VaultError::TransferFailed {
                token,
                direction: TransferDirection::Push,
                amount,
            });
        }
        let untracked_slot = pending.settle();

        let mut events = Vec::with_capacity(2);
        if untracked_slot.is_some() {
            debug!(user = %caller, %token, "token untracked");
            events.push(LedgerEventKind::TokenUntracked {
                user: caller,
                token,
            });
        }
        events.push(LedgerEventKind::Withdrawn {
            user: caller,
            token,
            amount,
        });
        self.state.write().commit(events);

        info!(%caller, %token, amount, balance = remaining, "withdrawal");
        Ok(remaining)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Sweeps the whole custodied amount of `token` to the owner.
    ///
    /// Does not consult or modify balances or holdings. Returns the amount
    /// swept.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Reentrant`] if called from inside another mutating call.
    /// - [`VaultError::NotOwner`] if `caller` is not the owner.
    /// - [`VaultError::InvalidToken`] for the zero address.
    /// - [`VaultError::NothingToRecover`] if custody holds none of `token`.
    /// - [`VaultError::TransferFailed`] if the payout is refused.
    pub fn recover(&self, caller: AccountId, token: TokenId) -> Result<Amount, VaultError> {
        let _entered = self.enter("recover", caller)?;

        if caller != self.config.owner {
            warn!(%caller, %token, "recovery attempted by non-owner");
            return Err(VaultError::NotOwner { caller });
        }
        if token.is_zero() {
            return Err(VaultError::InvalidToken);
        }

        let custodied = self.gateway.custodied_amount(token);
        if custodied == 0 {
            return Err(VaultError::NothingToRecover { token });
        }

        let tracked = self.state.read().balances.total_tracked(token);
        if tracked > 0 {
            warn!(
                %token,
                custodied,
                tracked,
                "recovering a token that users still hold; their balances lose backing"
            );
        }

        let owner = self.config.owner;
        if !self.gateway.push(token, owner, custodied) {
            warn!(%token, custodied, "recovery payout refused by gateway");
            return Err(VaultError::TransferFailed {
                token,
                direction: TransferDirection::Push,
                amount: custodied,
            });
        }

        self.state.write().commit(vec![LedgerEventKind::Recovered {
            token,
            to: owner,
            amount: custodied,
        }]);
        info!(%token, to = %owner, amount = custodied, "custody recovered");
        Ok(custodied)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Tracked balance of `user` in `token`; zero if never deposited.
    pub fn balance(&self, token: TokenId, user: AccountId) -> Amount {
        self.state.read().balances.read(token, user)
    }

    /// Every token `user` holds at least [`MIN_TRACKED_BALANCE`] of, with
    /// the amount. Order is unspecified.
    pub fn holdings(&self, user: AccountId) -> Vec<(TokenId, Amount)> {
        let state = self.state.read();
        state.holdings.enumerate_nonzero(user, &state.balances)
    }

    /// Raw holdings index entries for `user`, stale zero balances included.
    pub fn tracked_tokens(&self, user: AccountId) -> Vec<TokenId> {
        self.state.read().holdings.list(user)
    }

    /// Presence flag for `(user, token)` in the holdings index.
    pub fn is_tracked(&self, user: AccountId, token: TokenId) -> bool {
        self.state.read().holdings.contains(user, token)
    }

    /// Sum of all users' tracked balances of `token`.
    pub fn total_tracked(&self, token: TokenId) -> Amount {
        self.state.read().balances.total_tracked(token)
    }

    /// Retained notifications with `seq > since`, oldest first. Only the
    /// last `event_retention` notifications are kept.
    pub fn events_since(&self, since: u64) -> Vec<LedgerEvent> {
        let state = self.state.read();
        let start = state.events.partition_point(|e| e.seq <= since);
        state.events.range(start..).cloned().collect()
    }

    /// Sequence number of the latest committed notification, 0 if none.
    /// Keeps counting after older notifications are dropped.
    pub fn last_event_seq(&self) -> u64 {
        self.state.read().last_seq
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Copies the full ledger state.
    ///
    /// Waits for any in-flight mutating operation to finish so the copy is
    /// never taken between a debit and its payout. Calling this from inside
    /// a gateway callback returns [`VaultError::Reentrant`].
    pub fn snapshot(&self) -> Result<LedgerSnapshot, VaultError> {
        let _entered = self.guard.enter().ok_or(VaultError::Reentrant)?;
        let state = self.state.read();
        Ok(LedgerSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at: Utc::now(),
            config: self.config.clone(),
            balances: state.balances.clone(),
            holdings: state.holdings.clone(),
            events: state.events.iter().cloned().collect(),
        })
    }

    /// Rebuilds a ledger from a snapshot, validating that the balance store
    /// and the holdings index agree.
    pub fn restore(
        snapshot: LedgerSnapshot,
        gateway: Arc<dyn TransferGateway>,
    ) -> Result<Self, SnapshotError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let LedgerSnapshot {
            config,
            mut balances,
            holdings,
            events,
            ..
        } = snapshot;

        config.validate()?;
        holdings.check_consistency()?;
        balances.rebuild_totals()?;
        if let Some((token, user, amount)) = balances
            .iter()
            .find(|(token, user, amount)| {
                *amount >= MIN_TRACKED_BALANCE && !holdings.contains(*user, *token)
            })
        {
            return Err(SnapshotError::UntrackedBalance {
                user,
                token,
                amount,
            });
        }
        if let Some(pair) = events.windows(2).find(|pair| pair[1].seq <= pair[0].seq) {
            return Err(SnapshotError::EventOrder { seq: pair[1].seq });
        }

        let event_retention = config.event_retention;
        let ledger = Self::new(config, gateway);
        let mut state = LedgerState {
            balances,
            holdings,
            last_seq: events.last().map_or(0, |e| e.seq),
            events: events.into(),
            event_retention,
        };
        state.trim_events();
        *ledger.state.write() = state;
        Ok(ledger)
    }

    // -----------------------------------------------------------------------
    // Internal Helpers
    // -----------------------------------------------------------------------

    fn enter(&self, operation: &'static str, caller: AccountId) -> Result<Entered<'_>, VaultError> {
        self.guard.enter().ok_or_else(|| {
            warn!(operation, %caller, "reentrant call rejected");
            VaultError::Reentrant
        })
    }
}

fn validate(token: TokenId, amount: Amount) -> Result<(), VaultError> {
    if token.is_zero() {
        return Err(VaultError::InvalidToken);
    }
    if amount == 0 {
        return Err(VaultError::InvalidAmount);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use custody_protocol::{Address, InMemoryGateway, TokenBehavior};

    const OWNER: AccountId = Address::from_low_u8(0x01);
    const CUSTODY: AccountId = Address::from_low_u8(0xC0);
    const ALICE: AccountId = Address::from_low_u8(0xA1);
    const TOKEN: TokenId = Address::from_low_u8(0x10);

    fn setup(policy: AuthorizationPolicy) -> (Arc<InMemoryGateway>, VaultLedger) {
        let gateway = Arc::new(InMemoryGateway::new(CUSTODY));
        gateway.mint(TOKEN, ALICE, 1_000);
        let config = LedgerConfig::new(OWNER, CUSTODY).with_authorization(policy);
        let ledger = VaultLedger::new(config, gateway.clone());
        (gateway, ledger)
    }

    #[test]
    fn deposit_credits_and_tracks() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 300);

        assert_eq!(ledger.deposit(ALICE, TOKEN, 300), Ok(300));
        assert_eq!(ledger.balance(TOKEN, ALICE), 300);
        assert!(ledger.is_tracked(ALICE, TOKEN));
        assert_eq!(gateway.custodied_amount(TOKEN), 300);
        assert!(!ledger.is_locked());
    }

    #[test]
    fn zero_token_and_zero_amount_rejected() {
        let (gateway, ledger) = setup(AuthorizationPolicy::PullOnly);
        gateway.set_authorization(TOKEN, ALICE, 300);

        assert_eq!(
            ledger.deposit(ALICE, Address::ZERO, 10),
            Err(VaultError::InvalidToken)
        );
        assert_eq!(ledger.deposit(ALICE, TOKEN, 0), Err(VaultError::InvalidAmount));
        assert_eq!(
            ledger.withdraw(ALICE, Address::ZERO, 10),
            Err(VaultError::InvalidToken)
        );
        assert_eq!(ledger.withdraw(ALICE, TOKEN, 0), Err(VaultError::InvalidAmount));
        assert!(ledger.events_since(0).is_empty());
    }

    #[test]
    fn verify_policy_rejects_unauthorized_deposit() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 50);

        assert_eq!(
            ledger.deposit(ALICE, TOKEN, 100),
            Err(VaultError::InsufficientAuthorization {
                token: TOKEN,
                authorized: 50,
                requested: 100,
            })
        );
        assert_eq!(gateway.custodied_amount(TOKEN), 0);
        assert!(!ledger.is_tracked(ALICE, TOKEN));
    }

    #[test]
    fn pull_only_policy_reports_transfer_failure() {
        let (_gateway, ledger) = setup(AuthorizationPolicy::PullOnly);
        assert_eq!(
            ledger.deposit(ALICE, TOKEN, 100),
            Err(VaultError::TransferFailed {
                token: TOKEN,
                direction: TransferDirection::Pull,
                amount: 100,
            })
        );
        assert_eq!(ledger.balance(TOKEN, ALICE), 0);
    }

    #[test]
    fn adjust_policy_resets_before_raising() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Adjust);
        gateway.set_behavior(TOKEN, TokenBehavior::RequiresAllowanceReset);
        gateway.set_authorization(TOKEN, ALICE, 10);

        assert_eq!(ledger.deposit(ALICE, TOKEN, 400), Ok(400));
        assert_eq!(gateway.authorized_amount(TOKEN, ALICE), 0);
    }

    #[test]
    fn adjust_policy_gives_up_on_failing_token() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Adjust);
        gateway.set_behavior(TOKEN, TokenBehavior::Failing);

        assert!(matches!(
            ledger.deposit(ALICE, TOKEN, 400),
            Err(VaultError::InsufficientAuthorization { authorized: 0, .. })
        ));
    }

    #[test]
    fn withdraw_round_trip_untracks() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 100);
        ledger.deposit(ALICE, TOKEN, 100).unwrap();

        assert_eq!(ledger.withdraw(ALICE, TOKEN, 100), Ok(0));
        assert_eq!(ledger.balance(TOKEN, ALICE), 0);
        assert!(!ledger.is_tracked(ALICE, TOKEN));
        assert!(ledger.holdings(ALICE).is_empty());
        assert_eq!(gateway.external_balance(TOKEN, ALICE), 1_000);

        let kinds: Vec<_> = ledger
            .events_since(0)
            .into_iter()
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(kinds, vec!["deposited", "token_untracked", "withdrawn"]);
    }

    #[test]
    fn partial_withdraw_keeps_tracking() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 100);
        ledger.deposit(ALICE, TOKEN, 100).unwrap();

        assert_eq!(ledger.withdraw(ALICE, TOKEN, 99), Ok(1));
        assert!(ledger.is_tracked(ALICE, TOKEN));
        assert_eq!(ledger.holdings(ALICE), vec![(TOKEN, 1)]);
    }

    #[test]
    fn failed_payout_rolls_back() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 100);
        ledger.deposit(ALICE, TOKEN, 100).unwrap();
        gateway.set_behavior(TOKEN, TokenBehavior::Failing);

        assert!(matches!(
            ledger.withdraw(ALICE, TOKEN, 100),
            Err(VaultError::TransferFailed {
                direction: TransferDirection::Push,
                ..
            })
        ));
        assert_eq!(ledger.balance(TOKEN, ALICE), 100);
        assert_eq!(ledger.total_tracked(TOKEN), 100);
        assert!(ledger.is_tracked(ALICE, TOKEN));
        assert_eq!(ledger.events_since(0).len(), 1);
    }

    #[test]
    fn recover_requires_owner_and_funds() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        assert_eq!(
            ledger.recover(ALICE, TOKEN),
            Err(VaultError::NotOwner { caller: ALICE })
        );
        assert_eq!(
            ledger.recover(OWNER, TOKEN),
            Err(VaultError::NothingToRecover { token: TOKEN })
        );

        gateway.send_to_custody(TOKEN, ALICE, 500);
        assert_eq!(ledger.recover(OWNER, TOKEN), Ok(500));
        assert_eq!(gateway.external_balance(TOKEN, OWNER), 500);
        assert_eq!(gateway.custodied_amount(TOKEN), 0);
    }

    #[test]
    fn error_kinds_are_distinct() {
        let errors = [
            VaultError::InvalidToken,
            VaultError::InvalidAmount,
            VaultError::InsufficientBalance {
                token: TOKEN,
                available: 0,
                requested: 1,
            },
            VaultError::InsufficientAuthorization {
                token: TOKEN,
                authorized: 0,
                requested: 1,
            },
            VaultError::TransferFailed {
                token: TOKEN,
                direction: TransferDirection::Pull,
                amount: 1,
            },
            VaultError::Reentrant,
            VaultError::NothingToRecover { token: TOKEN },
            VaultError::NotOwner { caller: ALICE },
            VaultError::BalanceOverflow {
                token: TOKEN,
                amount: 1,
            },
        ];
        let mut kinds: Vec<_> = errors.iter().map(VaultError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn balance_error_maps_to_vault_error() {
        let err: VaultError = BalanceError::Overflow {
            token: TOKEN,
            user: ALICE,
            current: Amount::MAX,
            credit: 5,
        }
        .into();
        assert_eq!(
            err,
            VaultError::BalanceOverflow {
                token: TOKEN,
                amount: 5
            }
        );
    }

    #[test]
    fn snapshot_restore_preserves_state() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 100);
        ledger.deposit(ALICE, TOKEN, 100).unwrap();
        ledger.withdraw(ALICE, TOKEN, 40).unwrap();

        let json = serde_json::to_string(&ledger.snapshot().unwrap()).unwrap();
        let snapshot: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        let restored = VaultLedger::restore(snapshot, gateway).unwrap();

        assert_eq!(restored.balance(TOKEN, ALICE), 60);
        assert_eq!(restored.total_tracked(TOKEN), 60);
        assert_eq!(restored.holdings(ALICE), vec![(TOKEN, 60)]);
        assert_eq!(restored.events_since(1).len(), 1);
        assert_eq!(restored.owner(), OWNER);
    }

    #[test]
    fn restore_rejects_untracked_balance() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        gateway.set_authorization(TOKEN, ALICE, 100);
        ledger.deposit(ALICE, TOKEN, 100).unwrap();

        let mut snapshot = ledger.snapshot().unwrap();
        snapshot.holdings = HoldingsIndex::new();
        assert!(matches!(
            VaultLedger::restore(snapshot, gateway),
            Err(SnapshotError::UntrackedBalance { amount: 100, .. })
        ));
    }

    #[test]
    fn restore_rejects_other_format_version() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        let mut snapshot = ledger.snapshot().unwrap();
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        assert!(matches!(
            VaultLedger::restore(snapshot, gateway),
            Err(SnapshotError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn restore_rejects_zero_owner() {
        let (gateway, ledger) = setup(AuthorizationPolicy::Verify);
        let mut snapshot = ledger.snapshot().unwrap();
        snapshot.config.owner = Address::ZERO;
        assert!(matches!(
            VaultLedger::restore(snapshot, gateway),
            Err(SnapshotError::Config(ConfigError::ZeroOwner))
        ));
    }

    #[test]
    fn event_log_keeps_most_recent() {
        let gateway = Arc::new(InMemoryGateway::new(CUSTODY));
        gateway.mint(TOKEN, ALICE, 1_000);
        let config = LedgerConfig::new(OWNER, CUSTODY)
            .with_authorization(AuthorizationPolicy::PullOnly)
            .with_event_retention(3);
        let ledger = VaultLedger::new(config, gateway.clone());

        for _ in 0..5 {
            ledger.deposit(ALICE, TOKEN, 1).unwrap();
        }
        let seqs: Vec<u64> = ledger.events_since(0).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(ledger.last_event_seq(), 5);
        assert_eq!(ledger.events_since(4).len(), 1);

        let snapshot = ledger.snapshot().unwrap();
        assert_eq!(snapshot.events.len(), 3);

        let restored = VaultLedger::restore(snapshot, gateway).unwrap();
        assert_eq!(restored.last_event_seq(), 5);
        restored.deposit(ALICE, TOKEN, 1).unwrap();
        let seqs: Vec<u64> = restored.events_since(0).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn restore_trims_to_smaller_retention() {
        let (gateway, ledger) = setup(AuthorizationPolicy::PullOnly);
        for _ in 0..4 {
            ledger.deposit(ALICE, TOKEN, 1).unwrap();
        }
        let mut snapshot = ledger.snapshot().unwrap();
        snapshot.config.event_retention = 2;

        let restored = VaultLedger::restore(snapshot, gateway).unwrap();
        let seqs: Vec<u64> = restored.events_since(0).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(restored.last_event_seq(), 4);
    }
}
