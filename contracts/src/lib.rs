//! # Custody Contracts
//!
//! Contract logic for the custody ledger: a vault that takes fungible
//! tokens into custody, books an exact balance per `(token, user)`, and pays
//! them back out on request.
//!
//! - **Balance Store** — checked `(token, user) → amount` bookkeeping.
//! - **Holdings Index** — per-user token set with O(1) swap-remove.
//! - **Reentrancy Guard** — serializes mutating calls and refuses nested ones.
//! - **Vault Ledger** — deposit, withdraw, and owner recovery on top of the
//!   three, talking to the outside world through a `TransferGateway`.
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic uses `checked_add` and `checked_sub`.
//! 2. Internal state is final before any external call. A refused payout
//!    undoes the effects that preceded it.
//! 3. The balance store and the holdings index change together or not at
//!    all.
//! 4. Every persisted type is serializable (serde) for snapshots.

pub mod balance_store;
pub mod guard;
pub mod holdings;
pub mod vault;

pub use balance_store::{BalanceError, BalanceStore};
pub use guard::ReentrancyGuard;
pub use holdings::{HoldingsIndex, IndexError};
pub use vault::{LedgerSnapshot, SnapshotError, TransferDirection, VaultError, VaultLedger};
