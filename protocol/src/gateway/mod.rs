//! # Transfer Gateway
//!
//! The ledger never moves tokens itself. It asks a [`TransferGateway`] to
//! pull funds into custody on deposit and push them out on withdrawal or
//! recovery. The gateway stands in for arbitrary token contracts, so the
//! ledger treats it as untrusted:
//!
//! - a `false` return is a refusal, never a partial transfer;
//! - it must not be relied on to update ledger state as a side effect;
//! - it may call back into the ledger while a transfer is in flight.
//!
//! ```text
//! mod.rs     — the gateway trait
//! memory.rs  — in-memory reference gateway with non-standard token modes
//! ```

pub mod memory;

use crate::address::{AccountId, TokenId};
use crate::Amount;

pub use memory::{GatewayState, InMemoryGateway, TokenBehavior};

/// Asset transport consumed by the vault ledger.
///
/// All methods take `&self`: gateways are shared between the ledger and
/// whoever feeds them, and any mutable bookkeeping belongs behind interior
/// locks in the implementation.
pub trait TransferGateway: Send + Sync {
    /// Moves `amount` of `token` from `from`'s external account into the
    /// ledger's custody. Returns `false` if the transfer did not happen.
    fn pull(&self, token: TokenId, from: AccountId, amount: Amount) -> bool;

    /// Moves `amount` of `token` from custody to `to`. Returns `false` if
    /// the transfer did not happen.
    fn push(&self, token: TokenId, to: AccountId, amount: Amount) -> bool;

    /// How much of `token` the ledger may currently pull from `owner`.
    fn authorized_amount(&self, token: TokenId, owner: AccountId) -> Amount;

    /// Sets the amount of `token` the ledger may pull from `owner`.
    ///
    /// Some tokens refuse to change a non-zero authorization to another
    /// non-zero value; callers reset to zero first.
    fn set_authorization(&self, token: TokenId, owner: AccountId, amount: Amount) -> bool;

    /// Total amount of `token` currently held by the custody account.
    fn custodied_amount(&self, token: TokenId) -> Amount;
}
