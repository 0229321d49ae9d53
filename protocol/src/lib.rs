// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Protocol — Shared Primitives
//!
//! Everything the custody ledger and its hosts need to agree on before any
//! bookkeeping happens: how accounts and tokens are named, which constants
//! govern tracking, how assets physically move, and what a committed change
//! looks like from the outside.
//!
//! - **address** — 20-byte account/token identifiers, hex on the wire.
//! - **config** — Constants and the construction-time [`LedgerConfig`].
//! - **gateway** — The [`TransferGateway`] trait plus an in-memory gateway.
//! - **events** — Notifications committed by ledger operations.
//!
//! ## Design Philosophy
//!
//! 1. Amounts are integers in the token's smallest unit. No floats, ever.
//! 2. The gateway is untrusted. The ledger's correctness never depends on
//!    it behaving.
//! 3. Every public type that crosses a process boundary is serde-ready.

pub mod address;
pub mod config;
pub mod events;
pub mod gateway;

/// Token quantity in the token's smallest denomination.
pub type Amount = u128;

pub use address::{AccountId, Address, AddressError, TokenId};
pub use config::{AuthorizationPolicy, ConfigError, LedgerConfig, MIN_TRACKED_BALANCE};
pub use events::{LedgerEvent, LedgerEventKind};
pub use gateway::{GatewayState, InMemoryGateway, TokenBehavior, TransferGateway};
