//! # Ledger Notifications
//!
//! Every state change the ledger commits is described by a [`LedgerEvent`].
//! Events are appended to the ledger's log only when the operation that
//! produced them succeeds; a rolled-back withdrawal leaves no trace here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{AccountId, TokenId};
use crate::Amount;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    /// Funds were pulled into custody and credited to `user`.
    Deposited {
        user: AccountId,
        token: TokenId,
        amount: Amount,
    },
    /// Funds were debited from `user` and pushed out of custody.
    Withdrawn {
        user: AccountId,
        token: TokenId,
        amount: Amount,
    },
    /// `token` left `user`'s holdings index.
    TokenUntracked { user: AccountId, token: TokenId },
    /// The owner swept the whole custodied amount of `token`.
    Recovered {
        token: TokenId,
        to: AccountId,
        amount: Amount,
    },
}

/// A committed notification with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Strictly increasing, starting at 1.
    pub seq: u64,
    /// When the producing operation committed.
    pub timestamp: DateTime<Utc>,
    pub kind: LedgerEventKind,
}

impl LedgerEventKind {
    /// Short machine-readable tag, matching the serde variant name.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEventKind::Deposited { .. } => "deposited",
            LedgerEventKind::Withdrawn { .. } => "withdrawn",
            LedgerEventKind::TokenUntracked { .. } => "token_untracked",
            LedgerEventKind::Recovered { .. } => "recovered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn event_serializes_with_variant_key() {
        let event = LedgerEvent {
            seq: 3,
            timestamp: Utc::now(),
            kind: LedgerEventKind::TokenUntracked {
                user: Address::from_low_u8(1),
                token: Address::from_low_u8(2),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["seq"], 3);
        assert_eq!(
            value["kind"]["token_untracked"]["token"],
            Address::from_low_u8(2).to_hex()
        );

        let back: LedgerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn name_matches_serde_variant() {
        let kind = LedgerEventKind::Recovered {
            token: Address::from_low_u8(2),
            to: Address::from_low_u8(9),
            amount: 500,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert!(value.get(kind.name()).is_some());
    }
}
