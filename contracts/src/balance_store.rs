//! # Balance Store
//!
//! Exact `(token, user) → amount` bookkeeping. Entries spring into existence
//! on first credit and are never deleted; an account that withdrew
//! everything simply rests at zero.
//!
//! The store also keeps the per-token sum of all tracked balances. It is
//! derived data, rebuilt from the balances on restore, and exists so the
//! ledger can tell how much of a token's custody is spoken for.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use custody_protocol::{AccountId, Amount, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during balance operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// Attempted to debit more than the stored balance.
    #[error("insufficient balance: available {available}, requested {requested} (token {token}, user {user})")]
    InsufficientBalance {
        token: TokenId,
        user: AccountId,
        available: Amount,
        requested: Amount,
    },

    /// A credit would push the user balance or the token total past
    /// `Amount::MAX`.
    #[error("balance overflow: current {current}, credit {credit} (token {token}, user {user})")]
    Overflow {
        token: TokenId,
        user: AccountId,
        current: Amount,
        credit: Amount,
    },
}

// ---------------------------------------------------------------------------
// BalanceStore
// ---------------------------------------------------------------------------

/// Per-token, per-user balances: `token -> (user -> amount)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceStore {
    balances: HashMap<TokenId, HashMap<AccountId, Amount>>,
    #[serde(skip)]
    totals: HashMap<TokenId, Amount>,
}

impl BalanceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored balance, or zero for a pair never credited.
    pub fn read(&self, token: TokenId, user: AccountId) -> Amount {
        self.balances
            .get(&token)
            .and_then(|users| users.get(&user))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of every user's balance of `token`.
    pub fn total_tracked(&self, token: TokenId) -> Amount {
        self.totals.get(&token).copied().unwrap_or(0)
    }

    /// Checks that [`credit`](Self::credit) would succeed, without mutating.
    pub fn check_credit(
        &self,
        token: TokenId,
        user: AccountId,
        amount: Amount,
    ) -> Result<(), BalanceError> {
        let current = self.read(token, user);
        let overflow = || BalanceError::Overflow {
            token,
            user,
            current,
            credit: amount,
        };
        current.checked_add(amount).ok_or_else(overflow)?;
        self.total_tracked(token)
            .checked_add(amount)
            .ok_or_else(overflow)?;
        Ok(())
    }

    /// Adds `amount` to the balance and returns the new balance.
    ///
    /// Zero amounts are accepted here; the ledger rejects them before they
    /// reach the store.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::Overflow`] if either the user balance or the
    /// token total would exceed `Amount::MAX`. Nothing is mutated then.
    pub fn credit(
        &mut self,
        token: TokenId,
        user: AccountId,
        amount: Amount,
    ) -> Result<Amount, BalanceError> {
        self.check_credit(token, user, amount)?;

        let balance = self
            .balances
            .entry(token)
            .or_default()
            .entry(user)
            .or_insert(0);
        *balance += amount;
        let new_balance = *balance;

        *self.totals.entry(token).or_insert(0) += amount;
        Ok(new_balance)
    }

    /// Subtracts `amount` from the balance and returns what is left.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::InsufficientBalance`] if the stored balance is
    /// below `amount`. Nothing is mutated then.
    pub fn debit(
        &mut self,
        token: TokenId,
        user: AccountId,
        amount: Amount,
    ) -> Result<Amount, BalanceError> {
        let available = self.read(token, user);
        let remaining = available
            .checked_sub(amount)
            .ok_or(BalanceError::InsufficientBalance {
                token,
                user,
                available,
                requested: amount,
            })?;

        if let Some(balance) = self
            .balances
            .get_mut(&token)
            .and_then(|users| users.get_mut(&user))
        {
            *balance = remaining;
        }
        if let Some(total) = self.totals.get_mut(&token) {
            *total = total.saturating_sub(amount);
        }
        Ok(remaining)
    }

    /// Number of `(token, user)` entries, zero balances included.
    pub fn entry_count(&self) -> usize {
        self.balances.values().map(HashMap::len).sum()
    }

    /// Iterates `(token, user, amount)` over every entry.
    pub fn iter(&self) -> impl Iterator<Item = (TokenId, AccountId, Amount)> + '_ {
        self.balances.iter().flat_map(|(token, users)| {
            users
                .iter()
                .map(move |(user, amount)| (*token, *user, *amount))
        })
    }

    /// Rebuilds the per-token totals from the balances. Used after
    /// deserialization, where totals are not persisted.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::Overflow`] if a token's balances do not sum
    /// within `Amount::MAX`.
    pub fn rebuild_totals(&mut self) -> Result<(), BalanceError> {
        let mut totals: HashMap<TokenId, Amount> = HashMap::new();
        for (token, user, amount) in self.iter() {
            let total = totals.entry(token).or_insert(0);
            *total = total.checked_add(amount).ok_or(BalanceError::Overflow {
                token,
                user,
                current: *total,
                credit: amount,
            })?;
        }
        self.totals = totals;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use custody_protocol::Address;

    const TOKEN: TokenId = Address::from_low_u8(0x10);
    const OTHER: TokenId = Address::from_low_u8(0x11);
    const ALICE: AccountId = Address::from_low_u8(0xA1);
    const BOB: AccountId = Address::from_low_u8(0xB0);

    #[test]
    fn read_unknown_is_zero() {
        let store = BalanceStore::new();
        assert_eq!(store.read(TOKEN, ALICE), 0);
        assert_eq!(store.total_tracked(TOKEN), 0);
    }

    #[test]
    fn credit_accumulates() {
        let mut store = BalanceStore::new();
        assert_eq!(store.credit(TOKEN, ALICE, 500).unwrap(), 500);
        assert_eq!(store.credit(TOKEN, ALICE, 300).unwrap(), 800);
        assert_eq!(store.read(TOKEN, ALICE), 800);
    }

    #[test]
    fn debit_reduces_and_returns_remaining() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, 1_000).unwrap();
        assert_eq!(store.debit(TOKEN, ALICE, 400).unwrap(), 600);
        assert_eq!(store.debit(TOKEN, ALICE, 600).unwrap(), 0);
        assert_eq!(store.read(TOKEN, ALICE), 0);
        // The entry stays, resting at zero.
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn debit_beyond_balance_rejected_without_mutation() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, 100).unwrap();

        let err = store.debit(TOKEN, ALICE, 101).unwrap_err();
        assert_eq!(
            err,
            BalanceError::InsufficientBalance {
                token: TOKEN,
                user: ALICE,
                available: 100,
                requested: 101,
            }
        );
        assert_eq!(store.read(TOKEN, ALICE), 100);
        assert_eq!(store.total_tracked(TOKEN), 100);
    }

    #[test]
    fn debit_unknown_pair_is_insufficient() {
        let mut store = BalanceStore::new();
        assert!(matches!(
            store.debit(TOKEN, BOB, 1),
            Err(BalanceError::InsufficientBalance { available: 0, .. })
        ));
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn credit_overflow_rejected() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, Amount::MAX).unwrap();
        assert!(matches!(
            store.credit(TOKEN, ALICE, 1),
            Err(BalanceError::Overflow { .. })
        ));
        assert_eq!(store.read(TOKEN, ALICE), Amount::MAX);
    }

    #[test]
    fn token_total_overflow_rejected_for_other_user() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, Amount::MAX).unwrap();
        assert!(store.check_credit(TOKEN, BOB, 1).is_err());
        assert!(store.credit(TOKEN, BOB, 1).is_err());
        assert_eq!(store.read(TOKEN, BOB), 0);
    }

    #[test]
    fn totals_follow_credits_and_debits() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, 70).unwrap();
        store.credit(TOKEN, BOB, 30).unwrap();
        store.credit(OTHER, BOB, 5).unwrap();
        store.debit(TOKEN, ALICE, 20).unwrap();

        assert_eq!(store.total_tracked(TOKEN), 80);
        assert_eq!(store.total_tracked(OTHER), 5);
    }

    #[test]
    fn totals_rebuilt_after_deserialization() {
        let mut store = BalanceStore::new();
        store.credit(TOKEN, ALICE, 70).unwrap();
        store.credit(TOKEN, BOB, 30).unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let mut back: BalanceStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.read(TOKEN, ALICE), 70);
        assert_eq!(back.total_tracked(TOKEN), 0);

        back.rebuild_totals().unwrap();
        assert_eq!(back.total_tracked(TOKEN), 100);
    }
}
