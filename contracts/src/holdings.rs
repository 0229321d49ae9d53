//! # Holdings Index
//!
//! Answers "which tokens does this user hold?" without scanning every token
//! the ledger has ever seen.
//!
//! Each user owns a dense `Vec<TokenId>` plus a presence map from token to
//! its slot in that vector. The presence map doubles as the membership flag
//! and makes removal O(1): the departing slot is filled with the last entry
//! and the vector shrinks by one. Order is therefore not stable and callers
//! must not depend on it.
//!
//! Invariant: `token ∈ tokens[user]` ⟺ `positions[user]` has `token`, and
//! the stored position points back at that very entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use custody_protocol::{AccountId, Amount, TokenId, MIN_TRACKED_BALANCE};

use crate::balance_store::BalanceStore;

/// Divergence between the token list and the presence map, detected when
/// validating an index that was loaded from outside.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// A token is listed but has no presence entry, or a stale one.
    #[error("token {token} listed for {user} at slot {slot} without a matching presence flag")]
    MissingPresence {
        user: AccountId,
        token: TokenId,
        slot: usize,
    },

    /// A presence entry exists for a token that is not listed.
    #[error("presence flag set for {token} but not listed for {user}")]
    DanglingPresence { user: AccountId, token: TokenId },
}

/// Per-user set of tracked tokens with swap-remove deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldingsIndex {
    tokens: HashMap<AccountId, Vec<TokenId>>,
    positions: HashMap<AccountId, HashMap<TokenId, usize>>,
}

impl HoldingsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presence flag for `(user, token)`.
    pub fn contains(&self, user: AccountId, token: TokenId) -> bool {
        self.positions
            .get(&user)
            .is_some_and(|slots| slots.contains_key(&token))
    }

    /// Adds `token` to `user`'s holdings. Returns `false` if it was already
    /// there, in which case nothing changes.
    pub fn track(&mut self, user: AccountId, token: TokenId) -> bool {
        if self.contains(user, token) {
            return false;
        }
        let list = self.tokens.entry(user).or_default();
        list.push(token);
        self.positions
            .entry(user)
            .or_default()
            .insert(token, list.len() - 1);
        true
    }

    /// Removes `token` from `user`'s holdings by swapping the last entry into
    /// its slot. Returns the slot it occupied, or `None` if it was absent.
    pub fn untrack(&mut self, user: AccountId, token: TokenId) -> Option<usize> {
        let slot = self.positions.get_mut(&user)?.remove(&token)?;

        let list = self.tokens.get_mut(&user)?;
        list.swap_remove(slot);
        if let Some(moved) = list.get(slot).copied() {
            if let Some(slots) = self.positions.get_mut(&user) {
                slots.insert(moved, slot);
            }
        }

        if list.is_empty() {
            self.tokens.remove(&user);
            self.positions.remove(&user);
        }
        Some(slot)
    }

    /// Exact inverse of [`untrack`](Self::untrack): puts `token` back into
    /// `slot` and moves the entry currently there to the end, where
    /// `swap_remove` took it from. Used to roll back a failed withdrawal.
    pub fn reinstate(&mut self, user: AccountId, token: TokenId, slot: usize) {
        if self.contains(user, token) {
            return;
        }
        let list = self.tokens.entry(user).or_default();
        list.push(token);
        let last = list.len() - 1;
        let slot = slot.min(last);
        list.swap(slot, last);

        let displaced = list[last];
        let slots = self.positions.entry(user).or_default();
        slots.insert(token, slot);
        if displaced != token {
            slots.insert(displaced, last);
        }
    }

    /// Snapshot of `user`'s tracked tokens. Order is unspecified.
    pub fn list(&self, user: AccountId) -> Vec<TokenId> {
        self.tokens.get(&user).cloned().unwrap_or_default()
    }

    /// Number of tokens tracked for `user`.
    pub fn len(&self, user: AccountId) -> usize {
        self.tokens.get(&user).map_or(0, Vec::len)
    }

    /// Tracked tokens whose current balance is at least
    /// [`MIN_TRACKED_BALANCE`], paired with that balance.
    ///
    /// Runs in two passes: the first counts qualifying entries so the result
    /// is allocated at its exact length, the second fills it. Stale entries
    /// left at zero are filtered out here even though withdrawals already
    /// untrack them.
    pub fn enumerate_nonzero(
        &self,
        user: AccountId,
        balances: &BalanceStore,
    ) -> Vec<(TokenId, Amount)> {
        let Some(list) = self.tokens.get(&user) else {
            return Vec::new();
        };

        let count = list
            .iter()
            .filter(|token| balances.read(**token, user) >= MIN_TRACKED_BALANCE)
            .count();

        let mut out = Vec::with_capacity(count);
        for token in list {
            let amount = balances.read(*token, user);
            if amount >= MIN_TRACKED_BALANCE {
                out.push((*token, amount));
            }
        }
        debug_assert_eq!(out.len(), count);
        out
    }

    /// Iterates `(user, token)` over every tracked pair.
    pub fn iter(&self) -> impl Iterator<Item = (AccountId, TokenId)> + '_ {
        self.tokens
            .iter()
            .flat_map(|(user, list)| list.iter().map(move |token| (*user, *token)))
    }

    /// Verifies that the token lists and presence maps agree entry for entry.
    pub fn check_consistency(&self) -> Result<(), IndexError> {
        for (user, list) in &self.tokens {
            let slots = self.positions.get(user);
            for (slot, token) in list.iter().enumerate() {
                if slots.and_then(|s| s.get(token)) != Some(&slot) {
                    return Err(IndexError::MissingPresence {
                        user: *user,
                        token: *token,
                        slot,
                    });
                }
            }
        }
        for (user, slots) in &self.positions {
            let list = self.tokens.get(user);
            for (token, slot) in slots {
                if list.and_then(|l| l.get(*slot)) != Some(token) {
                    return Err(IndexError::DanglingPresence {
                        user: *user,
                        token: *token,
                    });
                }
            }
        }
        Ok(())
    }
}
