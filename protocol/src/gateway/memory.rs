//! In-memory [`TransferGateway`] used by the devnet node and the test suites.
//!
//! Keeps three books per token: external account balances, authorizations
//! granted to the ledger, and the custody account's holdings. Tokens can be
//! switched into non-standard modes to reproduce the awkward contracts the
//! ledger has to survive.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use super::TransferGateway;
use crate::address::{AccountId, Address, TokenId};
use crate::Amount;

/// How a token contract behaves when the gateway talks to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBehavior {
    /// Plain fungible token.
    #[default]
    Standard,
    /// Refuses to move an authorization from one non-zero value to another.
    RequiresAllowanceReset,
    /// Every transfer and authorization change returns `false`.
    Failing,
}

#[derive(Debug, Default)]
struct Books {
    external: HashMap<(TokenId, AccountId), Amount>,
    authorizations: HashMap<(TokenId, AccountId), Amount>,
    custody: HashMap<TokenId, Amount>,
    behaviors: HashMap<TokenId, TokenBehavior>,
}

impl Books {
    fn behavior(&self, token: TokenId) -> TokenBehavior {
        self.behaviors.get(&token).copied().unwrap_or_default()
    }
}

/// Serializable copy of an [`InMemoryGateway`]'s books, so a devnet node
/// can persist custody alongside the ledger it backs.
///
/// Entries are sorted, which keeps exported files diffable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayState {
    pub custody_account: Address,
    pub external: Vec<(TokenId, AccountId, Amount)>,
    pub authorizations: Vec<(TokenId, AccountId, Amount)>,
    pub custody: Vec<(TokenId, Amount)>,
    pub behaviors: Vec<(TokenId, TokenBehavior)>,
}

/// Thread-safe in-memory asset transport.
#[derive(Debug)]
pub struct InMemoryGateway {
    custody_account: Address,
    books: Mutex<Books>,
}

impl InMemoryGateway {
    /// Creates an empty gateway whose custody is held by `custody_account`.
    pub fn new(custody_account: Address) -> Self {
        Self {
            custody_account,
            books: Mutex::new(Books::default()),
        }
    }

    /// Rebuilds a gateway from exported books.
    pub fn import(state: GatewayState) -> Self {
        let books = Books {
            external: state
                .external
                .into_iter()
                .map(|(token, account, amount)| ((token, account), amount))
                .collect(),
            authorizations: state
                .authorizations
                .into_iter()
                .map(|(token, owner, amount)| ((token, owner), amount))
                .collect(),
            custody: state.custody.into_iter().collect(),
            behaviors: state.behaviors.into_iter().collect(),
        };
        Self {
            custody_account: state.custody_account,
            books: Mutex::new(books),
        }
    }

    /// Copies the current books.
    pub fn export(&self) -> GatewayState {
        let books = self.books.lock();
        let pairs = |map: &HashMap<(TokenId, AccountId), Amount>| {
            let mut out: Vec<_> = map
                .iter()
                .filter(|(_, amount)| **amount > 0)
                .map(|((token, account), amount)| (*token, *account, *amount))
                .collect();
            out.sort_unstable();
            out
        };

        let mut custody: Vec<_> = books.custody.iter().map(|(t, a)| (*t, *a)).collect();
        custody.sort_unstable();
        let mut behaviors: Vec<_> = books.behaviors.iter().map(|(t, b)| (*t, *b)).collect();
        behaviors.sort_unstable_by_key(|(token, _)| *token);

        GatewayState {
            custody_account: self.custody_account,
            external: pairs(&books.external),
            authorizations: pairs(&books.authorizations),
            custody,
            behaviors,
        }
    }

    /// The account that holds custodied funds.
    pub fn custody_account(&self) -> Address {
        self.custody_account
    }

    /// Switches `token` into a (possibly non-standard) behavior.
    pub fn set_behavior(&self, token: TokenId, behavior: TokenBehavior) {
        self.books.lock().behaviors.insert(token, behavior);
    }

    /// Credits `amount` of `token` to an external account out of thin air.
    ///
    /// Saturates at `Amount::MAX`; this is a fixture, not a token.
    pub fn mint(&self, token: TokenId, to: AccountId, amount: Amount) {
        let mut books = self.books.lock();
        let balance = books.external.entry((token, to)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// External (non-custodied) balance of `account`.
    pub fn external_balance(&self, token: TokenId, account: AccountId) -> Amount {
        self.books
            .lock()
            .external
            .get(&(token, account))
            .copied()
            .unwrap_or(0)
    }

    /// Plain transfer from an external account straight into custody,
    /// bypassing the ledger. This is how stray funds end up recoverable.
    pub fn send_to_custody(&self, token: TokenId, from: AccountId, amount: Amount) -> bool {
        let mut books = self.books.lock();
        if books.behavior(token) == TokenBehavior::Failing {
            return false;
        }
        let available = books.external.get(&(token, from)).copied().unwrap_or(0);
        if available < amount {
            return false;
        }
        books.external.insert((token, from), available - amount);
        let held = books.custody.entry(token).or_insert(0);
        *held = held.saturating_add(amount);
        true
    }
}

impl TransferGateway for InMemoryGateway {
    fn pull(&self, token: TokenId, from: AccountId, amount: Amount) -> bool {
        let mut books = self.books.lock();
        if books.behavior(token) == TokenBehavior::Failing {
            return false;
        }

        let allowed = books
            .authorizations
            .get(&(token, from))
            .copied()
            .unwrap_or(0);
        let available = books.external.get(&(token, from)).copied().unwrap_or(0);
        if allowed < amount || available < amount {
            trace!(%token, %from, amount, allowed, available, "pull refused");
            return false;
        }
        let Some(held) = books.custody.get(&token).copied().unwrap_or(0).checked_add(amount) else {
            return false;
        };

        books.authorizations.insert((token, from), allowed - amount);
        books.external.insert((token, from), available - amount);
        books.custody.insert(token, held);
        true
    }

    fn push(&self, token: TokenId, to: AccountId, amount: Amount) -> bool {
        let mut books = self.books.lock();
        if books.behavior(token) == TokenBehavior::Failing {
            return false;
        }

        let held = books.custody.get(&token).copied().unwrap_or(0);
        if held < amount {
            trace!(%token, %to, amount, held, "push exceeds custody");
            return false;
        }
        let balance = books.external.get(&(token, to)).copied().unwrap_or(0);
        let Some(new_balance) = balance.checked_add(amount) else {
            return false;
        };

        books.custody.insert(token, held - amount);
        books.external.insert((token, to), new_balance);
        true
    }

    fn authorized_amount(&self, token: TokenId, owner: AccountId) -> Amount {
        self.books
            .lock()
            .authorizations
            .get(&(token, owner))
            .copied()
            .unwrap_or(0)
    }

    fn set_authorization(&self, token: TokenId, owner: AccountId, amount: Amount) -> bool {
        let mut books = self.books.lock();
        let current = books
            .authorizations
            .get(&(token, owner))
            .copied()
            .unwrap_or(0);

        match books.behavior(token) {
            TokenBehavior::Failing => return false,
            TokenBehavior::RequiresAllowanceReset if current != 0 && amount != 0 => {
                trace!(%token, %owner, current, amount, "authorization change needs reset");
                return false;
            }
            _ => {}
        }

        books.authorizations.insert((token, owner), amount);
        true
    }

    fn custodied_amount(&self, token: TokenId) -> Amount {
        self.books.lock().custody.get(&token).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: Address = Address::from_low_u8(0x10);
    const ALICE: Address = Address::from_low_u8(0xA1);
    const CUSTODY: Address = Address::from_low_u8(0xC0);

    fn funded(amount: Amount) -> InMemoryGateway {
        let gw = InMemoryGateway::new(CUSTODY);
        gw.mint(TOKEN, ALICE, amount);
        gw
    }

    #[test]
    fn pull_requires_authorization() {
        let gw = funded(100);
        assert!(!gw.pull(TOKEN, ALICE, 50));

        assert!(gw.set_authorization(TOKEN, ALICE, 50));
        assert!(gw.pull(TOKEN, ALICE, 50));
        assert_eq!(gw.external_balance(TOKEN, ALICE), 50);
        assert_eq!(gw.custodied_amount(TOKEN), 50);
        assert_eq!(gw.authorized_amount(TOKEN, ALICE), 0);
    }

    #[test]
    fn pull_requires_external_balance() {
        let gw = funded(10);
        gw.set_authorization(TOKEN, ALICE, 1_000);
        assert!(!gw.pull(TOKEN, ALICE, 11));
        assert_eq!(gw.custodied_amount(TOKEN), 0);
    }

    #[test]
    fn push_moves_custody_out() {
        let gw = funded(100);
        gw.set_authorization(TOKEN, ALICE, 100);
        gw.pull(TOKEN, ALICE, 100);

        assert!(gw.push(TOKEN, ALICE, 40));
        assert_eq!(gw.custodied_amount(TOKEN), 60);
        assert_eq!(gw.external_balance(TOKEN, ALICE), 40);
        assert!(!gw.push(TOKEN, ALICE, 61));
    }

    #[test]
    fn reset_token_refuses_nonzero_to_nonzero() {
        let gw = funded(100);
        gw.set_behavior(TOKEN, TokenBehavior::RequiresAllowanceReset);

        assert!(gw.set_authorization(TOKEN, ALICE, 10));
        assert!(!gw.set_authorization(TOKEN, ALICE, 20));
        assert!(gw.set_authorization(TOKEN, ALICE, 0));
        assert!(gw.set_authorization(TOKEN, ALICE, 20));
        assert_eq!(gw.authorized_amount(TOKEN, ALICE), 20);
    }

    #[test]
    fn failing_token_refuses_everything() {
        let gw = funded(100);
        gw.set_behavior(TOKEN, TokenBehavior::Failing);
        assert!(!gw.set_authorization(TOKEN, ALICE, 10));
        assert!(!gw.pull(TOKEN, ALICE, 1));
        assert!(!gw.send_to_custody(TOKEN, ALICE, 1));
        assert!(!gw.push(TOKEN, ALICE, 0));
    }

    #[test]
    fn export_import_preserves_books() {
        let gw = funded(500);
        gw.set_behavior(TOKEN, TokenBehavior::RequiresAllowanceReset);
        gw.set_authorization(TOKEN, ALICE, 200);
        gw.pull(TOKEN, ALICE, 150);

        let state = gw.export();
        assert_eq!(state.external, vec![(TOKEN, ALICE, 350)]);
        assert_eq!(state.authorizations, vec![(TOKEN, ALICE, 50)]);
        assert_eq!(state.custody, vec![(TOKEN, 150)]);

        let json = serde_json::to_string(&state).unwrap();
        let back = InMemoryGateway::import(serde_json::from_str(&json).unwrap());
        assert_eq!(back.custody_account(), CUSTODY);
        assert_eq!(back.external_balance(TOKEN, ALICE), 350);
        assert_eq!(back.custodied_amount(TOKEN), 150);
        // Behavior survives: non-zero to non-zero is still refused.
        assert!(!back.set_authorization(TOKEN, ALICE, 60));
    }

    #[test]
    fn send_to_custody_bypasses_authorization() {
        let gw = funded(500);
        assert!(gw.send_to_custody(TOKEN, ALICE, 500));
        assert_eq!(gw.custodied_amount(TOKEN), 500);
        assert_eq!(gw.external_balance(TOKEN, ALICE), 0);
    }
}
