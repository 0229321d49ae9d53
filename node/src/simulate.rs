//! # Scenario Simulation
//!
//! `custody-node simulate <file>` builds a fresh ledger over an in-memory
//! gateway, replays a list of operations, and reports what each one returned
//! along with the final holdings and event log. Handy for reproducing a
//! sequence of deposits and withdrawals without standing up the API.
//!
//! ```json
//! {
//!   "config": { "owner": "0x…01", "custody_account": "0x…c0" },
//!   "operations": [
//!     { "mint":     { "token": "0x…10", "to": "0x…a1", "amount": 1000 } },
//!     { "authorize":{ "token": "0x…10", "owner": "0x…a1", "amount": 1000 } },
//!     { "deposit":  { "caller": "0x…a1", "token": "0x…10", "amount": 400 } },
//!     { "withdraw": { "caller": "0x…a1", "token": "0x…10", "amount": 400 } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use custody_contracts::VaultLedger;
use custody_protocol::{
    AccountId, Amount, ConfigError, InMemoryGateway, LedgerConfig, LedgerEvent, TokenBehavior,
    TokenId, TransferGateway,
};

/// A scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub config: LedgerConfig,
    pub operations: Vec<Operation>,
}

/// One step. Gateway fixtures (`mint`, `authorize`, `behavior`,
/// `send_to_custody`) act on the in-memory gateway directly; the rest go
/// through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Mint {
        token: TokenId,
        to: AccountId,
        amount: Amount,
    },
    Authorize {
        token: TokenId,
        owner: AccountId,
        amount: Amount,
    },
    Behavior {
        token: TokenId,
        behavior: TokenBehavior,
    },
    SendToCustody {
        token: TokenId,
        from: AccountId,
        amount: Amount,
    },
    Deposit {
        caller: AccountId,
        token: TokenId,
        amount: Amount,
    },
    Withdraw {
        caller: AccountId,
        token: TokenId,
        amount: Amount,
    },
    Recover {
        caller: AccountId,
        token: TokenId,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Mint { .. } => "mint",
            Operation::Authorize { .. } => "authorize",
            Operation::Behavior { .. } => "behavior",
            Operation::SendToCustody { .. } => "send_to_custody",
            Operation::Deposit { .. } => "deposit",
            Operation::Withdraw { .. } => "withdraw",
            Operation::Recover { .. } => "recover",
        }
    }

    /// Accounts whose ledger holdings the report should include.
    fn ledger_account(&self) -> Option<AccountId> {
        match self {
            Operation::Deposit { caller, .. } | Operation::Withdraw { caller, .. } => {
                Some(*caller)
            }
            _ => None,
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: usize,
    pub op: String,
    /// Returned amount for ledger calls. Absent for fixtures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Amount>,
    /// Error kind, if the step was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One token a user holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub token: TokenId,
    pub balance: Amount,
}

/// Full simulation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub steps: Vec<StepOutcome>,
    pub holdings: BTreeMap<AccountId, Vec<Holding>>,
    pub custody: BTreeMap<TokenId, Amount>,
    pub events: Vec<LedgerEvent>,
}

/// Replays `scenario` against a fresh ledger.
///
/// # Errors
///
/// Fails before replaying anything if the scenario's config is rejected by
/// [`LedgerConfig::validate`].
pub fn run_scenario(scenario: Scenario) -> Result<SimulationReport, ConfigError> {
    scenario.config.validate()?;
    let gateway = Arc::new(InMemoryGateway::new(scenario.config.custody_account));
    let ledger = VaultLedger::new(scenario.config, gateway.clone());

    let mut accounts = BTreeSet::new();
    let mut tokens = BTreeSet::new();
    let mut steps = Vec::with_capacity(scenario.operations.len());

    for (step, op) in scenario.operations.into_iter().enumerate() {
        accounts.extend(op.ledger_account());
        let name = op.name().to_string();
        let outcome = match op {
            Operation::Mint { token, to, amount } => {
                gateway.mint(token, to, amount);
                fixture(true)
            }
            Operation::Authorize {
                token,
                owner,
                amount,
            } => fixture(gateway.set_authorization(token, owner, amount)),
            Operation::Behavior { token, behavior } => {
                gateway.set_behavior(token, behavior);
                fixture(true)
            }
            Operation::SendToCustody {
                token,
                from,
                amount,
            } => {
                tokens.insert(token);
                fixture(gateway.send_to_custody(token, from, amount))
            }
            Operation::Deposit {
                caller,
                token,
                amount,
            } => {
                tokens.insert(token);
                ledger.deposit(caller, token, amount).map(Some).map_err(|e| e.kind())
            }
            Operation::Withdraw {
                caller,
                token,
                amount,
            } => {
                tokens.insert(token);
                ledger.withdraw(caller, token, amount).map(Some).map_err(|e| e.kind())
            }
            Operation::Recover { caller, token } => {
                tokens.insert(token);
                ledger.recover(caller, token).map(Some).map_err(|e| e.kind())
            }
        };

        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(kind) => (None, Some(kind.to_string())),
        };
        if let Some(kind) = &error {
            tracing::debug!(step, op = %name, %kind, "step rejected");
        }
        steps.push(StepOutcome {
            step,
            op: name,
            value,
            error,
        });
    }

    let holdings = accounts
        .into_iter()
        .map(|user| {
            let mut held: Vec<Holding> = ledger
                .holdings(user)
                .into_iter()
                .map(|(token, balance)| Holding { token, balance })
                .collect();
            held.sort_by_key(|h| h.token);
            (user, held)
        })
        .collect();
    let custody = tokens
        .into_iter()
        .map(|token| (token, gateway.custodied_amount(token)))
        .collect();

    Ok(SimulationReport {
        steps,
        holdings,
        custody,
        events: ledger.events_since(0),
    })
}

/// Fixture steps carry no value; a refused one is reported as `refused`.
fn fixture(accepted: bool) -> Result<Option<Amount>, &'static str> {
    if accepted {
        Ok(None)
    } else {
        Err("refused")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_protocol::Address;

    const OWNER: Address = Address::from_low_u8(0x01);
    const CUSTODY: Address = Address::from_low_u8(0xC0);
    const ALICE: Address = Address::from_low_u8(0xA1);
    const TOKEN: Address = Address::from_low_u8(0x10);

    fn scenario(operations: serde_json::Value) -> Scenario {
        serde_json::from_value(serde_json::json!({
            "config": { "owner": OWNER, "custody_account": CUSTODY },
            "operations": operations,
        }))
        .unwrap()
    }

    #[test]
    fn replays_deposit_and_partial_withdraw() {
        let report = run_scenario(scenario(serde_json::json!([
            { "mint": { "token": TOKEN, "to": ALICE, "amount": 1000 } },
            { "authorize": { "token": TOKEN, "owner": ALICE, "amount": 1000 } },
            { "deposit": { "caller": ALICE, "token": TOKEN, "amount": 400 } },
            { "withdraw": { "caller": ALICE, "token": TOKEN, "amount": 150 } },
        ]))).unwrap();

        assert_eq!(report.steps[2].value, Some(400));
        assert_eq!(report.steps[3].value, Some(250));
        assert!(report.steps.iter().all(|s| s.error.is_none()));
        assert_eq!(
            report.holdings[&ALICE],
            vec![Holding {
                token: TOKEN,
                balance: 250
            }]
        );
        assert_eq!(report.custody[&TOKEN], 250);
        assert_eq!(report.events.len(), 2);
    }

    #[test]
    fn rejected_steps_report_error_kind() {
        let report = run_scenario(scenario(serde_json::json!([
            { "deposit": { "caller": ALICE, "token": TOKEN, "amount": 5 } },
            { "withdraw": { "caller": ALICE, "token": TOKEN, "amount": 5 } },
            { "recover": { "caller": ALICE, "token": TOKEN } },
        ]))).unwrap();

        let errors: Vec<_> = report
            .steps
            .iter()
            .map(|s| s.error.as_deref().unwrap_or("ok"))
            .collect();
        assert_eq!(
            errors,
            vec!["insufficient_authorization", "insufficient_balance", "not_owner"]
        );
        assert!(report.holdings[&ALICE].is_empty());
        assert!(report.events.is_empty());
    }

    #[test]
    fn stray_funds_are_recoverable() {
        let report = run_scenario(scenario(serde_json::json!([
            { "mint": { "token": TOKEN, "to": ALICE, "amount": 500 } },
            { "send_to_custody": { "token": TOKEN, "from": ALICE, "amount": 500 } },
            { "recover": { "caller": OWNER, "token": TOKEN } },
        ]))).unwrap();

        assert_eq!(report.steps[2].value, Some(500));
        assert_eq!(report.custody[&TOKEN], 0);
        assert_eq!(report.events[0].kind.name(), "recovered");
    }

    #[test]
    fn zero_owner_scenario_is_refused() {
        let scenario: Scenario = serde_json::from_value(serde_json::json!({
            "config": { "owner": Address::ZERO, "custody_account": CUSTODY },
            "operations": [
                { "recover": { "caller": Address::ZERO, "token": TOKEN } },
            ],
        }))
        .unwrap();
        assert_eq!(run_scenario(scenario).err(), Some(ConfigError::ZeroOwner));
    }

    #[test]
    fn report_serializes_with_hex_keys() {
        let report = run_scenario(scenario(serde_json::json!([]))).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["steps"].as_array().unwrap().is_empty());
        assert!(json["holdings"].as_object().unwrap().is_empty());
    }
}
