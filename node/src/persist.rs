//! # Snapshot Persistence
//!
//! A devnet node keeps its ledger and the in-memory gateway behind it in one
//! JSON file. Both halves are needed: a restored ledger whose custody came
//! back empty would refuse every payout.
//!
//! Files are written to a sibling `.tmp` path and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use custody_contracts::{LedgerSnapshot, VaultLedger};
use custody_protocol::{GatewayState, InMemoryGateway};

/// Everything a node needs to resume where it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub ledger: LedgerSnapshot,
    pub gateway: GatewayState,
}

impl NodeSnapshot {
    /// Captures the current state of `ledger` and `gateway`.
    pub fn capture(ledger: &VaultLedger, gateway: &InMemoryGateway) -> Result<Self> {
        let ledger = ledger
            .snapshot()
            .context("ledger refused to snapshot")?;
        Ok(Self {
            ledger,
            gateway: gateway.export(),
        })
    }

    /// Rebuilds the gateway and the ledger on top of it.
    pub fn restore(self) -> Result<(Arc<InMemoryGateway>, VaultLedger)> {
        let gateway = Arc::new(InMemoryGateway::import(self.gateway));
        let ledger = VaultLedger::restore(self.ledger, gateway.clone())
            .context("snapshot failed validation")?;
        Ok((gateway, ledger))
    }
}

/// Reads a snapshot file. Returns `Ok(None)` if the file does not exist.
pub fn load(path: &Path) -> Result<Option<NodeSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let snapshot = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Writes a snapshot file atomically.
pub fn save(path: &Path, snapshot: &NodeSnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot).context("failed to serialize snapshot")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("failed to write snapshot {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move snapshot into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_protocol::{Address, LedgerConfig, TransferGateway};

    const OWNER: Address = Address::from_low_u8(0x01);
    const CUSTODY: Address = Address::from_low_u8(0xC0);
    const ALICE: Address = Address::from_low_u8(0xA1);
    const TOKEN: Address = Address::from_low_u8(0x10);

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn save_load_restore_round_trip() {
        let gateway = Arc::new(InMemoryGateway::new(CUSTODY));
        gateway.mint(TOKEN, ALICE, 1_000);
        gateway.set_authorization(TOKEN, ALICE, 1_000);
        let ledger = VaultLedger::new(LedgerConfig::new(OWNER, CUSTODY), gateway.clone());
        ledger.deposit(ALICE, TOKEN, 400).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        save(&path, &NodeSnapshot::capture(&ledger, &gateway).unwrap()).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let (gateway, restored) = load(&path).unwrap().unwrap().restore().unwrap();
        assert_eq!(restored.balance(TOKEN, ALICE), 400);
        assert_eq!(gateway.custodied_amount(TOKEN), 400);

        // Custody came back too, so the payout goes through.
        assert_eq!(restored.withdraw(ALICE, TOKEN, 400), Ok(0));
        assert_eq!(gateway.external_balance(TOKEN, ALICE), 1_000);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(load(&path).is_err());
    }
}
