//! Simulated wrapped-token contract: in-memory mint and burn history.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::amount::Satoshis;
use crate::contract::{BurnRecord, ContractClient, MintHistory};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Default)]
pub struct SimContract {
    mints: Mutex<HashMap<String, MintHistory>>,
    burns: Mutex<HashMap<String, Vec<BurnRecord>>>,
}

impl SimContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed mint of `amount` to `mint_address`.
    pub fn mint(&self, mint_address: &str, amount: Satoshis) {
        let mut mints = self.mints.lock();
        let entry = mints.entry(mint_address.to_ascii_lowercase()).or_default();
        entry.mint_nonce += 1;
        entry.minted_amount += amount;
    }

    /// Burn `amount` from `burn_address` towards `destination`; returns the burn index.
    pub fn burn(&self, burn_address: &str, destination: &str, amount: Satoshis) -> u64 {
        let mut burns = self.burns.lock();
        let history = burns.entry(burn_address.to_ascii_lowercase()).or_default();
        history.push(BurnRecord {
            burn_destination: destination.to_string(),
            burn_amount: amount,
        });
        (history.len() - 1) as u64
    }
}

#[async_trait]
impl ContractClient for SimContract {
    async fn mint_history(&self, mint_address: &str, _deposit_address: &str) -> BridgeResult<MintHistory> {
        Ok(self
            .mints
            .lock()
            .get(&mint_address.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn burn_history(&self, burn_address: &str) -> BridgeResult<Vec<BurnRecord>> {
        Ok(self
            .burns
            .lock()
            .get(&burn_address.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn burn_record(&self, burn_address: &str, burn_index: u64) -> BridgeResult<BurnRecord> {
        self.burns
            .lock()
            .get(&burn_address.to_ascii_lowercase())
            .and_then(|h| h.get(burn_index as usize))
            .cloned()
            .ok_or_else(|| {
                BridgeError::Contract(format!("no burn #{burn_index} for {burn_address}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    #[tokio::test]
    async fn burns_are_indexed_per_address() {
        let contract = SimContract::new();
        assert_eq!(contract.burn(ALICE, "gDest", 500), 0);
        assert_eq!(contract.burn(ALICE, "gOther", 700), 1);
        let rec = contract.burn_record(ALICE, 1).await.unwrap();
        assert_eq!(rec.burn_amount, 700);
        assert_eq!(contract.burn_history(ALICE).await.unwrap().len(), 2);
        assert!(contract.burn_record(ALICE, 2).await.is_err());

        let batch = contract
            .burn_records(&[(ALICE.to_string(), 1), (ALICE.to_string(), 0)])
            .await
            .unwrap();
        assert_eq!(batch[0].burn_destination, "gOther");
        assert_eq!(batch[1].burn_destination, "gDest");
    }

    #[tokio::test]
    async fn mint_history_accumulates() {
        let contract = SimContract::new();
        assert_eq!(contract.mint_history(ALICE, "g").await.unwrap(), MintHistory::default());
        contract.mint(ALICE, 10);
        contract.mint(ALICE, 5);
        let history = contract.mint_history(ALICE, "g").await.unwrap();
        assert_eq!(history.mint_nonce, 2);
        assert_eq!(history.minted_amount, 15);
    }
}
