//! # UTXO Ledger Client
//!
//! The narrow interface the protocol consumes from the Genix ledger node.
//! The node binary implements it over the daemon's JSON-RPC; tests and
//! local rehearsals use [`crate::sim::SimLedger`].
//!
//! Amounts cross this boundary in satoshis. Implementations convert from
//! whatever display unit their backend speaks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::amount::{self, Satoshis};
use crate::error::BridgeResult;

/// Transaction outputs keyed by destination address. Ordered, so every
/// authority iterates it identically.
pub type Vouts = BTreeMap<String, Satoshis>;

/// One spendable output held by a custody address.
///
/// Equality covers every field: two authorities agree on a UTXO only if
/// they agree on all of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: String,
    #[serde(with = "amount::decimal")]
    pub amount: Satoshis,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }
}

/// An M-of-N multisig custody address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigAddress {
    pub address: String,
    pub redeem_script: String,
}

pub fn total_value(outputs: &[UnspentOutput]) -> Satoshis {
    outputs.iter().map(|u| u.amount).sum()
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current tip height.
    async fn block_count(&self) -> BridgeResult<u64>;

    async fn block_hash(&self, height: u64) -> BridgeResult<String>;

    /// Total ever received by `address` with at least `confirmations`.
    async fn received_by_address(&self, confirmations: u32, address: &str)
        -> BridgeResult<Satoshis>;

    async fn received_by_addresses(
        &self,
        confirmations: u32,
        addresses: &[String],
    ) -> BridgeResult<BTreeMap<String, Satoshis>> {
        let mut received = BTreeMap::new();
        for address in addresses {
            let amount = self.received_by_address(confirmations, address).await?;
            received.insert(address.clone(), amount);
        }
        Ok(received)
    }

    /// Every watched address that has received a non-zero amount.
    async fn list_received_by_address(
        &self,
        confirmations: u32,
    ) -> BridgeResult<BTreeMap<String, Satoshis>>;

    async fn list_unspent(
        &self,
        confirmations: u32,
        addresses: &[String],
    ) -> BridgeResult<Vec<UnspentOutput>>;

    async fn get_new_address(&self) -> BridgeResult<String>;

    async fn create_multisig(
        &self,
        threshold: usize,
        addresses: &[String],
    ) -> BridgeResult<MultisigAddress>;

    /// Start watching a redeem script.
    async fn import_address(&self, redeem_script: &str) -> BridgeResult<()>;

    async fn verify_address(&self, address: &str) -> BridgeResult<bool>;

    async fn create_raw_transaction(
        &self,
        inputs: &[UnspentOutput],
        outputs: &Vouts,
    ) -> BridgeResult<String>;

    /// Whether `raw` spends exactly `inputs` into exactly `outputs`.
    async fn verify_raw_transaction(
        &self,
        inputs: &[UnspentOutput],
        outputs: &Vouts,
        raw: &str,
    ) -> BridgeResult<bool>;

    /// Add this node's signature, returning the augmented transaction.
    async fn sign_raw_transaction(&self, raw: &str) -> BridgeResult<String>;

    /// Broadcast a fully signed transaction, returning its txid.
    async fn send_raw_transaction(&self, raw: &str) -> BridgeResult<String>;

    async fn client_version(&self) -> BridgeResult<String>;
}
