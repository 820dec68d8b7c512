//! Contract indexer client.
//!
//! The wrapped-token contract is read through an indexer at the network's
//! `provider` URL, which serves the contract's mint and burn history as
//! JSON-RPC 2.0 methods. Amounts come back as decimal strings of smallest
//! units.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use wgenix_protocol::config::BACKEND_REQUEST_TIMEOUT;
use wgenix_protocol::contract::{BurnRecord, ContractClient, MintHistory};
use wgenix_protocol::settings::NetworkSettings;
use wgenix_protocol::{BridgeError, BridgeResult};

use crate::jsonrpc::{CallError, Credentials, JsonRpcClient};

#[derive(Debug, Clone, Copy, Serialize)]
pub enum IndexerMethod {
    #[serde(rename = "wgenix_mintHistory")]
    MintHistory,
    #[serde(rename = "wgenix_burnHistory")]
    BurnHistory,
    #[serde(rename = "wgenix_burnRecord")]
    BurnRecord,
    #[serde(rename = "wgenix_burnRecords")]
    BurnRecords,
}

#[derive(Debug, Deserialize)]
struct BurnList {
    burns: Vec<BurnRecord>,
}

fn contract_error(err: CallError) -> BridgeError {
    BridgeError::Contract(err.to_string())
}

pub struct ContractIndexerClient {
    rpc: JsonRpcClient,
    contract_address: String,
    chain_id: u64,
}

impl ContractIndexerClient {
    pub fn new(settings: &NetworkSettings) -> BridgeResult<Self> {
        let rpc = JsonRpcClient::new(
            settings.provider.clone(),
            "2.0",
            Credentials::default(),
            BACKEND_REQUEST_TIMEOUT,
        )
        .map_err(contract_error)?;
        Ok(Self {
            rpc,
            contract_address: settings.contract_address.clone(),
            chain_id: settings.chain_id,
        })
    }

    fn scope(&self) -> serde_json::Value {
        json!({"chainId": self.chain_id, "contract": self.contract_address})
    }
}

#[async_trait]
impl ContractClient for ContractIndexerClient {
    async fn mint_history(&self, mint_address: &str, deposit_address: &str) -> BridgeResult<MintHistory> {
        self.rpc
            .call(IndexerMethod::MintHistory, json!([self.scope(), mint_address, deposit_address]))
            .await
            .map_err(contract_error)
    }

    async fn burn_history(&self, burn_address: &str) -> BridgeResult<Vec<BurnRecord>> {
        let list: BurnList = self
            .rpc
            .call(IndexerMethod::BurnHistory, json!([self.scope(), burn_address]))
            .await
            .map_err(contract_error)?;
        Ok(list.burns)
    }

    async fn burn_record(&self, burn_address: &str, burn_index: u64) -> BridgeResult<BurnRecord> {
        self.rpc
            .call(IndexerMethod::BurnRecord, json!([self.scope(), burn_address, burn_index]))
            .await
            .map_err(contract_error)
    }

    async fn burn_records(&self, keys: &[(String, u64)]) -> BridgeResult<Vec<BurnRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<_> = keys
            .iter()
            .map(|(address, index)| json!({"burnAddress": address, "burnIndex": index}))
            .collect();
        let list: BurnList = self
            .rpc
            .call(IndexerMethod::BurnRecords, json!([self.scope(), keys]))
            .await
            .map_err(contract_error)?;
        if list.burns.len() != keys.len() {
            return Err(BridgeError::Contract(format!(
                "indexer returned {} burns for {} keys",
                list.burns.len(),
                keys.len()
            )));
        }
        Ok(list.burns)
    }
}
