//! # Account-Chain Contract Client
//!
//! Read access to the wrapped-token contract: mint history per mint
//! address and burn history per burn address. Message and call signing
//! live in [`crate::crypto`]; the authority's own wallet signs, the
//! contract client only reads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::{self, Satoshis};
use crate::error::BridgeResult;

/// Mint state of one (mint address, deposit address) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintHistory {
    pub mint_nonce: u64,
    #[serde(with = "amount::decimal")]
    pub minted_amount: Satoshis,
}

/// One burn recorded by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRecord {
    /// Ledger address the burned tokens are to be released to.
    pub burn_destination: String,
    #[serde(with = "amount::decimal")]
    pub burn_amount: Satoshis,
}

/// Account-chain address shape: `0x` and 40 hex digits.
pub fn is_account_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .map(|body| body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

#[async_trait]
pub trait ContractClient: Send + Sync {
    fn is_address(&self, address: &str) -> bool {
        is_account_address(address)
    }

    async fn mint_history(
        &self,
        mint_address: &str,
        deposit_address: &str,
    ) -> BridgeResult<MintHistory>;

    /// Every burn made by `burn_address`, index order.
    async fn burn_history(&self, burn_address: &str) -> BridgeResult<Vec<BurnRecord>>;

    async fn burn_record(&self, burn_address: &str, burn_index: u64) -> BridgeResult<BurnRecord>;

    async fn burn_records(&self, keys: &[(String, u64)]) -> BridgeResult<Vec<BurnRecord>> {
        let mut records = Vec::with_capacity(keys.len());
        for (address, index) in keys {
            records.push(self.burn_record(address, *index).await?);
        }
        Ok(records)
    }
}
