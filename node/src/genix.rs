//! # Genix Daemon Client
//!
//! [`LedgerClient`] over the Genix daemon's JSON-RPC interface. The daemon
//! reports amounts as decimal GENIX; they are converted to satoshis with
//! [`amount::from_json`] on the way in and rendered with
//! [`amount::from_satoshi`] on the way out, so no float ever touches a
//! value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use wgenix_protocol::amount::{self, Satoshis};
use wgenix_protocol::config::BACKEND_REQUEST_TIMEOUT;
use wgenix_protocol::ledger::{LedgerClient, MultisigAddress, UnspentOutput, Vouts};
use wgenix_protocol::settings::GenixRpcSettings;
use wgenix_protocol::{BridgeError, BridgeResult};

use crate::jsonrpc::{CallError, Credentials, JsonRpcClient};

/// Upper confirmation bound passed to `listunspent`.
const MAX_CONFIRMATIONS: u32 = 9_999_999;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenixMethod {
    GetBlockCount,
    GetBlockHash,
    GetReceivedByAddress,
    ListReceivedByAddress,
    ListUnspent,
    GetNewAddress,
    CreateMultisig,
    ImportAddress,
    ValidateAddress,
    CreateRawTransaction,
    DecodeRawTransaction,
    SignRawTransactionWithWallet,
    SendRawTransaction,
    GetNetworkInfo,
}

fn ledger_error(err: CallError) -> BridgeError {
    BridgeError::Ledger(err.to_string())
}

fn parse_amount(value: &Value) -> BridgeResult<Satoshis> {
    amount::from_json(value).map_err(|e| BridgeError::Ledger(e.to_string()))
}

// ---------------------------------------------------------------------------
// Daemon Reply Shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReceivedEntry {
    address: String,
    amount: Value,
}

#[derive(Debug, Deserialize)]
struct UnspentEntry {
    txid: String,
    vout: u32,
    #[serde(default)]
    address: String,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: String,
    amount: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultisigEntry {
    address: String,
    redeem_script: String,
}

#[derive(Debug, Deserialize)]
struct ValidateEntry {
    isvalid: bool,
}

#[derive(Debug, Deserialize)]
struct SignedEntry {
    hex: String,
    #[serde(default)]
    complete: bool,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    #[serde(default)]
    subversion: String,
    #[serde(default)]
    version: u64,
}

#[derive(Debug, Deserialize)]
struct DecodedInput {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecodedOutput {
    value: Value,
    #[serde(default)]
    script_pub_key: ScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct DecodedTransaction {
    vin: Vec<DecodedInput>,
    vout: Vec<DecodedOutput>,
}

impl DecodedOutput {
    /// Single destination address. Older daemons list it under
    /// `addresses`, newer ones under `address`.
    fn destination(&self) -> Option<String> {
        match (&self.script_pub_key.address, self.script_pub_key.addresses.as_slice()) {
            (Some(address), _) => Some(address.clone()),
            (None, [only]) => Some(only.clone()),
            _ => None,
        }
    }
}

/// Whether `decoded` spends exactly `inputs` into exactly `outputs`.
fn matches_decoded(decoded: &DecodedTransaction, inputs: &[UnspentOutput], outputs: &Vouts) -> BridgeResult<bool> {
    let mut expected_inputs: Vec<(String, u32)> = inputs.iter().map(|u| u.outpoint()).collect();
    let mut actual_inputs = Vec::with_capacity(decoded.vin.len());
    for input in &decoded.vin {
        match (&input.txid, input.vout) {
            (Some(txid), Some(vout)) => actual_inputs.push((txid.clone(), vout)),
            _ => return Ok(false),
        }
    }
    expected_inputs.sort();
    actual_inputs.sort();
    if expected_inputs != actual_inputs {
        return Ok(false);
    }

    if decoded.vout.len() != outputs.len() {
        return Ok(false);
    }
    let mut actual_outputs = Vouts::new();
    for output in &decoded.vout {
        let Some(address) = output.destination() else {
            return Ok(false);
        };
        let value = parse_amount(&output.value)?;
        if actual_outputs.insert(address, value).is_some() {
            return Ok(false);
        }
    }
    Ok(&actual_outputs == outputs)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GenixRpcClient {
    rpc: JsonRpcClient,
}

impl GenixRpcClient {
    pub fn new(settings: &GenixRpcSettings) -> BridgeResult<Self> {
        let rpc = JsonRpcClient::new(
            settings.url.clone(),
            "1.0",
            Credentials {
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            BACKEND_REQUEST_TIMEOUT,
        )
        .map_err(ledger_error)?;
        Ok(Self { rpc })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: GenixMethod, params: Value) -> BridgeResult<T> {
        self.rpc.call(method, params).await.map_err(ledger_error)
    }
}

#[async_trait]
impl LedgerClient for GenixRpcClient {
    async fn block_count(&self) -> BridgeResult<u64> {
        self.call(GenixMethod::GetBlockCount, json!([])).await
    }

    async fn block_hash(&self, height: u64) -> BridgeResult<String> {
        self.call(GenixMethod::GetBlockHash, json!([height])).await
    }

    async fn received_by_address(&self, confirmations: u32, address: &str) -> BridgeResult<Satoshis> {
        let value: Value = self
            .call(GenixMethod::GetReceivedByAddress, json!([address, confirmations]))
            .await?;
        parse_amount(&value)
    }

    async fn received_by_addresses(
        &self,
        confirmations: u32,
        addresses: &[String],
    ) -> BridgeResult<BTreeMap<String, Satoshis>> {
        // One listing covers every watched address; addresses that never
        // received anything are absent from it.
        let listed = self.list_received_by_address(confirmations).await?;
        Ok(addresses
            .iter()
            .map(|a| (a.clone(), listed.get(a).copied().unwrap_or(0)))
            .collect())
    }

    async fn list_received_by_address(&self, confirmations: u32) -> BridgeResult<BTreeMap<String, Satoshis>> {
        let entries: Vec<ReceivedEntry> = self
            .call(GenixMethod::ListReceivedByAddress, json!([confirmations, false, true]))
            .await?;
        let mut received = BTreeMap::new();
        for entry in entries {
            let amount = parse_amount(&entry.amount)?;
            if amount > 0 {
                received.insert(entry.address, amount);
            }
        }
        Ok(received)
    }

    async fn list_unspent(&self, confirmations: u32, addresses: &[String]) -> BridgeResult<Vec<UnspentOutput>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<UnspentEntry> = self
            .call(
                GenixMethod::ListUnspent,
                json!([confirmations, MAX_CONFIRMATIONS, addresses]),
            )
            .await?;
        entries
            .into_iter()
            .map(|e| {
                Ok(UnspentOutput {
                    amount: parse_amount(&e.amount)?,
                    txid: e.txid,
                    vout: e.vout,
                    address: e.address,
                    script_pub_key: e.script_pub_key,
                })
            })
            .collect()
    }

    async fn get_new_address(&self) -> BridgeResult<String> {
        self.call(GenixMethod::GetNewAddress, json!([])).await
    }

    async fn create_multisig(&self, threshold: usize, addresses: &[String]) -> BridgeResult<MultisigAddress> {
        let entry: MultisigEntry = self
            .call(GenixMethod::CreateMultisig, json!([threshold, addresses]))
            .await?;
        Ok(MultisigAddress {
            address: entry.address,
            redeem_script: entry.redeem_script,
        })
    }

    async fn import_address(&self, redeem_script: &str) -> BridgeResult<()> {
        // label "", no rescan, p2sh
        let _: Value = self
            .call(GenixMethod::ImportAddress, json!([redeem_script, "", false, true]))
            .await?;
        Ok(())
    }

    async fn verify_address(&self, address: &str) -> BridgeResult<bool> {
        let entry: ValidateEntry = self.call(GenixMethod::ValidateAddress, json!([address])).await?;
        Ok(entry.isvalid)
    }

    async fn create_raw_transaction(&self, inputs: &[UnspentOutput], outputs: &Vouts) -> BridgeResult<String> {
        let vin: Vec<Value> = inputs
            .iter()
            .map(|u| json!({"txid": u.txid, "vout": u.vout}))
            .collect();
        let vout: Map<String, Value> = outputs
            .iter()
            .map(|(address, value)| (address.clone(), Value::String(amount::from_satoshi(*value))))
            .collect();
        self.call(GenixMethod::CreateRawTransaction, json!([vin, vout])).await
    }

    async fn verify_raw_transaction(
        &self,
        inputs: &[UnspentOutput],
        outputs: &Vouts,
        raw: &str,
    ) -> BridgeResult<bool> {
        let decoded: DecodedTransaction = self.call(GenixMethod::DecodeRawTransaction, json!([raw])).await?;
        matches_decoded(&decoded, inputs, outputs)
    }

    async fn sign_raw_transaction(&self, raw: &str) -> BridgeResult<String> {
        let signed: SignedEntry = self
            .call(GenixMethod::SignRawTransactionWithWallet, json!([raw]))
            .await?;
        tracing::debug!(complete = signed.complete, "transaction signed by ledger wallet");
        Ok(signed.hex)
    }

    async fn send_raw_transaction(&self, raw: &str) -> BridgeResult<String> {
        self.call(GenixMethod::SendRawTransaction, json!([raw])).await
    }

    async fn client_version(&self) -> BridgeResult<String> {
        let info: NetworkInfo = self.call(GenixMethod::GetNetworkInfo, json!([])).await?;
        if info.subversion.is_empty() {
            Ok(info.version.to_string())
        } else {
            Ok(info.subversion)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgenix_protocol::amount::COIN;

    fn utxo(txid: &str, vout: u32) -> UnspentOutput {
        UnspentOutput {
            txid: txid.into(),
            vout,
            address: "gDeposit".into(),
            script_pub_key: "a914".into(),
            amount: 10 * COIN,
        }
    }

    fn decoded(raw: Value) -> DecodedTransaction {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn method_names_are_lowercase() {
        assert_eq!(
            serde_json::to_value(GenixMethod::SignRawTransactionWithWallet).unwrap(),
            "signrawtransactionwithwallet"
        );
        assert_eq!(serde_json::to_value(GenixMethod::ListUnspent).unwrap(), "listunspent");
    }

    #[test]
    fn decoded_transaction_must_match_exactly() {
        let inputs = vec![utxo("aa", 0), utxo("bb", 1)];
        let outputs = Vouts::from([("gDest".to_string(), 9 * COIN), ("gChange".to_string(), 150_000_000)]);
        let tx = decoded(json!({
            "vin": [{"txid": "bb", "vout": 1}, {"txid": "aa", "vout": 0}],
            "vout": [
                {"value": 9.0, "n": 0, "scriptPubKey": {"addresses": ["gDest"]}},
                {"value": 1.5, "n": 1, "scriptPubKey": {"address": "gChange"}}
            ]
        }));
        assert!(matches_decoded(&tx, &inputs, &outputs).unwrap());

        let short = decoded(json!({
            "vin": [{"txid": "aa", "vout": 0}],
            "vout": [
                {"value": 9.0, "scriptPubKey": {"addresses": ["gDest"]}},
                {"value": 1.5, "scriptPubKey": {"address": "gChange"}}
            ]
        }));
        assert!(!matches_decoded(&short, &inputs, &outputs).unwrap());

        let skimmed = decoded(json!({
            "vin": [{"txid": "aa", "vout": 0}, {"txid": "bb", "vout": 1}],
            "vout": [
                {"value": 8.99, "scriptPubKey": {"addresses": ["gDest"]}},
                {"value": 1.5, "scriptPubKey": {"address": "gChange"}}
            ]
        }));
        assert!(!matches_decoded(&skimmed, &inputs, &outputs).unwrap());
    }

    #[test]
    fn coinbase_inputs_never_match() {
        let tx = decoded(json!({"vin": [{"coinbase": "03"}], "vout": []}));
        assert!(!matches_decoded(&tx, &[], &Vouts::new()).unwrap());
    }
}
