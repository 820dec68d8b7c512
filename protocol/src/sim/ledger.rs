//! Simulated UTXO ledger.
//!
//! One [`SimChain`] is the shared ground truth (blocks, received amounts,
//! the UTXO set, known multisig scripts). Each authority talks to it through
//! its own [`SimLedger`], which plays the role of that authority's ledger
//! daemon: it mints fresh individual addresses and signs with its own key.
//!
//! Raw transactions are hex-encoded JSON:
//!
//! ```text
//! {"inputs":[{"txid":..,"vout":..}], "outputs":{"addr":"amount"}, "signatures":["node0", ..]}
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::amount::{self, Satoshis};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{LedgerClient, MultisigAddress, UnspentOutput, Vouts};

#[derive(Debug, Clone)]
struct SimOutput {
    utxo: UnspentOutput,
    /// Height of the block that includes it; `None` while in the mempool.
    height: Option<u64>,
    spent: bool,
}

#[derive(Debug, Clone)]
struct Multisig {
    threshold: usize,
    owners: BTreeSet<usize>,
}

#[derive(Debug, Default)]
struct ChainState {
    tip: u64,
    fork_salt: u64,
    fork_height: u64,
    outputs: Vec<SimOutput>,
    multisigs: BTreeMap<String, Multisig>,
    address_owners: BTreeMap<String, usize>,
    next_address: u64,
    next_txid: u64,
    broadcasts: Vec<String>,
}

impl ChainState {
    fn confirmations(&self, height: Option<u64>) -> u64 {
        match height {
            Some(h) if h <= self.tip => self.tip - h + 1,
            _ => 0,
        }
    }

    fn block_hash(&self, height: u64) -> String {
        let salt = if height >= self.fork_height { self.fork_salt } else { 0 };
        let mut hasher = Sha256::new();
        hasher.update(b"sim-block");
        hasher.update(salt.to_be_bytes());
        hasher.update(height.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    fn script_for(address: &str) -> String {
        let digest = Sha256::digest(address.as_bytes());
        format!("a914{}87", hex::encode(&digest[..20]))
    }

    fn add_output(&mut self, txid: String, vout: u32, address: &str, amount: Satoshis) -> UnspentOutput {
        let utxo = UnspentOutput {
            txid,
            vout,
            address: address.to_string(),
            script_pub_key: Self::script_for(address),
            amount,
        };
        self.outputs.push(SimOutput {
            utxo: utxo.clone(),
            height: None,
            spent: false,
        });
        utxo
    }

    fn fresh_txid(&mut self, seed: &[u8]) -> String {
        self.next_txid += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.next_txid.to_be_bytes());
        hasher.update(seed);
        hex::encode(hasher.finalize())
    }
}

/// Shared simulated chain.
#[derive(Debug, Default)]
pub struct SimChain {
    state: Mutex<ChainState>,
}

impl SimChain {
    pub fn new(tip: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                tip,
                fork_height: u64::MAX,
                ..Default::default()
            }),
        })
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().tip
    }

    /// Advance the tip by `blocks`, confirming everything in the mempool
    /// into the first new block.
    pub fn mine(&self, blocks: u64) {
        let mut state = self.state.lock();
        if blocks == 0 {
            return;
        }
        let first = state.tip + 1;
        for output in state.outputs.iter_mut().filter(|o| o.height.is_none()) {
            output.height = Some(first);
        }
        state.tip += blocks;
    }

    /// Replace every block from `height` upward with a different fork.
    pub fn fork_from(&self, height: u64) {
        let mut state = self.state.lock();
        state.fork_salt += 1;
        state.fork_height = height;
    }

    /// Pay `amount` to `address` from outside the federation. The payment
    /// sits in the mempool until the next [`mine`](Self::mine).
    pub fn deposit(&self, address: &str, amount: Satoshis) -> UnspentOutput {
        let mut state = self.state.lock();
        let txid = state.fresh_txid(address.as_bytes());
        state.add_output(txid, 0, address, amount)
    }

    /// Raw transactions accepted by [`LedgerClient::send_raw_transaction`].
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().broadcasts.clone()
    }

    /// Total ever paid to `address`, confirmed or not.
    pub fn total_received(&self, address: &str) -> Satoshis {
        self.state
            .lock()
            .outputs
            .iter()
            .filter(|o| o.utxo.address == address)
            .map(|o| o.utxo.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SimInput {
    txid: String,
    vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SimRawTransaction {
    inputs: Vec<SimInput>,
    outputs: BTreeMap<String, String>,
    signatures: Vec<String>,
}

impl SimRawTransaction {
    fn build(inputs: &[UnspentOutput], outputs: &Vouts) -> Self {
        Self {
            inputs: inputs
                .iter()
                .map(|u| SimInput {
                    txid: u.txid.clone(),
                    vout: u.vout,
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|(a, v)| (a.clone(), amount::from_satoshi(*v)))
                .collect(),
            signatures: Vec::new(),
        }
    }

    fn encode(&self) -> BridgeResult<String> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    fn decode(raw: &str) -> BridgeResult<Self> {
        let bytes = hex::decode(raw).map_err(|e| BridgeError::Ledger(format!("TX decode failed: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| BridgeError::Ledger(format!("TX decode failed: {e}")))
    }

    fn same_body(&self, other: &Self) -> bool {
        self.inputs == other.inputs && self.outputs == other.outputs
    }
}

/// One authority's view of the simulated chain.
#[derive(Debug)]
pub struct SimLedger {
    chain: Arc<SimChain>,
    node: usize,
    imported: Mutex<BTreeSet<String>>,
}

impl SimLedger {
    pub fn new(chain: Arc<SimChain>, node: usize) -> Self {
        Self {
            chain,
            node,
            imported: Mutex::new(BTreeSet::new()),
        }
    }

    fn signer(&self) -> String {
        format!("node{}", self.node)
    }

    pub fn imported_scripts(&self) -> BTreeSet<String> {
        self.imported.lock().clone()
    }
}

#[async_trait]
impl LedgerClient for SimLedger {
    async fn block_count(&self) -> BridgeResult<u64> {
        Ok(self.chain.tip())
    }

    async fn block_hash(&self, height: u64) -> BridgeResult<String> {
        let state = self.chain.state.lock();
        if height > state.tip {
            return Err(BridgeError::Ledger(format!("Block height out of range: {height}")));
        }
        Ok(state.block_hash(height))
    }

    async fn received_by_address(&self, confirmations: u32, address: &str) -> BridgeResult<Satoshis> {
        let state = self.chain.state.lock();
        Ok(state
            .outputs
            .iter()
            .filter(|o| o.utxo.address == address)
            .filter(|o| state.confirmations(o.height) >= confirmations as u64)
            .map(|o| o.utxo.amount)
            .sum())
    }

    async fn list_received_by_address(&self, confirmations: u32) -> BridgeResult<BTreeMap<String, Satoshis>> {
        let state = self.chain.state.lock();
        let mut received = BTreeMap::new();
        for output in &state.outputs {
            if state.confirmations(output.height) >= confirmations as u64 {
                *received.entry(output.utxo.address.clone()).or_insert(0) += output.utxo.amount;
            }
        }
        // Like the daemon, an address that only saw zero-value outputs is
        // still listed.
        Ok(received)
    }

    async fn list_unspent(&self, confirmations: u32, addresses: &[String]) -> BridgeResult<Vec<UnspentOutput>> {
        let state = self.chain.state.lock();
        let wanted: BTreeSet<&String> = addresses.iter().collect();
        let mut unspent: Vec<UnspentOutput> = state
            .outputs
            .iter()
            .filter(|o| !o.spent && wanted.contains(&o.utxo.address))
            .filter(|o| state.confirmations(o.height) >= confirmations as u64)
            .map(|o| o.utxo.clone())
            .collect();
        unspent.sort();
        Ok(unspent)
    }

    async fn get_new_address(&self) -> BridgeResult<String> {
        let mut state = self.chain.state.lock();
        state.next_address += 1;
        let address = format!("gN{}a{}", self.node, state.next_address);
        state.address_owners.insert(address.clone(), self.node);
        Ok(address)
    }

    async fn create_multisig(&self, threshold: usize, addresses: &[String]) -> BridgeResult<MultisigAddress> {
        if threshold == 0 || threshold > addresses.len() {
            return Err(BridgeError::Ledger(format!(
                "invalid multisig threshold {threshold} of {}",
                addresses.len()
            )));
        }
        let mut state = self.chain.state.lock();
        let mut owners = BTreeSet::new();
        for address in addresses {
            let owner = state
                .address_owners
                .get(address)
                .copied()
                .ok_or_else(|| BridgeError::Ledger(format!("unknown key address {address}")))?;
            owners.insert(owner);
        }

        let mut hasher = Sha256::new();
        hasher.update((threshold as u64).to_be_bytes());
        for address in addresses {
            hasher.update(address.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        let address = format!("gM{}", &digest[..32]);
        let redeem_script = format!("52{}ae", digest);

        state
            .multisigs
            .insert(address.clone(), Multisig { threshold, owners });
        Ok(MultisigAddress {
            address,
            redeem_script,
        })
    }

    async fn import_address(&self, redeem_script: &str) -> BridgeResult<()> {
        self.imported.lock().insert(redeem_script.to_string());
        Ok(())
    }

    async fn verify_address(&self, address: &str) -> BridgeResult<bool> {
        Ok(address.len() > 1
            && address.starts_with('g')
            && address.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    async fn create_raw_transaction(&self, inputs: &[UnspentOutput], outputs: &Vouts) -> BridgeResult<String> {
        SimRawTransaction::build(inputs, outputs).encode()
    }

    async fn verify_raw_transaction(
        &self,
        inputs: &[UnspentOutput],
        outputs: &Vouts,
        raw: &str,
    ) -> BridgeResult<bool> {
        let expected = SimRawTransaction::build(inputs, outputs);
        Ok(SimRawTransaction::decode(raw)?.same_body(&expected))
    }

    async fn sign_raw_transaction(&self, raw: &str) -> BridgeResult<String> {
        let mut tx = SimRawTransaction::decode(raw)?;
        let signer = self.signer();
        if !tx.signatures.contains(&signer) {
            tx.signatures.push(signer);
        }
        tx.encode()
    }

    async fn send_raw_transaction(&self, raw: &str) -> BridgeResult<String> {
        let tx = SimRawTransaction::decode(raw)?;
        let signers: BTreeSet<usize> = tx
            .signatures
            .iter()
            .filter_map(|s| s.strip_prefix("node").and_then(|n| n.parse().ok()))
            .collect();

        let mut state = self.chain.state.lock();
        let mut spending = Vec::new();
        for input in &tx.inputs {
            let index = state
                .outputs
                .iter()
                .position(|o| o.utxo.txid == input.txid && o.utxo.vout == input.vout && !o.spent)
                .ok_or_else(|| {
                    BridgeError::Ledger(format!("missing or spent input {}:{}", input.txid, input.vout))
                })?;
            let address = &state.outputs[index].utxo.address;
            let authorised = match state.multisigs.get(address) {
                Some(ms) => ms.owners.intersection(&signers).count() >= ms.threshold,
                None => !signers.is_empty(),
            };
            if !authorised {
                return Err(BridgeError::Ledger(format!(
                    "input {}:{} lacks signatures",
                    input.txid, input.vout
                )));
            }
            spending.push(index);
        }

        let mut outputs = Vec::with_capacity(tx.outputs.len());
        for (address, display) in &tx.outputs {
            let value = amount::to_satoshi(display)
                .map_err(|e| BridgeError::Ledger(e.to_string()))?;
            outputs.push((address.clone(), value));
        }

        for index in spending {
            state.outputs[index].spent = true;
        }
        let txid = state.fresh_txid(raw.as_bytes());
        for (vout, (address, value)) in outputs.into_iter().enumerate() {
            state.add_output(txid.clone(), vout as u32, &address, value);
        }
        state.broadcasts.push(raw.to_string());
        Ok(txid)
    }

    async fn client_version(&self) -> BridgeResult<String> {
        Ok("sim-genix/0.1".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;

    #[tokio::test]
    async fn confirmations_follow_mining() {
        let chain = SimChain::new(10);
        let ledger = SimLedger::new(chain.clone(), 0);
        chain.deposit("gUser", 5 * COIN);
        assert_eq!(ledger.received_by_address(0, "gUser").await.unwrap(), 5 * COIN);
        assert_eq!(ledger.received_by_address(1, "gUser").await.unwrap(), 0);

        chain.mine(1);
        assert_eq!(ledger.received_by_address(1, "gUser").await.unwrap(), 5 * COIN);
        assert_eq!(ledger.received_by_address(2, "gUser").await.unwrap(), 0);
        chain.mine(5);
        assert_eq!(ledger.received_by_address(6, "gUser").await.unwrap(), 5 * COIN);
    }

    #[tokio::test]
    async fn multisig_is_deterministic_across_nodes() {
        let chain = SimChain::new(10);
        let a = SimLedger::new(chain.clone(), 0);
        let b = SimLedger::new(chain.clone(), 1);
        let keys = vec![a.get_new_address().await.unwrap(), b.get_new_address().await.unwrap()];
        let ms_a = a.create_multisig(2, &keys).await.unwrap();
        let ms_b = b.create_multisig(2, &keys).await.unwrap();
        assert_eq!(ms_a, ms_b);
        assert!(a.create_multisig(3, &keys).await.is_err());
    }

    #[tokio::test]
    async fn spend_requires_threshold_signatures() {
        let chain = SimChain::new(10);
        let nodes: Vec<SimLedger> = (0..3).map(|i| SimLedger::new(chain.clone(), i)).collect();
        let mut keys = Vec::new();
        for n in &nodes {
            keys.push(n.get_new_address().await.unwrap());
        }
        let ms = nodes[0].create_multisig(2, &keys).await.unwrap();
        let utxo = chain.deposit(&ms.address, 10 * COIN);
        chain.mine(1);

        let outputs: Vouts = [("gDest".to_string(), 9 * COIN)].into_iter().collect();
        let raw = nodes[0].create_raw_transaction(&[utxo.clone()], &outputs).await.unwrap();
        assert!(nodes[1].verify_raw_transaction(&[utxo.clone()], &outputs, &raw).await.unwrap());

        let once = nodes[0].sign_raw_transaction(&raw).await.unwrap();
        assert!(nodes[0].send_raw_transaction(&once).await.is_err());

        let twice = nodes[2].sign_raw_transaction(&once).await.unwrap();
        assert!(nodes[1].verify_raw_transaction(&[utxo], &outputs, &twice).await.unwrap());
        nodes[1].send_raw_transaction(&twice).await.unwrap();
        assert_eq!(chain.total_received("gDest"), 9 * COIN);
        assert!(nodes[1].send_raw_transaction(&twice).await.is_err());
    }

    #[tokio::test]
    async fn verify_detects_altered_outputs() {
        let chain = SimChain::new(10);
        let ledger = SimLedger::new(chain.clone(), 0);
        let utxo = chain.deposit("gChange", 3 * COIN);
        let outputs: Vouts = [("gDest".to_string(), 2 * COIN)].into_iter().collect();
        let raw = ledger.create_raw_transaction(&[utxo.clone()], &outputs).await.unwrap();
        let altered: Vouts = [("gDest".to_string(), 2 * COIN + 1)].into_iter().collect();
        assert!(!ledger.verify_raw_transaction(&[utxo], &altered, &raw).await.unwrap());
    }

    #[tokio::test]
    async fn block_hash_beyond_tip_fails() {
        let chain = SimChain::new(10);
        let ledger = SimLedger::new(chain, 0);
        assert!(ledger.block_hash(10).await.is_ok());
        assert!(ledger.block_hash(11).await.is_err());
    }
}
