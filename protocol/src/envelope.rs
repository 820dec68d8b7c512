//! # Envelope Codec
//!
//! Every message an authority sends is wrapped in a [`SignedEnvelope`]: the
//! payload object, extended with the height and hash of a block
//! `syncDelayThreshold` below the signer's tip, signed with the authority's
//! wallet.
//!
//! ```text
//! {
//!   "data": { ...payload..., "valGenixHeight": H-15, "valGenixHash": "<hash(H-15)>" },
//!   "signature": "<ed25519 over canonical_json(data)>",
//!   "valGenixHeight": H-15,
//!   "valGenixHash": "<hash(H-15)>"
//! }
//! ```
//!
//! The anchor is inside `data`, so the signature covers it. The top-level
//! copies are informational and never trusted.
//!
//! A verifier accepts the envelope only if the anchor is no more than
//! `2 * syncDelayThreshold` blocks below its own tip *and* the anchor hash
//! matches its own view of the chain at that height. That bounds replay to
//! a ~30 block window without any nonce table, and pins the message to one
//! fork of ledger history.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::crypto::{sign_message, verify_message, AuthorityWallet, WalletSignature};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::LedgerClient;

pub const FIELD_HEIGHT: &str = "valGenixHeight";
pub const FIELD_HASH: &str = "valGenixHash";

/// A signed, chain-anchored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    pub data: Value,
    pub signature: WalletSignature,
    #[serde(default)]
    pub val_genix_height: u64,
    #[serde(default)]
    pub val_genix_hash: String,
}

impl SignedEnvelope {
    /// Payload decoded without any verification. Only for display of
    /// messages that were already verified or for diagnostics.
    pub fn peek<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))
    }
}

/// Creates and verifies envelopes against the local ledger view.
#[derive(Clone)]
pub struct EnvelopeCodec {
    ledger: Arc<dyn LedgerClient>,
    wallet: AuthorityWallet,
    sync_delay: u64,
}

impl EnvelopeCodec {
    pub fn new(ledger: Arc<dyn LedgerClient>, wallet: AuthorityWallet, sync_delay: u64) -> Self {
        Self {
            ledger,
            wallet,
            sync_delay,
        }
    }

    pub fn address(&self) -> String {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &AuthorityWallet {
        &self.wallet
    }

    /// Anchor height and hash for a message created now.
    async fn anchor(&self) -> BridgeResult<(u64, String)> {
        let tip = self.ledger.block_count().await?;
        let height = tip.saturating_sub(self.sync_delay);
        let hash = self.ledger.block_hash(height).await?;
        Ok((height, hash))
    }

    /// Sign `payload`, which must serialize to a JSON object.
    pub async fn create<T: Serialize + ?Sized>(&self, payload: &T) -> BridgeResult<SignedEnvelope> {
        let value = serde_json::to_value(payload)?;
        let Value::Object(mut data) = value else {
            return Err(BridgeError::InvalidPayload(format!(
                "cannot sign non-object {}",
                value
            )));
        };

        let (height, hash) = self.anchor().await?;
        data.insert(FIELD_HEIGHT.to_string(), Value::from(height));
        data.insert(FIELD_HASH.to_string(), Value::from(hash.clone()));

        let data = Value::Object(data);
        let signature = sign_message(&self.wallet, &data);
        Ok(SignedEnvelope {
            data,
            signature,
            val_genix_height: height,
            val_genix_hash: hash,
        })
    }

    /// Verify an envelope signed by exactly `signer` and decode its payload.
    pub async fn verify<T: DeserializeOwned>(
        &self,
        envelope: &SignedEnvelope,
        signer: &str,
    ) -> BridgeResult<T> {
        let (data, _) = self
            .verify_raw(envelope, std::slice::from_ref(&signer.to_string()), true)
            .await?;
        decode(data)
    }

    /// Verify an envelope signed by any of `signers`; also returns the
    /// address that matched.
    pub async fn verify_one_of<T: DeserializeOwned>(
        &self,
        envelope: &SignedEnvelope,
        signers: &[String],
    ) -> BridgeResult<(T, String)> {
        let (data, signer) = self.verify_raw(envelope, signers, true).await?;
        Ok((decode(data)?, signer))
    }

    /// Full verification. With `discard` the anchor fields are removed from
    /// the returned object; without it they are kept so the caller can
    /// re-embed them downstream.
    pub async fn verify_raw(
        &self,
        envelope: &SignedEnvelope,
        signers: &[String],
        discard: bool,
    ) -> BridgeResult<(Map<String, Value>, String)> {
        let Value::Object(data) = &envelope.data else {
            return Err(BridgeError::InvalidPayload("data is not an object".into()));
        };
        let height = data
            .get(FIELD_HEIGHT)
            .and_then(Value::as_u64)
            .ok_or_else(|| BridgeError::InvalidPayload(format!("missing {FIELD_HEIGHT}")))?;
        let hash = data
            .get(FIELD_HASH)
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidPayload(format!("missing {FIELD_HASH}")))?;

        let tip = self.ledger.block_count().await?;
        let min_height = tip.saturating_sub(2 * self.sync_delay);
        if height < min_height {
            return Err(BridgeError::MessageExpired { height, min_height });
        }

        // A height we cannot look up is a fork we do not share.
        let ours = self
            .ledger
            .block_hash(height)
            .await
            .map_err(|_| BridgeError::ChainMismatch { height })?;
        if ours != hash {
            return Err(BridgeError::ChainMismatch { height });
        }

        let signer = signers
            .iter()
            .find(|s| verify_message(s, &envelope.data, &envelope.signature))
            .cloned()
            .ok_or(BridgeError::BadSignature)?;
        debug!(signer = %signer, height, "envelope verified");

        let mut data = data.clone();
        if discard {
            data.remove(FIELD_HEIGHT);
            data.remove(FIELD_HASH);
        }
        Ok((data, signer))
    }
}

fn decode<T: DeserializeOwned>(data: Map<String, Value>) -> BridgeResult<T> {
    serde_json::from_value(Value::Object(data))
        .map_err(|e| BridgeError::InvalidPayload(e.to_string()))
}
