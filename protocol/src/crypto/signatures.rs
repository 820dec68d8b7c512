//! # Message and Contract Signatures
//!
//! Two kinds of signature leave an authority:
//!
//! 1. **Message signatures** over the canonical JSON encoding of an envelope
//!    payload. Canonical means object keys sorted bytewise at every depth
//!    and no insignificant whitespace, so two authorities serialising the
//!    same value produce the same bytes regardless of field order.
//! 2. **Contract signatures** authorising a mint or a reconfiguration. The
//!    call parameters are hashed with SHA-256 under a domain tag and the
//!    Ed25519 signature over that digest is split into `{v, r, s}`, the
//!    shape the bridge contract's verification entry point takes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::keys::{verify_by_address, AuthorityWallet, WalletSignature};
use crate::amount::Satoshis;

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Canonical encoding of `value`.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn sign_message(wallet: &AuthorityWallet, payload: &Value) -> WalletSignature {
    wallet.sign(&canonical_json(payload))
}

pub fn verify_message(address: &str, payload: &Value, signature: &WalletSignature) -> bool {
    verify_by_address(address, &canonical_json(payload), signature)
}

// ---------------------------------------------------------------------------
// Contract call signatures
// ---------------------------------------------------------------------------

const MINT_DOMAIN: &[u8] = b"wgenix/mint/v1";
const CONFIGURE_DOMAIN: &[u8] = b"wgenix/configure/v1";

/// Recovery byte of every contract signature. Ed25519 needs no recovery id;
/// the contract checks `r || s` against the registered authority key.
pub const CONTRACT_SIGNATURE_V: u8 = 27;

/// Contract-ready signature components, `r` and `s` as `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSignature {
    pub v: u8,
    pub r: String,
    pub s: String,
}

struct DigestBuilder(Sha256);

impl DigestBuilder {
    fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((domain.len() as u32).to_be_bytes());
        hasher.update(domain);
        Self(hasher)
    }

    fn field(mut self, bytes: &[u8]) -> Self {
        self.0.update((bytes.len() as u32).to_be_bytes());
        self.0.update(bytes);
        self
    }

    fn finish(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// Digest of a mint authorisation.
pub fn mint_digest(
    chain_id: u64,
    mint_address: &str,
    mint_nonce: u64,
    deposit_address: &str,
    mint_amount: Satoshis,
) -> [u8; 32] {
    DigestBuilder::new(MINT_DOMAIN)
        .field(&chain_id.to_be_bytes())
        .field(mint_address.to_ascii_lowercase().as_bytes())
        .field(&mint_nonce.to_be_bytes())
        .field(deposit_address.as_bytes())
        .field(&mint_amount.to_be_bytes())
        .finish()
}

/// Digest of a federation reconfiguration.
pub fn configure_digest(
    chain_id: u64,
    configuration_nonce: u64,
    new_authority_addresses: &[String],
    new_authority_threshold: usize,
    new_min_burn_amount: Satoshis,
) -> [u8; 32] {
    let mut builder = DigestBuilder::new(CONFIGURE_DOMAIN)
        .field(&chain_id.to_be_bytes())
        .field(&configuration_nonce.to_be_bytes())
        .field(&(new_authority_addresses.len() as u64).to_be_bytes());
    for address in new_authority_addresses {
        builder = builder.field(address.to_ascii_lowercase().as_bytes());
    }
    builder
        .field(&(new_authority_threshold as u64).to_be_bytes())
        .field(&new_min_burn_amount.to_be_bytes())
        .finish()
}

pub fn sign_contract_call(wallet: &AuthorityWallet, digest: &[u8; 32]) -> ContractSignature {
    let raw = wallet.sign_raw(digest);
    ContractSignature {
        v: CONTRACT_SIGNATURE_V,
        r: format!("0x{}", hex::encode(&raw[..32])),
        s: format!("0x{}", hex::encode(&raw[32..])),
    }
}

pub fn verify_contract_call(address: &str, digest: &[u8; 32], signature: &ContractSignature) -> bool {
    if signature.v != CONTRACT_SIGNATURE_V {
        return false;
    }
    let r = signature.r.strip_prefix("0x").unwrap_or(&signature.r);
    let s = signature.s.strip_prefix("0x").unwrap_or(&signature.s);
    let joined = WalletSignature::from_hex(format!("{r}{s}"));
    verify_by_address(address, digest, &joined)
}
