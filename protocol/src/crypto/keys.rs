//! # Authority Wallets
//!
//! Ed25519 signing identities for federation members.
//!
//! An authority's wallet address is `0x` followed by the hex encoding of its
//! 32-byte public key. The address *is* the verification key, so anyone
//! holding the address from `networks.json` can check a signature without a
//! key registry or public-key recovery.
//!
//! Key bytes are never logged. The `Debug` impl prints the address only.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix of every wallet address.
pub const ADDRESS_PREFIX: &str = "0x";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key: expected 32 hex-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),
}

/// An authority's signing identity.
pub struct AuthorityWallet {
    signing_key: SigningKey,
}

/// A detached Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletSignature(String);

impl AuthorityWallet {
    /// Fresh wallet from the OS RNG. Used by `wgenix-node init`.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load from the hex seed stored as `walletPrivateKey`. A leading `0x`
    /// is accepted.
    pub fn from_hex(seed_hex: &str) -> Result<Self, KeyError> {
        let trimmed = seed_hex.trim();
        let trimmed = trimmed.strip_prefix(ADDRESS_PREFIX).unwrap_or(trimmed);
        let bytes = hex::decode(trimmed).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex seed suitable for `private.DO_NOT_SHARE_THIS.json`.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> WalletSignature {
        WalletSignature(hex::encode(self.signing_key.sign(message).to_bytes()))
    }

    /// Raw 64-byte signature, for callers that split it into components.
    pub fn sign_raw(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for AuthorityWallet {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for AuthorityWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorityWallet({})", self.address())
    }
}

impl WalletSignature {
    pub fn from_hex(hex_sig: impl Into<String>) -> Self {
        Self(hex_sig.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    fn to_dalek(&self) -> Option<DalekSignature> {
        let bytes = hex::decode(&self.0).ok()?;
        let arr: [u8; 64] = bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Debug for WalletSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "WalletSignature({head}..)")
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

pub fn address_from_public_key(public_key: &[u8; 32]) -> String {
    format!("{}{}", ADDRESS_PREFIX, hex::encode(public_key))
}

/// Parse an address back into its verification key.
pub fn verifying_key_from_address(address: &str) -> Result<VerifyingKey, KeyError> {
    let invalid = || KeyError::InvalidAddress(address.to_string());
    let body = address.strip_prefix(ADDRESS_PREFIX).ok_or_else(invalid)?;
    let bytes = hex::decode(body).map_err(|_| invalid())?;
    let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| invalid())?;
    VerifyingKey::from_bytes(&arr).map_err(|_| invalid())
}

pub fn is_wallet_address(address: &str) -> bool {
    verifying_key_from_address(address).is_ok()
}

/// Two addresses name the same wallet. Hex case is not significant.
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Check `signature` over `message` against the wallet at `address`.
pub fn verify_by_address(address: &str, message: &[u8], signature: &WalletSignature) -> bool {
    let Ok(key) = verifying_key_from_address(&address.to_ascii_lowercase()) else {
        return false;
    };
    let Some(sig) = signature.to_dalek() else {
        return false;
    };
    key.verify_strict(message, &sig).is_ok()
}
