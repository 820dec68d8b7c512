//! # Signing Identity
//!
//! Ed25519 wallets for authorities, canonical message signatures used by
//! the envelope codec, and contract-ready call signatures for mints and
//! reconfigurations.

pub mod keys;
pub mod signatures;

pub use keys::{is_wallet_address, same_address, verify_by_address, AuthorityWallet, WalletSignature};
pub use signatures::{
    canonical_json, configure_digest, mint_digest, sign_contract_call, sign_message,
    verify_contract_call, verify_message, ContractSignature,
};
