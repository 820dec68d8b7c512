// Copyright (c) 2026 wGenix Authorities. MIT License.
// See LICENSE for details.

//! # wGenix Protocol: Core Library
//!
//! Consensus and settlement for the wGenix bridge: a federation of N
//! authorities that jointly custody GENIX on the UTXO ledger in M-of-N
//! multisig addresses, and authorise mints and releases of the wrapped
//! token on the account chain.
//!
//! No authority trusts another. Every message is a chain-anchored
//! [`envelope::SignedEnvelope`]; every settlement transaction is rebuilt and
//! re-validated independently by each signer before it adds its signature.
//!
//! ## Architecture
//!
//! - **envelope**: signed, chain-anchored message wrapping.
//! - **tax**: integer fee arithmetic every authority must agree on.
//! - **accounting**: per-authority bookkeeping behind a single write lock.
//! - **settlement**: payout computation, vouts, and the approval state machine.
//! - **consensus**: coordinator-side fan-out, intersection, and chain threading.
//! - **authority**: one authority's answers to the RPC surface.
//! - **ledger** / **contract**: traits over the two external chains.
//! - **storage**: sled-backed persistence.
//! - **crypto**: Ed25519 wallets, message and contract-call signatures.
//! - **settings** / **config**: deployment files and protocol constants.
//! - **rpc**: wire shapes of the authority RPC surface.
//! - **sim**: in-process ledger, contract, and transport for tests.

pub mod accounting;
pub mod amount;
pub mod authority;
pub mod config;
pub mod consensus;
pub mod contract;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod rpc;
pub mod settings;
pub mod settlement;
pub mod sim;
pub mod storage;
pub mod tax;

pub use error::{BridgeError, BridgeResult, PayoutMismatch};
