//! # Storage Module
//!
//! Persistent authority state: registered deposit addresses and the
//! withdrawals this authority has accepted for settlement.
//!
//! ```text
//! records.rs   MintDepositAddressRecord, WithdrawalRecord, StateDump
//! db.rs        sled persistence with one tree per record kind
//! ```
//!
//! Bincode on disk, JSON on the wire (state dumps for peer resync).

pub mod db;
pub mod records;

pub use db::{BridgeDB, DbError, DbResult};
pub use records::{MintDepositAddressRecord, StateDump, WithdrawalRecord, WithdrawalStatus};
