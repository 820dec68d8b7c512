//! # In-Process Backends
//!
//! A simulated ledger and contract that satisfy [`crate::ledger::LedgerClient`]
//! and [`crate::contract::ContractClient`] without any external daemon, and
//! an in-process [`crate::consensus::AuthorityTransport`] that routes
//! requests straight to [`crate::authority::AuthorityService`]s. Used by the
//! test suites and by dry runs of a federation on one machine.

pub mod contract;
pub mod ledger;
pub mod transport;

pub use contract::SimContract;
pub use ledger::{SimChain, SimLedger};
pub use transport::SimTransport;
