//! # Consensus Aggregator
//!
//! The coordinating side of the federation. [`Coordinator`] queries every
//! authority over an [`AuthorityTransport`], verifies each reply, and
//! reduces the answers with the functions in [`aggregator`].
//!
//! ```text
//!            ┌──────────── computePendingPayouts / computeUnspent ───────────┐
//!  operator ─┤                                                               ├─▶ intersect
//!            └─ approvePayoutsTest: A0 ─▶ A1 ─▶ … ─▶ An  (chain threaded)    │
//!               approvePayouts:     A0 ─▶ A1 ─▶ … ─▶ An ─▶ broadcast ◀───────┘
//! ```

pub mod aggregator;
pub mod coordinator;

pub use aggregator::{intersect, intersect_payouts, intersect_unspent, require_quorum};
pub use coordinator::{
    AuthorityReply, AuthorityTransport, Coordinator, DepositAddressReport, PayoutExecution,
    Quorum, ReconfigurationReport, RoundReport,
};
