//! # Settlement
//!
//! Everything between "funds are sitting in custody" and "a fully signed
//! payout transaction exists".
//!
//! ```text
//! payouts.rs    DepositTaxPayout, WithdrawalPayout, WithdrawalTaxPayout
//! planner.rs    pending payout computation and independent re-validation
//! vouts.rs      deterministic transaction outputs (tax split, change, dust)
//! approval.rs   per-authority approval state machine
//! ```

pub mod approval;
pub mod payouts;
pub mod planner;
pub mod vouts;

pub use approval::{
    ApprovalCoordinator, ApprovalMode, ApprovalRequest, ApprovalResponse, ApprovalRound,
    ApprovalStage,
};
pub use payouts::{DepositTaxPayout, PendingPayouts, WithdrawalPayout, WithdrawalTaxPayout};
pub use planner::SettlementPlanner;
pub use vouts::compute_vouts;
