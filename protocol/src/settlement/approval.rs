//! # Approval Rounds
//!
//! One authority's part in a settlement round. The coordinator threads an
//! approval chain through every authority in turn; each authority runs the
//! request through the stages below and, if all pass, returns the chain
//! with its own signature appended.
//!
//! ```text
//! Received ─▶ UnspentValidated ─▶ PayoutsValidated ─▶ ChainBuiltOrVerified ─▶ Signed
//! ```
//!
//! A failure at any stage aborts the round on this authority without
//! touching accounting. In [`ApprovalMode::Real`] the approved amounts are
//! committed right after signing, still under the accounting write lock.
//! In [`ApprovalMode::Test`] the authority signs only to prove it can, then
//! hands back the chain it built or verified, without its signature, so a
//! rehearsal never yields a broadcastable transaction.
//!
//! An authority never signs a chain it did not derive itself: the first
//! hop builds the transaction from its own vouts, every later hop checks
//! that the chain it was handed spends exactly the same inputs into
//! exactly the same outputs it computes locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::accounting::AccountingWriter;
use crate::envelope::{EnvelopeCodec, SignedEnvelope};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{UnspentOutput, Vouts};
use crate::settlement::payouts::PendingPayouts;
use crate::settlement::planner::SettlementPlanner;

/// Dry run or the real thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalMode {
    /// Check that signing works, return the chain unsigned, and leave
    /// accounting untouched.
    Test,
    /// Sign and commit approved amounts.
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStage {
    /// Envelope verified against the payout coordinator's wallet.
    Received,
    UnspentValidated,
    PayoutsValidated,
    ChainBuiltOrVerified,
    Signed,
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::UnspentValidated => "unspent-validated",
            Self::PayoutsValidated => "payouts-validated",
            Self::ChainBuiltOrVerified => "chain-built-or-verified",
            Self::Signed => "signed",
        };
        f.write_str(name)
    }
}

/// Body of `/approvePayouts` and `/approvePayoutsTest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    #[serde(flatten)]
    pub payouts: PendingPayouts,
    pub unspent: Vec<UnspentOutput>,
    /// `None` on the first hop of a round.
    #[serde(default)]
    pub approval_chain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub approval_chain: String,
}

/// Tracks one approval request through the stages.
///
/// Each transition checks that the round is in the stage it expects before
/// doing any work, so a stage can neither be skipped nor repeated.
#[derive(Debug)]
pub struct ApprovalRound {
    stage: ApprovalStage,
    mode: ApprovalMode,
    request: ApprovalRequest,
    vouts: Option<Vouts>,
    chain: Option<String>,
}

impl ApprovalRound {
    /// Start a round from a request whose envelope is already verified.
    pub fn new(mode: ApprovalMode, request: ApprovalRequest) -> Self {
        let chain = request.approval_chain.clone();
        Self {
            stage: ApprovalStage::Received,
            mode,
            request,
            vouts: None,
            chain,
        }
    }

    pub fn stage(&self) -> ApprovalStage {
        self.stage
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    pub fn payouts(&self) -> &PendingPayouts {
        &self.request.payouts
    }

    /// Outputs computed in [`build_or_verify_chain`](Self::build_or_verify_chain).
    pub fn vouts(&self) -> Option<&Vouts> {
        self.vouts.as_ref()
    }

    fn require_stage(&self, stage: ApprovalStage) -> BridgeResult<()> {
        if self.stage != stage {
            return Err(BridgeError::InvalidInput(format!(
                "approval round is {}, expected {}",
                self.stage, stage
            )));
        }
        Ok(())
    }

    pub async fn validate_unspent(&mut self, planner: &SettlementPlanner) -> BridgeResult<()> {
        self.require_stage(ApprovalStage::Received)?;
        planner.validate_unspent(&self.request.unspent).await?;
        self.stage = ApprovalStage::UnspentValidated;
        Ok(())
    }

    pub async fn validate_payouts(&mut self, planner: &SettlementPlanner) -> BridgeResult<()> {
        self.require_stage(ApprovalStage::UnspentValidated)?;
        planner.validate_payouts(&self.request.payouts).await?;
        self.stage = ApprovalStage::PayoutsValidated;
        Ok(())
    }

    pub async fn build_or_verify_chain(&mut self, planner: &SettlementPlanner) -> BridgeResult<()> {
        self.require_stage(ApprovalStage::PayoutsValidated)?;
        let vouts = planner.compute_vouts(&self.request.payouts, &self.request.unspent)?;
        let ledger = planner.ledger();
        let chain = match self.chain.take() {
            None => {
                ledger
                    .create_raw_transaction(&self.request.unspent, &vouts)
                    .await?
            }
            Some(chain) => {
                if !ledger
                    .verify_raw_transaction(&self.request.unspent, &vouts, &chain)
                    .await?
                {
                    return Err(BridgeError::ChainTampered(
                        "inputs or outputs differ from the locally derived transaction".into(),
                    ));
                }
                chain
            }
        };
        self.chain = Some(chain);
        self.vouts = Some(vouts);
        self.stage = ApprovalStage::ChainBuiltOrVerified;
        Ok(())
    }

    /// Append our signature and return the augmented chain.
    pub async fn sign(&mut self, planner: &SettlementPlanner) -> BridgeResult<String> {
        self.require_stage(ApprovalStage::ChainBuiltOrVerified)?;
        let chain = self
            .chain
            .as_deref()
            .ok_or_else(|| BridgeError::ChainTampered("no chain to sign".into()))?;
        let signed = planner.ledger().sign_raw_transaction(chain).await?;
        self.chain = Some(signed.clone());
        self.stage = ApprovalStage::Signed;
        Ok(signed)
    }

    /// Drive every stage. In real mode, commit the payouts once signed and
    /// return the signed chain; in test mode, return the chain as it stood
    /// before signing.
    pub async fn run(
        &mut self,
        planner: &SettlementPlanner,
        writer: &AccountingWriter<'_>,
    ) -> BridgeResult<String> {
        self.validate_unspent(planner).await?;
        self.validate_payouts(planner).await?;
        self.build_or_verify_chain(planner).await?;
        let unsigned = self.chain.clone();
        let signed = self.sign(planner).await?;
        match self.mode {
            ApprovalMode::Real => {
                planner.apply_payouts(writer, &self.request.payouts)?;
                Ok(signed)
            }
            ApprovalMode::Test => {
                unsigned.ok_or_else(|| BridgeError::ChainTampered("no chain to return".into()))
            }
        }
    }
}

/// Entry point for approval requests arriving at an authority.
pub struct ApprovalCoordinator {
    planner: Arc<SettlementPlanner>,
    codec: EnvelopeCodec,
    coordinator_address: String,
}

impl ApprovalCoordinator {
    pub fn new(planner: Arc<SettlementPlanner>, codec: EnvelopeCodec, coordinator_address: String) -> Self {
        Self {
            planner,
            codec,
            coordinator_address,
        }
    }

    /// Verify, validate, and co-sign one approval request. The whole
    /// handler runs under the accounting write lock.
    pub async fn approve(
        &self,
        envelope: &SignedEnvelope,
        mode: ApprovalMode,
    ) -> BridgeResult<ApprovalResponse> {
        let accounting = self.planner.accounting().clone();
        let writer = accounting.write().await;

        let request: ApprovalRequest = self.codec.verify(envelope, &self.coordinator_address).await?;
        let first_hop = request.approval_chain.is_none();
        let mut round = ApprovalRound::new(mode, request);

        match round.run(&self.planner, &writer).await {
            Ok(approval_chain) => {
                info!(
                    mode = ?mode,
                    first_hop,
                    deposit_taxes = round.payouts().deposit_tax_payouts.len(),
                    withdrawals = round.payouts().withdrawal_payouts.len(),
                    "settlement chain approved"
                );
                Ok(ApprovalResponse { approval_chain })
            }
            Err(e) => {
                warn!(mode = ?mode, stage = %round.stage(), error = %e, "approval round aborted");
                Err(e)
            }
        }
    }
}
