//! Reduction of per-authority views to the set every responder agrees on.
//!
//! An item survives only if each responding authority reported it with
//! identical fields. Absent authorities are not counted as disagreeing;
//! whether enough of them answered is checked separately with
//! [`require_quorum`].

use crate::error::{BridgeError, BridgeResult};
use crate::ledger::UnspentOutput;
use crate::settlement::PendingPayouts;

/// Items of the first view that appear in every other view.
pub fn intersect<T: PartialEq + Clone>(views: &[Vec<T>]) -> Vec<T> {
    let Some((first, rest)) = views.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|item| rest.iter().all(|view| view.contains(item)))
        .cloned()
        .collect()
}

/// Payouts reported identically by every responder.
///
/// A withdrawal whose principal survives but whose tax does not (or the
/// reverse) is dropped from both lists, so the result is always pairwise
/// aligned.
pub fn intersect_payouts(views: &[PendingPayouts]) -> PendingPayouts {
    let deposits: Vec<_> = views.iter().map(|v| v.deposit_tax_payouts.clone()).collect();
    let withdrawals: Vec<_> = views.iter().map(|v| v.withdrawal_payouts.clone()).collect();
    let taxes: Vec<_> = views.iter().map(|v| v.withdrawal_tax_payouts.clone()).collect();

    let mut withdrawal_payouts = intersect(&withdrawals);
    let mut withdrawal_tax_payouts = intersect(&taxes);
    withdrawal_payouts.retain(|w| withdrawal_tax_payouts.iter().any(|t| t.key() == w.key()));
    withdrawal_tax_payouts.retain(|t| withdrawal_payouts.iter().any(|w| w.key() == t.key()));

    PendingPayouts {
        deposit_tax_payouts: intersect(&deposits),
        withdrawal_payouts,
        withdrawal_tax_payouts,
    }
}

pub fn intersect_unspent(views: &[Vec<UnspentOutput>]) -> Vec<UnspentOutput> {
    intersect(views)
}

/// Fail with [`BridgeError::ConsensusFailed`] unless at least `threshold`
/// authorities answered.
pub fn require_quorum(what: &str, responders: usize, threshold: usize) -> BridgeResult<()> {
    if responders < threshold {
        return Err(BridgeError::ConsensusFailed(format!(
            "{what}: {responders} authorities responded, {threshold} required"
        )));
    }
    Ok(())
}
