//! Aggregate statistics and their refresh policy.
//!
//! Computing a snapshot touches every deposit address and every
//! withdrawal, so `/stats` serves a cached copy and recomputes it at most
//! once per refresh interval. Concurrent callers wait on the same lock
//! rather than recomputing in parallel.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::amount::Satoshis;
use crate::contract::BurnRecord;
use crate::error::BridgeResult;
use crate::ledger::{total_value, UnspentOutput};
use crate::rpc::{AuthorityStats, DepositStats, UtxoStats, WithdrawalStats};
use crate::storage::{MintDepositAddressRecord, WithdrawalRecord};
use crate::tax::{amount_after_tax, meets_tax, tax_amount};

pub struct StatsCache {
    interval: Duration,
    cached: Mutex<Option<(Instant, AuthorityStats)>>,
    refreshes: AtomicU64,
}

impl StatsCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Cached snapshot, recomputed with `refresh` when missing or older
    /// than the interval. A failed refresh leaves the previous snapshot in
    /// place.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> BridgeResult<AuthorityStats>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BridgeResult<AuthorityStats>>,
    {
        let mut cached = self.cached.lock().await;
        if let Some((taken, stats)) = cached.as_ref() {
            if taken.elapsed() < self.interval {
                return Ok(stats.clone());
            }
        }
        let stats = refresh().await?;
        *cached = Some((Instant::now(), stats.clone()));
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(height = stats.current_height, "stats refreshed");
        Ok(stats)
    }

    /// Number of recomputations so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

fn tax_or_zero(amount: Satoshis) -> Satoshis {
    if meets_tax(amount) {
        tax_amount(amount).unwrap_or(0)
    } else {
        0
    }
}

/// Deposit totals for one confirmation depth. `received` holds the amount
/// received by each deposit address at that depth.
pub fn deposit_stats(
    records: &[MintDepositAddressRecord],
    received: &BTreeMap<String, Satoshis>,
) -> DepositStats {
    let amounts: Vec<Satoshis> = records
        .iter()
        .map(|r| received.get(&r.deposit_address).copied().unwrap_or(0))
        .collect();
    let total_approvable_tax: Satoshis = amounts.iter().copied().map(tax_or_zero).sum();
    let total_approved_tax: Satoshis = records.iter().map(|r| r.approved_tax).sum();
    DepositStats {
        count: records.len(),
        total_deposited_amount: amounts.iter().sum(),
        total_approvable_tax,
        total_approved_tax,
        remaining_approvable_tax: total_approvable_tax.saturating_sub(total_approved_tax),
    }
}

/// `burns[i]` is the contract's record of `withdrawals[i]`.
pub fn withdrawal_stats(withdrawals: &[WithdrawalRecord], burns: &[BurnRecord]) -> WithdrawalStats {
    let mut stats = WithdrawalStats {
        count: withdrawals.len(),
        total_approved_amount: withdrawals.iter().map(|w| w.approved_amount).sum(),
        total_approved_tax: withdrawals.iter().map(|w| w.approved_tax).sum(),
        ..Default::default()
    };
    for burn in burns {
        stats.total_burned_amount += burn.burn_amount;
        if let (Ok(net), Ok(tax)) = (amount_after_tax(burn.burn_amount), tax_amount(burn.burn_amount)) {
            stats.total_approvable_amount += net;
            stats.total_approvable_tax += tax;
        }
    }
    stats.remaining_approvable_amount = stats
        .total_approvable_amount
        .saturating_sub(stats.total_approved_amount);
    stats.remaining_approvable_tax = stats
        .total_approvable_tax
        .saturating_sub(stats.total_approved_tax);
    stats
}

pub fn utxo_stats(change: &[UnspentOutput], deposits: &[UnspentOutput]) -> UtxoStats {
    UtxoStats {
        total_change_balance: total_value(change),
        total_deposits_balance: total_value(deposits),
    }
}
