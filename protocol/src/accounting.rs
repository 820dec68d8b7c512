//! # Ledger Accounting
//!
//! Per-authority bookkeeping on top of [`BridgeDB`]: which deposit
//! addresses are bound to which mint address, which withdrawals have been
//! accepted, and how much tax and principal has been approved so far.
//!
//! Every mutation goes through an [`AccountingWriter`], which can only be
//! obtained by taking the process-wide write lock. Writers queue in arrival
//! order (tokio's mutex is fair). Reads go straight to the store and may
//! observe a concurrently advancing view; every consumer recomputes from
//! current state, so that is fine.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::amount::Satoshis;
use crate::error::{BridgeError, BridgeResult, PayoutMismatch};
use crate::ledger::LedgerClient;
use crate::storage::{BridgeDB, MintDepositAddressRecord, WithdrawalRecord};

pub struct LedgerAccounting {
    db: BridgeDB,
    ledger: Arc<dyn LedgerClient>,
    authority_threshold: usize,
    write_lock: Mutex<()>,
}

/// Exclusive handle for mutating accounting state. Holding one means no
/// other mutation is in flight on this authority.
pub struct AccountingWriter<'a> {
    accounting: &'a LedgerAccounting,
    _guard: MutexGuard<'a, ()>,
}

impl LedgerAccounting {
    pub fn new(db: BridgeDB, ledger: Arc<dyn LedgerClient>, authority_threshold: usize) -> Self {
        Self {
            db,
            ledger,
            authority_threshold,
            write_lock: Mutex::new(()),
        }
    }

    /// Wait for the write lock.
    pub async fn write(&self) -> AccountingWriter<'_> {
        AccountingWriter {
            accounting: self,
            _guard: self.write_lock.lock().await,
        }
    }

    pub fn db(&self) -> &BridgeDB {
        &self.db
    }

    pub fn deposit_address(&self, mint_address: &str) -> BridgeResult<Option<String>> {
        Ok(self.db.get_mint_deposit_address(mint_address)?)
    }

    pub fn deposit_record(&self, mint_address: &str) -> BridgeResult<Option<MintDepositAddressRecord>> {
        Ok(self.db.get_mint_deposit_record(mint_address)?)
    }

    pub fn withdrawal(&self, burn_address: &str, burn_index: u64) -> BridgeResult<Option<WithdrawalRecord>> {
        Ok(self.db.get_withdrawal(burn_address, burn_index)?)
    }
}

impl AccountingWriter<'_> {
    /// Bind `mint_address` to the multisig derived from one candidate
    /// address per authority.
    pub async fn register_deposit_address(
        &self,
        mint_address: &str,
        candidates: &[String],
    ) -> BridgeResult<MintDepositAddressRecord> {
        let acc = self.accounting;

        let mut seen = HashSet::new();
        if let Some(dup) = candidates.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(BridgeError::InvalidInput(format!(
                "candidate deposit address {dup} appears twice"
            )));
        }
        if acc.db.get_mint_deposit_record(mint_address)?.is_some() {
            return Err(BridgeError::AlreadyRegistered {
                address: mint_address.to_string(),
            });
        }
        for candidate in candidates {
            if acc.db.has_used_deposit_addresses(std::slice::from_ref(candidate))? {
                return Err(BridgeError::AlreadyRegistered {
                    address: candidate.clone(),
                });
            }
        }

        let multisig = acc
            .ledger
            .create_multisig(acc.authority_threshold, candidates)
            .await?;
        if let Err(e) = acc.ledger.import_address(&multisig.redeem_script).await {
            warn!(deposit_address = %multisig.address, error = %e, "watch-address import failed");
        }

        let record = acc.db.register_mint_deposit_address(
            mint_address,
            candidates,
            &multisig.address,
            &multisig.redeem_script,
        )?;
        info!(
            mint_address = %mint_address,
            deposit_address = %record.deposit_address,
            "deposit address registered"
        );
        Ok(record)
    }

    pub fn record_withdrawal(&self, burn_address: &str, burn_index: u64) -> BridgeResult<WithdrawalRecord> {
        let db = &self.accounting.db;
        if db.get_withdrawal(burn_address, burn_index)?.is_some() {
            return Err(BridgeError::DuplicateWithdrawal {
                burn_address: burn_address.to_string(),
                burn_index,
            });
        }
        let record = db.register_withdrawal(burn_address, burn_index)?;
        info!(burn_address = %burn_address, burn_index, "withdrawal recorded");
        Ok(record)
    }

    pub fn apply_approved_tax(&self, deposit_address: &str, delta: Satoshis) -> BridgeResult<()> {
        let db = &self.accounting.db;
        let mut records = db.mint_deposit_records_for(&[deposit_address.to_string()])?;
        let record = records
            .first_mut()
            .ok_or_else(|| PayoutMismatch::UnregisteredAddress(deposit_address.to_string()))?;
        record.approved_tax = checked_increment(record.approved_tax, delta)?;
        db.update_mint_deposit_records(&records)?;
        Ok(())
    }

    pub fn apply_approved_withdrawal(
        &self,
        burn_address: &str,
        burn_index: u64,
        amount_delta: Satoshis,
        tax_delta: Satoshis,
    ) -> BridgeResult<()> {
        let db = &self.accounting.db;
        let mut record = db.get_withdrawal(burn_address, burn_index)?.ok_or_else(|| {
            PayoutMismatch::WithdrawalNotRegistered {
                burn_address: burn_address.to_string(),
                burn_index,
            }
        })?;
        record.approved_amount = checked_increment(record.approved_amount, amount_delta)?;
        record.approved_tax = checked_increment(record.approved_tax, tax_delta)?;
        db.update_withdrawals(&[record])?;
        Ok(())
    }
}

fn checked_increment(current: Satoshis, delta: Satoshis) -> BridgeResult<Satoshis> {
    current
        .checked_add(delta)
        .ok_or_else(|| BridgeError::InvalidInput(format!("approved amount overflow: {current} + {delta}")))
}
