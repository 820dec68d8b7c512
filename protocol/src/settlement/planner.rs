//! Pending payout computation and independent re-validation.
//!
//! Every method recomputes from the ledger, the contract and local
//! accounting at call time. Nothing is cached between calls; the round
//! driver relies on that to make a crashed or aborted round safe to retry.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::accounting::{AccountingWriter, LedgerAccounting};
use crate::amount::Satoshis;
use crate::contract::ContractClient;
use crate::error::{BridgeError, BridgeResult, PayoutMismatch};
use crate::ledger::{LedgerClient, UnspentOutput, Vouts};
use crate::settings::NetworkSettings;
use crate::settlement::payouts::{
    DepositTaxPayout, PendingPayouts, WithdrawalPayout, WithdrawalTaxPayout,
};
use crate::settlement::vouts::compute_vouts;
use crate::tax::{amount_after_tax, meets_tax, tax_amount};

pub struct SettlementPlanner {
    accounting: Arc<LedgerAccounting>,
    ledger: Arc<dyn LedgerClient>,
    contract: Arc<dyn ContractClient>,
    settings: Arc<NetworkSettings>,
}

impl SettlementPlanner {
    pub fn new(
        accounting: Arc<LedgerAccounting>,
        ledger: Arc<dyn LedgerClient>,
        contract: Arc<dyn ContractClient>,
        settings: Arc<NetworkSettings>,
    ) -> Self {
        Self {
            accounting,
            ledger,
            contract,
            settings,
        }
    }

    pub fn accounting(&self) -> &Arc<LedgerAccounting> {
        &self.accounting
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Confirmed received amounts of every registered deposit address.
    async fn confirmed_deposits(&self) -> BridgeResult<BTreeMap<String, Satoshis>> {
        Ok(self
            .ledger
            .list_received_by_address(self.settings.deposit_confirmations)
            .await?)
    }

    pub async fn compute_pending_payouts(
        &self,
        process_deposits: bool,
        process_withdrawals: bool,
    ) -> BridgeResult<PendingPayouts> {
        let mut pending = PendingPayouts::default();

        if process_deposits {
            let received = self.confirmed_deposits().await?;
            let addresses: Vec<String> = received.keys().cloned().collect();
            for record in self.accounting.db().mint_deposit_records_for(&addresses)? {
                let balance = received.get(&record.deposit_address).copied().unwrap_or(0);
                if !meets_tax(balance) {
                    continue;
                }
                let approvable = tax_amount(balance)?;
                match approvable.cmp(&record.approved_tax) {
                    Ordering::Greater => pending.deposit_tax_payouts.push(DepositTaxPayout {
                        deposit_address: record.deposit_address.clone(),
                        amount: approvable - record.approved_tax,
                    }),
                    Ordering::Less => {
                        return Err(BridgeError::AccountingInvariantViolation {
                            address: record.deposit_address,
                            approved: record.approved_tax,
                            approvable,
                        })
                    }
                    Ordering::Equal => {}
                }
            }
            pending.deposit_tax_payouts.sort();
        }

        if process_withdrawals {
            let keys: Vec<(String, u64)> = self
                .accounting
                .db()
                .unapproved_withdrawals()?
                .into_iter()
                .map(|w| (w.burn_address, w.burn_index))
                .collect();
            let burns = self.contract.burn_records(&keys).await?;
            for ((burn_address, burn_index), burn) in keys.into_iter().zip(burns) {
                if !meets_tax(burn.burn_amount) {
                    continue;
                }
                pending.withdrawal_payouts.push(WithdrawalPayout {
                    burn_address: burn_address.clone(),
                    burn_index,
                    burn_destination: burn.burn_destination.clone(),
                    amount: amount_after_tax(burn.burn_amount)?,
                });
                pending.withdrawal_tax_payouts.push(WithdrawalTaxPayout {
                    burn_address,
                    burn_index,
                    burn_destination: burn.burn_destination,
                    amount: tax_amount(burn.burn_amount)?,
                });
            }
        }

        debug!(
            deposit_taxes = pending.deposit_tax_payouts.len(),
            withdrawals = pending.withdrawal_payouts.len(),
            "pending payouts computed"
        );
        Ok(pending)
    }

    /// Re-derive every proposed payout from local state and reject the set
    /// on the first disagreement.
    pub async fn validate_payouts(&self, payouts: &PendingPayouts) -> BridgeResult<()> {
        let total_tax = payouts.total_tax()?;
        let network_fee = payouts.network_fee()?;
        if total_tax < network_fee {
            return Err(PayoutMismatch::InsufficientTaxForFees {
                total_tax,
                network_fee,
            }
            .into());
        }
        reject_duplicates(payouts)?;

        self.validate_deposit_taxes(&payouts.deposit_tax_payouts).await?;
        self.validate_withdrawals(&payouts.withdrawal_payouts, &payouts.withdrawal_tax_payouts)
            .await
    }

    async fn validate_deposit_taxes(&self, payouts: &[DepositTaxPayout]) -> BridgeResult<()> {
        if payouts.is_empty() {
            return Ok(());
        }
        let received = self.confirmed_deposits().await?;
        let addresses: Vec<String> = payouts.iter().map(|p| p.deposit_address.clone()).collect();
        let records: BTreeMap<String, Satoshis> = self
            .accounting
            .db()
            .mint_deposit_records_for(&addresses)?
            .into_iter()
            .map(|r| (r.deposit_address, r.approved_tax))
            .collect();

        for payout in payouts {
            let address = &payout.deposit_address;
            if payout.amount == 0 {
                return Err(PayoutMismatch::ZeroAmount(address.clone()).into());
            }
            let balance = received.get(address).copied().unwrap_or(0);
            if balance == 0 {
                return Err(PayoutMismatch::ZeroBalance(address.clone()).into());
            }
            let approved = *records
                .get(address)
                .ok_or_else(|| PayoutMismatch::UnregisteredAddress(address.clone()))?;
            let approvable = tax_amount(balance)?;
            let proposed = payout
                .amount
                .checked_add(approved)
                .ok_or(PayoutMismatch::AmountOverflow("deposit tax"))?;
            if proposed > approvable {
                return Err(PayoutMismatch::ExceedsApprovableTax {
                    address: address.clone(),
                    proposed,
                    approvable,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn validate_withdrawals(
        &self,
        withdrawals: &[WithdrawalPayout],
        taxes: &[WithdrawalTaxPayout],
    ) -> BridgeResult<()> {
        if withdrawals.len() != taxes.len() {
            return Err(PayoutMismatch::LengthMismatch {
                withdrawals: withdrawals.len(),
                taxes: taxes.len(),
            }
            .into());
        }
        if let Some(index) = withdrawals
            .iter()
            .zip(taxes)
            .position(|(w, t)| w.key() != t.key())
        {
            return Err(PayoutMismatch::MisalignedPair { index }.into());
        }

        for (payout, tax) in withdrawals.iter().zip(taxes) {
            let burn_address = payout.burn_address.clone();
            let burn_index = payout.burn_index;

            let record = self
                .accounting
                .withdrawal(&burn_address, burn_index)?
                .ok_or_else(|| PayoutMismatch::WithdrawalNotRegistered {
                    burn_address: burn_address.clone(),
                    burn_index,
                })?;
            if record.approved_amount != 0 || record.approved_tax != 0 {
                return Err(PayoutMismatch::AlreadyApproved {
                    burn_address,
                    burn_index,
                }
                .into());
            }

            let burn = self.contract.burn_record(&burn_address, burn_index).await?;
            if payout.burn_destination != burn.burn_destination {
                return Err(PayoutMismatch::DestinationMismatch {
                    burn_address,
                    burn_index,
                }
                .into());
            }
            if tax.burn_destination != burn.burn_destination {
                return Err(PayoutMismatch::TaxDestinationMismatch {
                    burn_address,
                    burn_index,
                }
                .into());
            }

            let expected = amount_after_tax(burn.burn_amount)?;
            if payout.amount != expected {
                return Err(PayoutMismatch::AmountMismatch {
                    burn_address,
                    burn_index,
                    proposed: payout.amount,
                    expected,
                }
                .into());
            }
            let expected_tax = tax_amount(burn.burn_amount)?;
            if tax.amount != expected_tax {
                return Err(PayoutMismatch::TaxAmountMismatch {
                    burn_address,
                    burn_index,
                    proposed: tax.amount,
                    expected: expected_tax,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Spendable custody outputs: the change address at
    /// `changeConfirmations`, plus every registered deposit address that
    /// has received funds, at `depositConfirmations`.
    pub async fn compute_unspent(&self) -> BridgeResult<Vec<UnspentOutput>> {
        let settings = &self.settings;
        let mut unspent = self
            .ledger
            .list_unspent(
                settings.change_confirmations,
                std::slice::from_ref(&settings.change_address),
            )
            .await?;

        let received = self.confirmed_deposits().await?;
        let candidates: Vec<String> = received.keys().cloned().collect();
        let deposit_addresses: Vec<String> = self
            .accounting
            .db()
            .mint_deposit_records_for(&candidates)?
            .into_iter()
            .map(|r| r.deposit_address)
            .collect();
        if !deposit_addresses.is_empty() {
            unspent.extend(
                self.ledger
                    .list_unspent(settings.deposit_confirmations, &deposit_addresses)
                    .await?,
            );
        }
        Ok(unspent)
    }

    /// Every proposed input must appear, field for field, in our own view.
    pub async fn validate_unspent(&self, proposed: &[UnspentOutput]) -> BridgeResult<()> {
        let ours = self.compute_unspent().await?;
        let known: HashSet<&UnspentOutput> = ours.iter().collect();
        let mut seen = HashSet::new();
        for utxo in proposed {
            if !known.contains(utxo) || !seen.insert(utxo.outpoint()) {
                return Err(BridgeError::UnknownUtxo {
                    txid: utxo.txid.clone(),
                    vout: utxo.vout,
                });
            }
        }
        Ok(())
    }

    pub fn compute_vouts(
        &self,
        payouts: &PendingPayouts,
        unspent: &[UnspentOutput],
    ) -> BridgeResult<Vouts> {
        compute_vouts(
            payouts,
            unspent,
            &self.settings.tax_payout_addresses,
            &self.settings.change_address,
        )
    }

    /// Commit approved amounts. Only called once a real signature exists.
    pub fn apply_payouts(&self, writer: &AccountingWriter<'_>, payouts: &PendingPayouts) -> BridgeResult<()> {
        for payout in &payouts.deposit_tax_payouts {
            writer.apply_approved_tax(&payout.deposit_address, payout.amount)?;
        }
        for (payout, tax) in payouts
            .withdrawal_payouts
            .iter()
            .zip(&payouts.withdrawal_tax_payouts)
        {
            writer.apply_approved_withdrawal(
                &payout.burn_address,
                payout.burn_index,
                payout.amount,
                tax.amount,
            )?;
        }
        Ok(())
    }
}

fn reject_duplicates(payouts: &PendingPayouts) -> BridgeResult<()> {
    let mut deposits = HashSet::new();
    for payout in &payouts.deposit_tax_payouts {
        if !deposits.insert(payout.deposit_address.as_str()) {
            return Err(PayoutMismatch::DuplicatePayout(payout.deposit_address.clone()).into());
        }
    }
    let mut burns = HashSet::new();
    for payout in &payouts.withdrawal_payouts {
        if !burns.insert(payout.key()) {
            return Err(PayoutMismatch::DuplicatePayout(format!(
                "{} #{}",
                payout.burn_address, payout.burn_index
            ))
            .into());
        }
    }
    Ok(())
}
