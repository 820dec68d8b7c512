//! Pending payout items.
//!
//! These are recomputed on every request and never persisted until a real
//! settlement signature has been produced. Equality covers every field, so
//! two authorities agree on a payout only if they agree on all of it.

use serde::{Deserialize, Serialize};

use crate::amount::{self, Satoshis};
use crate::config::PAYOUT_NETWORK_FEE_PER_TX;
use crate::error::PayoutMismatch;

fn checked_sum(
    amounts: impl IntoIterator<Item = Satoshis>,
    what: &'static str,
) -> Result<Satoshis, PayoutMismatch> {
    amounts
        .into_iter()
        .try_fold(0 as Satoshis, |total, amount| total.checked_add(amount))
        .ok_or(PayoutMismatch::AmountOverflow(what))
}

/// Tax owed by a deposit address that has not been paid out yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositTaxPayout {
    pub deposit_address: String,
    #[serde(with = "amount::decimal")]
    pub amount: Satoshis,
}

/// Principal released to a burn's destination, net of tax.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPayout {
    pub burn_address: String,
    pub burn_index: u64,
    pub burn_destination: String,
    #[serde(with = "amount::decimal")]
    pub amount: Satoshis,
}

/// Tax taken from a burn. Keyed like its [`WithdrawalPayout`] so the two
/// can be paired; the amount goes to the tax payout addresses, not to
/// `burn_destination`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalTaxPayout {
    pub burn_address: String,
    pub burn_index: u64,
    pub burn_destination: String,
    #[serde(with = "amount::decimal")]
    pub amount: Satoshis,
}

impl WithdrawalPayout {
    pub fn key(&self) -> (&str, u64) {
        (&self.burn_address, self.burn_index)
    }
}

impl WithdrawalTaxPayout {
    pub fn key(&self) -> (&str, u64) {
        (&self.burn_address, self.burn_index)
    }
}

/// The three payout lists of one settlement round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayouts {
    pub deposit_tax_payouts: Vec<DepositTaxPayout>,
    pub withdrawal_payouts: Vec<WithdrawalPayout>,
    pub withdrawal_tax_payouts: Vec<WithdrawalTaxPayout>,
}

impl PendingPayouts {
    pub fn is_empty(&self) -> bool {
        self.deposit_tax_payouts.is_empty()
            && self.withdrawal_payouts.is_empty()
            && self.withdrawal_tax_payouts.is_empty()
    }

    // Totals over coordinator-supplied amounts never wrap.

    pub fn total_deposit_tax(&self) -> Result<Satoshis, PayoutMismatch> {
        checked_sum(self.deposit_tax_payouts.iter().map(|p| p.amount), "deposit tax")
    }

    pub fn total_withdrawal(&self) -> Result<Satoshis, PayoutMismatch> {
        checked_sum(self.withdrawal_payouts.iter().map(|p| p.amount), "withdrawals")
    }

    pub fn total_withdrawal_tax(&self) -> Result<Satoshis, PayoutMismatch> {
        checked_sum(self.withdrawal_tax_payouts.iter().map(|p| p.amount), "withdrawal tax")
    }

    /// Deposit tax plus withdrawal tax.
    pub fn total_tax(&self) -> Result<Satoshis, PayoutMismatch> {
        checked_sum(
            [self.total_deposit_tax()?, self.total_withdrawal_tax()?],
            "total tax",
        )
    }

    /// Ledger fee reserved for this round: one unit per deposit-tax payout
    /// and one per withdrawal payout.
    pub fn network_fee(&self) -> Result<Satoshis, PayoutMismatch> {
        let items = self.deposit_tax_payouts.len() + self.withdrawal_payouts.len();
        PAYOUT_NETWORK_FEE_PER_TX
            .checked_mul(items as Satoshis)
            .ok_or(PayoutMismatch::AmountOverflow("network fee"))
    }

    /// Keep only the parts the caller asked to settle.
    pub fn restrict(mut self, process_deposits: bool, process_withdrawals: bool) -> Self {
        if !process_deposits {
            self.deposit_tax_payouts.clear();
        }
        if !process_withdrawals {
            self.withdrawal_payouts.clear();
            self.withdrawal_tax_payouts.clear();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;

    fn sample() -> PendingPayouts {
        PendingPayouts {
            deposit_tax_payouts: vec![DepositTaxPayout {
                deposit_address: "gM1".into(),
                amount: 3 * COIN,
            }],
            withdrawal_payouts: vec![WithdrawalPayout {
                burn_address: "0xb0b".into(),
                burn_index: 0,
                burn_destination: "gDest".into(),
                amount: 99 * COIN,
            }],
            withdrawal_tax_payouts: vec![WithdrawalTaxPayout {
                burn_address: "0xb0b".into(),
                burn_index: 0,
                burn_destination: "gDest".into(),
                amount: COIN,
            }],
        }
    }

    #[test]
    fn totals_and_fee() {
        let p = sample();
        assert_eq!(p.total_tax(), Ok(4 * COIN));
        assert_eq!(p.total_withdrawal(), Ok(99 * COIN));
        assert_eq!(p.network_fee(), Ok(2 * PAYOUT_NETWORK_FEE_PER_TX));
    }

    #[test]
    fn totals_refuse_to_wrap() {
        let mut p = sample();
        p.deposit_tax_payouts[0].amount = Satoshis::MAX;
        assert_eq!(p.total_deposit_tax(), Ok(Satoshis::MAX));
        assert_eq!(
            p.total_tax(),
            Err(PayoutMismatch::AmountOverflow("total tax"))
        );

        let mut p = sample();
        p.withdrawal_payouts.push(WithdrawalPayout {
            amount: Satoshis::MAX,
            ..p.withdrawal_payouts[0].clone()
        });
        assert_eq!(
            p.total_withdrawal(),
            Err(PayoutMismatch::AmountOverflow("withdrawals"))
        );
    }

    #[test]
    fn wire_shape_is_camel_case_with_string_amounts() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["depositTaxPayouts"][0]["depositAddress"], "gM1");
        assert_eq!(json["withdrawalPayouts"][0]["burnIndex"], 0);
        assert_eq!(json["withdrawalTaxPayouts"][0]["amount"], "100000000");
    }

    #[test]
    fn restrict_clears_unrequested_lists() {
        let p = sample().restrict(false, true);
        assert!(p.deposit_tax_payouts.is_empty());
        assert_eq!(p.withdrawal_payouts.len(), 1);

        let p = sample().restrict(true, false);
        assert!(p.withdrawal_payouts.is_empty() && p.withdrawal_tax_payouts.is_empty());
        assert!(!p.is_empty());
    }
}
