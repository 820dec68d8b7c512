//! Persisted record types.

use serde::{Deserialize, Serialize};

use crate::amount::{self, Satoshis};

/// A mint address bound to its multisig deposit address.
///
/// `approved_tax` only ever grows, and only after a real settlement
/// signature has been produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintDepositAddressRecord {
    pub mint_address: String,
    pub deposit_address: String,
    pub redeem_script: String,
    #[serde(with = "amount::decimal")]
    pub approved_tax: Satoshis,
}

/// A burn this authority has accepted for payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub burn_address: String,
    pub burn_index: u64,
    #[serde(with = "amount::decimal")]
    pub approved_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub approved_tax: Satoshis,
}

impl WithdrawalRecord {
    pub fn new(burn_address: &str, burn_index: u64) -> Self {
        Self {
            burn_address: burn_address.to_string(),
            burn_index,
            approved_amount: 0,
            approved_tax: 0,
        }
    }

    /// Nothing has been paid out yet.
    pub fn is_unapproved(&self) -> bool {
        self.approved_amount == 0
    }

    pub fn status(&self) -> WithdrawalStatus {
        if self.approved_tax == 0 {
            WithdrawalStatus::Submitted
        } else {
            WithdrawalStatus::Approved
        }
    }
}

/// Settlement progress of a burn, as reported by `/queryBurnHistory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Submitted,
    Approved,
}

/// Full persisted state, exchanged between authorities for resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDump {
    pub mint_deposit_addresses: Vec<MintDepositAddressRecord>,
    pub used_deposit_addresses: Vec<String>,
    pub withdrawals: Vec<WithdrawalRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawal_status_follows_approved_tax() {
        let mut w = WithdrawalRecord::new("0xabc", 2);
        assert!(w.is_unapproved());
        assert_eq!(w.status(), WithdrawalStatus::Submitted);
        w.approved_amount = 99;
        w.approved_tax = 1;
        assert!(!w.is_unapproved());
        assert_eq!(w.status(), WithdrawalStatus::Approved);
        assert_eq!(serde_json::to_value(w.status()).unwrap(), "APPROVED");
    }
}
