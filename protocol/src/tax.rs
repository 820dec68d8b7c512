//! # Fee / Tax Arithmetic
//!
//! Pure integer functions over gross amounts in satoshis. Every authority
//! evaluates these independently and must land on the same number, so no
//! rounding mode other than floor division is ever used.
//!
//! ```text
//! taxAmount(x)      = FLAT_FEE + floor((x - FLAT_FEE) / TAX_DIVISOR)
//! amountAfterTax(x) = x - taxAmount(x)
//! ```

use crate::amount::Satoshis;
use crate::config::{AMOUNT_THRESHOLD, DUST_THRESHOLD, FLAT_FEE, TAX_DIVISOR};
use crate::error::{BridgeError, BridgeResult};

/// Whether `gross` is large enough to be taxed at all.
pub fn meets_tax(gross: Satoshis) -> bool {
    gross.checked_sub(FLAT_FEE).is_some()
}

/// Tax owed on `gross`. Fails with [`BridgeError::BelowTaxFloor`] rather
/// than clamping when the amount cannot cover the flat fee.
pub fn tax_amount(gross: Satoshis) -> BridgeResult<Satoshis> {
    tax_with_flat_fee(gross, FLAT_FEE)
}

fn tax_with_flat_fee(gross: Satoshis, flat_fee: Satoshis) -> BridgeResult<Satoshis> {
    let taxable = gross
        .checked_sub(flat_fee)
        .ok_or(BridgeError::BelowTaxFloor { amount: gross })?;
    Ok(flat_fee + taxable / TAX_DIVISOR)
}

/// Net amount left after tax.
pub fn amount_after_tax(gross: Satoshis) -> BridgeResult<Satoshis> {
    Ok(gross - tax_amount(gross)?)
}

/// Whether a deposit is worth acting on.
pub fn meets_threshold(gross: Satoshis) -> bool {
    gross >= AMOUNT_THRESHOLD
}

/// Whether an output of this size may be created.
pub fn is_dust(amount: Satoshis) -> bool {
    amount < DUST_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;

    #[test]
    fn one_percent_of_a_billion() {
        assert_eq!(tax_amount(1_000_000_000).unwrap(), 10_000_000);
        assert_eq!(amount_after_tax(1_000_000_000).unwrap(), 990_000_000);
    }

    #[test]
    fn tax_plus_net_is_gross() {
        for gross in [0u128, 1, 99, 100, 101, 12_345, COIN, 7 * COIN + 3, u64::MAX as u128] {
            let tax = tax_amount(gross).unwrap();
            let net = amount_after_tax(gross).unwrap();
            assert_eq!(tax + net, gross, "gross {gross}");
        }
    }

    #[test]
    fn floor_division_rounds_tax_down() {
        assert_eq!(tax_amount(199).unwrap(), 1);
        assert_eq!(tax_amount(99).unwrap(), 0);
    }

    #[test]
    fn handles_ledger_scale_magnitudes() {
        let gross: Satoshis = u128::MAX / 2;
        let tax = tax_amount(gross).unwrap();
        assert_eq!(tax, gross / 100);
    }

    #[test]
    fn thresholds() {
        assert!(meets_threshold(COIN));
        assert!(!meets_threshold(COIN - 1));
        assert!(is_dust(COIN - 1));
        assert!(!is_dust(COIN));
    }

    #[test]
    fn below_flat_fee_fails_instead_of_clamping() {
        let err = tax_with_flat_fee(9, 10).unwrap_err();
        assert!(matches!(err, BridgeError::BelowTaxFloor { amount: 9 }));
        assert_eq!(tax_with_flat_fee(10, 10).unwrap(), 10);
        assert_eq!(tax_with_flat_fee(1_010, 10).unwrap(), 20);
    }

    #[test]
    fn zero_meets_the_zero_flat_fee() {
        assert!(meets_tax(0));
        assert_eq!(tax_amount(0).unwrap(), 0);
    }
}
