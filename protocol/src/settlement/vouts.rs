//! Settlement transaction outputs.
//!
//! [`compute_vouts`] is the function every authority evaluates on its own
//! before signing. It takes no ledger, clock, or storage handle, and
//! iterates only ordered collections, so identical inputs produce an
//! identical [`Vouts`] map on every node.

use tracing::debug;

use crate::amount::Satoshis;
use crate::error::{BridgeError, BridgeResult, PayoutMismatch};
use crate::ledger::{total_value, UnspentOutput, Vouts};
use crate::settlement::payouts::PendingPayouts;
use crate::tax::is_dust;

/// Outputs of the settlement transaction spending `unspent`.
///
/// 1. Withdrawal payouts, aggregated by destination.
/// 2. `total_tax - network_fee`, split evenly over `tax_addresses`; the
///    division remainder stays in change.
/// 3. Dust outputs are removed and their value folded into change.
/// 4. Change goes to `change_address`, unless it is itself dust.
pub fn compute_vouts(
    payouts: &PendingPayouts,
    unspent: &[UnspentOutput],
    tax_addresses: &[String],
    change_address: &str,
) -> BridgeResult<Vouts> {
    if tax_addresses.is_empty() {
        return Err(BridgeError::InvalidInput(
            "no tax payout addresses configured".into(),
        ));
    }

    let total_tax = payouts.total_tax()?;
    let network_fee = payouts.network_fee()?;
    let distributable = total_tax
        .checked_sub(network_fee)
        .ok_or(PayoutMismatch::InsufficientTaxForFees {
            total_tax,
            network_fee,
        })?;

    let mut vouts = Vouts::new();
    for payout in &payouts.withdrawal_payouts {
        credit(&mut vouts, &payout.burn_destination, payout.amount)?;
    }
    let share = distributable / tax_addresses.len() as Satoshis;
    for address in tax_addresses {
        credit(&mut vouts, address, share)?;
    }

    let available = total_value(unspent);
    let required = vouts
        .values()
        .try_fold(network_fee, |total, amount| total.checked_add(*amount))
        .ok_or(PayoutMismatch::AmountOverflow("outputs"))?;
    let mut change = available
        .checked_sub(required)
        .ok_or(BridgeError::InsufficientFunds {
            available,
            required,
        })?;

    vouts.retain(|_, amount| {
        if is_dust(*amount) {
            change += *amount;
            false
        } else {
            true
        }
    });

    if change > 0 {
        credit(&mut vouts, change_address, change)?;
    }
    if let Some(dust) = vouts.get(change_address).copied().filter(|amount| is_dust(*amount)) {
        vouts.remove(change_address);
        debug!(
            change_address,
            amount = %dust,
            "dust change left to the network fee"
        );
    }
    Ok(vouts)
}

fn credit(vouts: &mut Vouts, address: &str, amount: Satoshis) -> Result<(), PayoutMismatch> {
    let entry = vouts.entry(address.to_string()).or_insert(0);
    *entry = entry
        .checked_add(amount)
        .ok_or(PayoutMismatch::AmountOverflow("outputs"))?;
    Ok(())
}
