//! # Protocol Configuration & Constants
//!
//! Every fixed number the authorities must agree on lives here. Two
//! authorities running with different values in this file will compute
//! different settlement transactions and refuse to co-sign each other's
//! chains, so treat any change as a coordinated upgrade.
//!
//! Deployment-specific values (authority set, thresholds, addresses) are
//! not constants; they are loaded from the settings folder by
//! [`crate::settings`].

use std::time::Duration;

use crate::amount::{Satoshis, COIN};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version string reported in `/stats` and by `wgenix-node version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Fee / Tax Parameters
// ---------------------------------------------------------------------------

/// Minimum deposit worth acting on: 1 GENIX.
pub const AMOUNT_THRESHOLD: Satoshis = COIN;

/// Flat component of the bridge tax. Zero in this deployment, so the tax
/// is a pure 1% of the gross amount.
pub const FLAT_FEE: Satoshis = 0;

/// Percentage divisor applied to the remainder above [`FLAT_FEE`].
pub const TAX_DIVISOR: Satoshis = 100;

/// Outputs smaller than this are never created: 1 GENIX.
pub const DUST_THRESHOLD: Satoshis = COIN;

/// Ledger network fee reserved per deposit-tax payout and per withdrawal
/// payout in a settlement transaction: 1 GENIX each.
pub const PAYOUT_NETWORK_FEE_PER_TX: Satoshis = COIN;

// ---------------------------------------------------------------------------
// Envelope Freshness
// ---------------------------------------------------------------------------

/// Envelopes are anchored this many blocks below the signer's tip. A
/// verifier accepts anchors no older than twice this value below its own
/// tip, which bounds the replay window to roughly 30 blocks.
pub const SYNC_DELAY_THRESHOLD: u64 = 15;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Aggregate statistics are recomputed at most this often.
pub const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Per-call timeout for authority-to-authority requests.
pub const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call timeout for requests issued by the operator CLI. Settlement
/// hops sign transactions and can take a while on a busy ledger node.
pub const OPERATOR_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for JSON-RPC calls to the local ledger and contract indexer.
pub const BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a running authority samples the ledger tip for its metrics.
pub const HEIGHT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Default port each authority serves its RPC surface on.
pub const DEFAULT_AUTHORITY_PORT: u16 = 8443;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// Maximum number of entries retained by the in-memory error log.
pub const ERROR_LOG_CAPACITY: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dust_threshold_is_positive() {
        assert!(DUST_THRESHOLD > 0);
    }

    #[test]
    fn network_fee_does_not_exceed_tax_on_threshold_deposit() {
        // A minimum-size deposit must at least be able to pay its own
        // payout fee once enough of them are batched; with a 1% tax that
        // takes 100 deposits. Guard against someone bumping the fee by 100x.
        assert!(PAYOUT_NETWORK_FEE_PER_TX <= AMOUNT_THRESHOLD);
    }

    #[test]
    fn freshness_window_is_twice_the_anchor_delay() {
        assert_eq!(2 * SYNC_DELAY_THRESHOLD, 30);
    }

    #[test]
    fn operator_timeout_exceeds_peer_timeout() {
        assert!(OPERATOR_REQUEST_TIMEOUT > PEER_REQUEST_TIMEOUT);
    }
}
