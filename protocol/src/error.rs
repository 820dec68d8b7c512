//! Error types for the bridge protocol.
//!
//! Every fallible protocol operation returns a [`BridgeError`]. Validation
//! and invariant failures are raised before any mutation happens, so a
//! caller that sees an error can assume persisted state is untouched.

use thiserror::Error;

use crate::amount::Satoshis;
use crate::storage::db::DbError;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur anywhere in the authority protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Malformed address, amount, or request field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Envelope `data` is not a JSON object or does not match the expected schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("message expired: anchored at height {height}, oldest accepted is {min_height}")]
    MessageExpired {
        height: u64,
        min_height: u64,
    },

    /// Claimed anchor hash differs from our own view of the chain.
    #[error("chain mismatch at height {height}")]
    ChainMismatch {
        height: u64,
    },

    #[error("bad signature: not signed by an expected authority")]
    BadSignature,

    #[error("deposit address already registered: {address}")]
    AlreadyRegistered {
        address: String,
    },

    #[error("withdrawal already submitted: {burn_address} #{burn_index}")]
    DuplicateWithdrawal {
        burn_address: String,
        burn_index: u64,
    },

    #[error("mint address not registered: {0}")]
    NotRegistered(String),

    #[error("amount {amount} is below the tax floor")]
    BelowTaxFloor {
        amount: Satoshis,
    },

    /// Recorded approved tax exceeds what the current balance justifies.
    #[error("accounting invariant violated for {address}: approved {approved} > approvable {approvable}")]
    AccountingInvariantViolation {
        address: String,
        approved: Satoshis,
        approvable: Satoshis,
    },

    #[error("payout mismatch: {0}")]
    PayoutMismatch(#[from] PayoutMismatch),

    #[error("unknown utxo {txid}:{vout}")]
    UnknownUtxo {
        txid: String,
        vout: u32,
    },

    /// Supplied approval chain diverges from the locally derived transaction.
    #[error("approval chain tampered: {0}")]
    ChainTampered(String),

    #[error("insufficient funds: {available} available, {required} required")]
    InsufficientFunds {
        available: Satoshis,
        required: Satoshis,
    },

    #[error("authority {authority} unreachable: {reason}")]
    Unreachable {
        authority: String,
        reason: String,
    },

    /// The authority answered, but with an error.
    #[error("authority {authority} rejected the request ({status}): {message}")]
    Remote {
        authority: String,
        status: u16,
        message: String,
    },

    #[error("consensus failed: {0}")]
    ConsensusFailed(String),

    #[error("reconfiguration is not supported on this network")]
    ReconfigurationUnsupported,

    #[error("ledger client error: {0}")]
    Ledger(String),

    #[error("contract client error: {0}")]
    Contract(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::MessageExpired { .. } => "MessageExpired",
            Self::ChainMismatch { .. } => "ChainMismatch",
            Self::BadSignature => "BadSignature",
            Self::AlreadyRegistered { .. } => "AlreadyRegistered",
            Self::DuplicateWithdrawal { .. } => "DuplicateWithdrawal",
            Self::NotRegistered(_) => "NotRegistered",
            Self::BelowTaxFloor { .. } => "BelowTaxFloor",
            Self::AccountingInvariantViolation { .. } => "AccountingInvariantViolation",
            Self::PayoutMismatch(_) => "PayoutMismatch",
            Self::UnknownUtxo { .. } => "UnknownUtxo",
            Self::ChainTampered(_) => "ChainTampered",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::Unreachable { .. } => "Unreachable",
            Self::Remote { .. } => "Remote",
            Self::ConsensusFailed(_) => "ConsensusFailed",
            Self::ReconfigurationUnsupported => "ReconfigurationUnsupported",
            Self::Ledger(_) => "Ledger",
            Self::Contract(_) => "Contract",
            Self::Storage(_) => "Storage",
            Self::Serialization(_) => "Serialization",
        }
    }

    /// Envelope validation failures (the caller could not prove who it is
    /// or that its message is fresh).
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::MessageExpired { .. } | Self::ChainMismatch { .. } | Self::BadSignature
        )
    }

    /// Idempotency violations.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered { .. } | Self::DuplicateWithdrawal { .. }
        )
    }

    /// Failures caused by the local node or its backends rather than the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Ledger(_)
                | Self::Contract(_)
                | Self::Storage(_)
                | Self::Serialization(_)
                | Self::Unreachable { .. }
                | Self::Remote { .. }
                | Self::AccountingInvariantViolation { .. }
        )
    }

    /// HTTP status an authority answers with when a request fails this way.
    pub fn status_code(&self) -> u16 {
        if self.is_authentication() {
            401
        } else if self.is_conflict() {
            409
        } else if self.is_internal() {
            500
        } else {
            400
        }
    }
}

impl From<DbError> for BridgeError {
    fn from(err: DbError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reasons a proposed payout set is rejected by an authority's own recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutMismatch {
    #[error("total tax {total_tax} does not cover network fee {network_fee}")]
    InsufficientTaxForFees {
        total_tax: Satoshis,
        network_fee: Satoshis,
    },

    #[error("deposit address {0} has zero balance")]
    ZeroBalance(String),

    #[error("deposit tax payout for {0} is zero")]
    ZeroAmount(String),

    /// A sum over the proposed amounts does not fit in [`Satoshis`].
    #[error("payout amounts overflow while summing {0}")]
    AmountOverflow(&'static str),

    #[error("deposit address {0} is not registered")]
    UnregisteredAddress(String),

    #[error("deposit tax for {address} would raise approved tax to {proposed}, approvable is {approvable}")]
    ExceedsApprovableTax {
        address: String,
        proposed: Satoshis,
        approvable: Satoshis,
    },

    /// The same deposit address or burn appears more than once.
    #[error("payout listed twice: {0}")]
    DuplicatePayout(String),

    #[error("{withdrawals} withdrawal payouts but {taxes} withdrawal tax payouts")]
    LengthMismatch {
        withdrawals: usize,
        taxes: usize,
    },

    #[error("withdrawal payout {index} is not paired with its tax payout")]
    MisalignedPair {
        index: usize,
    },

    #[error("withdrawal {burn_address} #{burn_index} was never submitted")]
    WithdrawalNotRegistered {
        burn_address: String,
        burn_index: u64,
    },

    #[error("withdrawal {burn_address} #{burn_index} is already approved")]
    AlreadyApproved {
        burn_address: String,
        burn_index: u64,
    },

    #[error("withdrawal {burn_address} #{burn_index} destination does not match the contract")]
    DestinationMismatch {
        burn_address: String,
        burn_index: u64,
    },

    #[error("withdrawal tax {burn_address} #{burn_index} destination does not match the contract")]
    TaxDestinationMismatch {
        burn_address: String,
        burn_index: u64,
    },

    #[error("withdrawal {burn_address} #{burn_index} amount {proposed} != {expected}")]
    AmountMismatch {
        burn_address: String,
        burn_index: u64,
        proposed: Satoshis,
        expected: Satoshis,
    },

    #[error("withdrawal tax {burn_address} #{burn_index} amount {proposed} != {expected}")]
    TaxAmountMismatch {
        burn_address: String,
        burn_index: u64,
        proposed: Satoshis,
        expected: Satoshis,
    },
}
