//! # Authority RPC Definitions
//!
//! Endpoint enumeration and request/response bodies of the authority RPC
//! surface. The HTTP server lives in the node binary; this module only
//! fixes the wire shapes so that the server, the peer transport and the
//! operator CLI agree on them.
//!
//! Every endpoint is a `POST` with a JSON body. Responses are always a
//! [`SignedEnvelope`](crate::envelope::SignedEnvelope) from the answering
//! authority. Public endpoints take the plain request type below;
//! authority-only endpoints take an envelope wrapping it.
//!
//! ## Endpoint Index
//!
//! | Path                            | Caller      | Body                                 |
//! |---------------------------------|-------------|--------------------------------------|
//! | `/ping`                         | anyone      | `{}`                                 |
//! | `/generateDepositAddress`       | anyone      | [`MintAddressRequest`]               |
//! | `/registerMintDepositAddress`   | anyone      | [`RegisterMintDepositAddressRequest`]|
//! | `/queryMintBalance`             | anyone      | [`MintAddressRequest`]               |
//! | `/createMintTransaction`        | anyone      | [`MintAddressRequest`]               |
//! | `/queryBurnHistory`             | anyone      | [`BurnHistoryRequest`]               |
//! | `/submitWithdrawal`             | anyone      | [`SubmitWithdrawalRequest`]          |
//! | `/triggerReconfigurationEvent`  | coordinator | [`ReconfigurationRequest`]           |
//! | `/stats`                        | anyone      | `{}`                                 |
//! | `/log`                          | authority   | `{}`                                 |
//! | `/computePendingPayouts`        | authority   | [`ComputePendingPayoutsRequest`]     |
//! | `/computeUnspent`               | authority   | `{}`                                 |
//! | `/approvePayouts`               | coordinator | [`ApprovalRequest`](crate::settlement::ApprovalRequest) |
//! | `/approvePayoutsTest`           | coordinator | [`ApprovalRequest`](crate::settlement::ApprovalRequest) |
//! | `/dumpDatabase`                 | authority   | `{}`                                 |
//! | `/terminate`                    | authority   | `{}`                                 |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::{self, Satoshis};
use crate::crypto::ContractSignature;
use crate::envelope::SignedEnvelope;
use crate::ledger::UnspentOutput;
use crate::settings::NetworkSettings;
use crate::storage::WithdrawalStatus;

// ---------------------------------------------------------------------------
// Endpoint Enumeration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ping,
    GenerateDepositAddress,
    RegisterMintDepositAddress,
    QueryMintBalance,
    CreateMintTransaction,
    QueryBurnHistory,
    SubmitWithdrawal,
    TriggerReconfigurationEvent,
    Stats,
    Log,
    ComputePendingPayouts,
    ComputeUnspent,
    ApprovePayouts,
    ApprovePayoutsTest,
    DumpDatabase,
    Terminate,
}

impl Endpoint {
    pub const ALL: [Endpoint; 16] = [
        Endpoint::Ping,
        Endpoint::GenerateDepositAddress,
        Endpoint::RegisterMintDepositAddress,
        Endpoint::QueryMintBalance,
        Endpoint::CreateMintTransaction,
        Endpoint::QueryBurnHistory,
        Endpoint::SubmitWithdrawal,
        Endpoint::TriggerReconfigurationEvent,
        Endpoint::Stats,
        Endpoint::Log,
        Endpoint::ComputePendingPayouts,
        Endpoint::ComputeUnspent,
        Endpoint::ApprovePayouts,
        Endpoint::ApprovePayoutsTest,
        Endpoint::DumpDatabase,
        Endpoint::Terminate,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Self::Ping => "/ping",
            Self::GenerateDepositAddress => "/generateDepositAddress",
            Self::RegisterMintDepositAddress => "/registerMintDepositAddress",
            Self::QueryMintBalance => "/queryMintBalance",
            Self::CreateMintTransaction => "/createMintTransaction",
            Self::QueryBurnHistory => "/queryBurnHistory",
            Self::SubmitWithdrawal => "/submitWithdrawal",
            Self::TriggerReconfigurationEvent => "/triggerReconfigurationEvent",
            Self::Stats => "/stats",
            Self::Log => "/log",
            Self::ComputePendingPayouts => "/computePendingPayouts",
            Self::ComputeUnspent => "/computeUnspent",
            Self::ApprovePayouts => "/approvePayouts",
            Self::ApprovePayoutsTest => "/approvePayoutsTest",
            Self::DumpDatabase => "/dumpDatabase",
            Self::Terminate => "/terminate",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.path() == path)
    }

    /// Whether the request body must be a [`SignedEnvelope`].
    pub fn requires_envelope(&self) -> bool {
        matches!(
            self,
            Self::TriggerReconfigurationEvent
                | Self::Log
                | Self::ComputePendingPayouts
                | Self::ComputeUnspent
                | Self::ApprovePayouts
                | Self::ApprovePayoutsTest
                | Self::DumpDatabase
                | Self::Terminate
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Empty object, for endpoints that take or return nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintAddressRequest {
    pub mint_address: String,
}

/// Every authority's `/generateDepositAddress` reply, in authority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMintDepositAddressRequest {
    pub mint_address: String,
    pub generate_deposit_address_responses: Vec<SignedEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnHistoryRequest {
    pub burn_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWithdrawalRequest {
    pub burn_address: String,
    pub burn_index: u64,
}

/// Proposed federation for the next configuration epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigurationRequest {
    pub addresses: Vec<String>,
    pub config_nonce: u64,
    pub new_authority_threshold: usize,
    #[serde(with = "amount::decimal")]
    pub new_min_burn_amount: Satoshis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputePendingPayoutsRequest {
    pub process_deposits: bool,
    pub process_withdrawals: bool,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDepositAddressResponse {
    pub mint_address: String,
    /// A fresh individual ledger address owned by the answering authority.
    pub deposit_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositAddressResponse {
    pub deposit_address: String,
}

/// Amounts are net of tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintBalanceResponse {
    pub mint_nonce: u64,
    pub mint_address: String,
    pub deposit_address: String,
    #[serde(with = "amount::decimal")]
    pub deposited_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub unconfirmed_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub minted_amount: Satoshis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTransactionResponse {
    pub mint_address: String,
    pub mint_nonce: u64,
    pub deposit_address: String,
    #[serde(with = "amount::decimal")]
    pub mint_amount: Satoshis,
    pub on_contract_verification: ContractSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnHistoryEntry {
    pub burn_destination: String,
    #[serde(with = "amount::decimal")]
    pub burn_amount: Satoshis,
    /// `None` until the burn is submitted for withdrawal.
    pub status: Option<WithdrawalStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnHistoryResponse {
    pub burn_history: Vec<BurnHistoryEntry>,
}

/// Answer to a reconfiguration vote. `msg` is [`CONSENSUS_PASS`] and
/// `signature` present only when the proposal matched local settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigurationResponse {
    pub msg: String,
    pub config_nonce: u64,
    pub new_authority_addresses: Vec<String>,
    pub new_authority_threshold: usize,
    #[serde(with = "amount::decimal")]
    pub new_min_burn_amount: Satoshis,
    #[serde(flatten)]
    pub signature: Option<ContractSignature>,
}

pub const CONSENSUS_PASS: &str = "consensus pass";

impl ReconfigurationResponse {
    pub fn passed(&self) -> bool {
        self.msg == CONSENSUS_PASS && self.signature.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentResponse {
    pub unspent: Vec<UnspentOutput>,
}

/// One failed request, as kept in the authority's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub path: String,
    pub request: serde_json::Value,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogResponse {
    pub log: Vec<ErrorLogEntry>,
}

/// Body of non-2xx HTTP replies. Not signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub package: String,
    pub protocol_version: String,
    /// Version string reported by the ledger daemon.
    pub genix_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositStats {
    pub count: usize,
    #[serde(with = "amount::decimal")]
    pub total_deposited_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approvable_tax: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approved_tax: Satoshis,
    #[serde(with = "amount::decimal")]
    pub remaining_approvable_tax: Satoshis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalStats {
    pub count: usize,
    #[serde(with = "amount::decimal")]
    pub total_burned_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approvable_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approved_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approvable_tax: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_approved_tax: Satoshis,
    #[serde(with = "amount::decimal")]
    pub remaining_approvable_amount: Satoshis,
    #[serde(with = "amount::decimal")]
    pub remaining_approvable_tax: Satoshis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoStats {
    #[serde(with = "amount::decimal")]
    pub total_change_balance: Satoshis,
    #[serde(with = "amount::decimal")]
    pub total_deposits_balance: Satoshis,
}

/// Snapshot served by `/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityStats {
    pub version: VersionInfo,
    pub current_height: u64,
    /// Milliseconds since the Unix epoch at which the snapshot was taken.
    pub time: i64,
    /// Network settings without RPC credentials.
    pub network_settings: NetworkSettings,
    pub wallet_address: String,
    pub confirmed_deposits: DepositStats,
    pub unconfirmed_deposits: DepositStats,
    pub withdrawals: WithdrawalStats,
    pub confirmed_utxos: UtxoStats,
    pub unconfirmed_utxos: UtxoStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_unique_and_reversible() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_path(endpoint.path()), Some(endpoint));
        }
        assert_eq!(Endpoint::from_path("/nope"), None);
    }

    #[test]
    fn public_endpoints_take_plain_json() {
        assert!(!Endpoint::GenerateDepositAddress.requires_envelope());
        assert!(!Endpoint::SubmitWithdrawal.requires_envelope());
        assert!(Endpoint::ApprovePayouts.requires_envelope());
        assert!(Endpoint::Terminate.requires_envelope());
    }

    #[test]
    fn reconfiguration_signature_is_flattened() {
        let response = ReconfigurationResponse {
            msg: CONSENSUS_PASS.into(),
            config_nonce: 4,
            new_authority_addresses: vec!["0xaa".into()],
            new_authority_threshold: 1,
            new_min_burn_amount: 5,
            signature: Some(ContractSignature {
                v: 27,
                r: "0x01".into(),
                s: "0x02".into(),
            }),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["v"], 27);
        assert_eq!(json["newMinBurnAmount"], "5");
        let back: ReconfigurationResponse = serde_json::from_value(json).unwrap();
        assert!(back.passed());

        let rejected: ReconfigurationResponse = serde_json::from_value(serde_json::json!({
            "msg": "",
            "configNonce": 4,
            "newAuthorityAddresses": [],
            "newAuthorityThreshold": 1,
            "newMinBurnAmount": "5"
        }))
        .unwrap();
        assert!(rejected.signature.is_none());
        assert!(!rejected.passed());
    }

    #[test]
    fn burn_status_serializes_as_null_until_submitted() {
        let entry = BurnHistoryEntry {
            burn_destination: "gDest".into(),
            burn_amount: 1,
            status: None,
        };
        assert!(serde_json::to_value(&entry).unwrap()["status"].is_null());
    }
}
