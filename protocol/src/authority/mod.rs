//! # Authority Service
//!
//! One federation member's answers to the RPC surface in [`crate::rpc`].
//! Transport-agnostic: the node binary mounts [`AuthorityService::handle`]
//! behind axum, tests call it in-process through
//! [`crate::sim::SimTransport`].
//!
//! Every successful answer is a [`SignedEnvelope`] from this authority.
//! Every failure is recorded in the [`ErrorLog`] before it is returned.
//!
//! | Caller check            | Endpoints                                                       |
//! |-------------------------|-----------------------------------------------------------------|
//! | none (plain JSON)       | ping, generate/register deposit address, mint, burn, stats      |
//! | payout coordinator only | triggerReconfigurationEvent, approvePayouts, approvePayoutsTest |
//! | any authority           | log, computePendingPayouts, computeUnspent, dumpDatabase, terminate |

pub mod error_log;
pub mod stats;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::accounting::LedgerAccounting;
use crate::config::{ERROR_LOG_CAPACITY, PROTOCOL_VERSION, STATS_REFRESH_INTERVAL};
use crate::contract::ContractClient;
use crate::crypto::{configure_digest, mint_digest, sign_contract_call, AuthorityWallet};
use crate::envelope::{EnvelopeCodec, SignedEnvelope};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::LedgerClient;
use crate::rpc::{
    AuthorityStats, BurnHistoryEntry, BurnHistoryRequest, BurnHistoryResponse,
    ComputePendingPayoutsRequest, DepositAddressResponse, Empty, Endpoint,
    GenerateDepositAddressResponse, LogResponse, MintAddressRequest, MintBalanceResponse,
    MintTransactionResponse, PingResponse, ReconfigurationRequest, ReconfigurationResponse,
    RegisterMintDepositAddressRequest, SubmitWithdrawalRequest, UnspentResponse, VersionInfo,
    CONSENSUS_PASS,
};
use crate::settings::NetworkSettings;
use crate::settlement::{ApprovalCoordinator, ApprovalMode, ApprovalResponse, PendingPayouts, SettlementPlanner};
use crate::storage::{BridgeDB, StateDump};
use crate::tax::{amount_after_tax, meets_tax};

pub use error_log::ErrorLog;
pub use stats::StatsCache;

pub struct AuthorityService {
    settings: Arc<NetworkSettings>,
    codec: EnvelopeCodec,
    ledger: Arc<dyn LedgerClient>,
    contract: Arc<dyn ContractClient>,
    planner: Arc<SettlementPlanner>,
    approvals: ApprovalCoordinator,
    stats: StatsCache,
    errors: ErrorLog,
    shutdown: Arc<Notify>,
}

fn decode<T: DeserializeOwned>(body: &Value) -> BridgeResult<T> {
    serde_json::from_value(body.clone()).map_err(|e| BridgeError::InvalidPayload(e.to_string()))
}

fn after_tax_or_zero(amount: u128) -> u128 {
    if meets_tax(amount) {
        amount_after_tax(amount).unwrap_or(0)
    } else {
        0
    }
}

impl AuthorityService {
    pub fn new(
        settings: Arc<NetworkSettings>,
        db: BridgeDB,
        wallet: AuthorityWallet,
        ledger: Arc<dyn LedgerClient>,
        contract: Arc<dyn ContractClient>,
    ) -> Self {
        let accounting = Arc::new(LedgerAccounting::new(
            db,
            ledger.clone(),
            settings.authority_threshold,
        ));
        let planner = Arc::new(SettlementPlanner::new(
            accounting,
            ledger.clone(),
            contract.clone(),
            settings.clone(),
        ));
        let codec = EnvelopeCodec::new(ledger.clone(), wallet, settings.sync_delay_threshold);
        let approvals = ApprovalCoordinator::new(
            planner.clone(),
            codec.clone(),
            settings.coordinator().wallet_address.clone(),
        );
        Self {
            settings,
            codec,
            ledger,
            contract,
            planner,
            approvals,
            stats: StatsCache::new(STATS_REFRESH_INTERVAL),
            errors: ErrorLog::new(ERROR_LOG_CAPACITY),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Replace the stats refresh policy.
    pub fn with_stats_cache(mut self, stats: StatsCache) -> Self {
        self.stats = stats;
        self
    }

    pub fn address(&self) -> String {
        self.codec.address()
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn planner(&self) -> &Arc<SettlementPlanner> {
        &self.planner
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn stats_refreshes(&self) -> u64 {
        self.stats.refreshes()
    }

    /// Notified once a verified `/terminate` has been answered.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Answer one request. Failures are logged and returned unchanged.
    pub async fn handle(&self, endpoint: Endpoint, body: Value) -> BridgeResult<SignedEnvelope> {
        let outcome = self.dispatch(endpoint, &body).await;
        if let Err(e) = &outcome {
            self.errors.record(endpoint.path(), &body, e);
        }
        outcome
    }

    async fn dispatch(&self, endpoint: Endpoint, body: &Value) -> BridgeResult<SignedEnvelope> {
        match endpoint {
            Endpoint::Ping => self.sign(&self.ping()).await,
            Endpoint::GenerateDepositAddress => {
                let response = self.generate_deposit_address(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::RegisterMintDepositAddress => {
                let response = self.register_mint_deposit_address(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::QueryMintBalance => {
                let response = self.query_mint_balance(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::CreateMintTransaction => {
                let response = self.create_mint_transaction(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::QueryBurnHistory => {
                let response = self.query_burn_history(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::SubmitWithdrawal => {
                self.submit_withdrawal(&decode(body)?).await?;
                self.sign(&Empty {}).await
            }
            Endpoint::TriggerReconfigurationEvent => {
                let response = self.trigger_reconfiguration(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::Stats => {
                let response = self.stats().await?;
                self.sign(&response).await
            }
            Endpoint::Log => {
                let response = self.log(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::ComputePendingPayouts => {
                let response = self.compute_pending_payouts(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::ComputeUnspent => {
                let response = self.compute_unspent(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::ApprovePayouts => {
                let response = self.approve(&decode(body)?, ApprovalMode::Real).await?;
                self.sign(&response).await
            }
            Endpoint::ApprovePayoutsTest => {
                let response = self.approve(&decode(body)?, ApprovalMode::Test).await?;
                self.sign(&response).await
            }
            Endpoint::DumpDatabase => {
                let response = self.dump_database(&decode(body)?).await?;
                self.sign(&response).await
            }
            Endpoint::Terminate => {
                self.verify_peer::<Empty>(&decode(body)?).await?;
                let envelope = self.sign(&Empty {}).await?;
                warn!("termination requested by a federation peer");
                self.shutdown.notify_one();
                Ok(envelope)
            }
        }
    }

    async fn sign<T: Serialize + ?Sized>(&self, payload: &T) -> BridgeResult<SignedEnvelope> {
        self.codec.create(payload).await
    }

    /// Envelope from any configured authority.
    async fn verify_peer<T: DeserializeOwned>(&self, envelope: &SignedEnvelope) -> BridgeResult<T> {
        let (payload, _) = self
            .codec
            .verify_one_of(envelope, &self.settings.wallet_addresses())
            .await?;
        Ok(payload)
    }

    fn check_account_address(&self, field: &str, address: &str) -> BridgeResult<()> {
        if self.contract.is_address(address) {
            Ok(())
        } else {
            Err(BridgeError::InvalidInput(format!("{field} missing or invalid: {address:?}")))
        }
    }

    fn registered_deposit_address(&self, mint_address: &str) -> BridgeResult<String> {
        self.planner
            .accounting()
            .deposit_address(mint_address)?
            .ok_or_else(|| BridgeError::NotRegistered(mint_address.to_string()))
    }

    // -----------------------------------------------------------------------
    // Public endpoints
    // -----------------------------------------------------------------------

    pub fn ping(&self) -> PingResponse {
        PingResponse {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub async fn generate_deposit_address(
        &self,
        request: &MintAddressRequest,
    ) -> BridgeResult<GenerateDepositAddressResponse> {
        self.check_account_address("mintAddress", &request.mint_address)?;
        Ok(GenerateDepositAddressResponse {
            mint_address: request.mint_address.clone(),
            deposit_address: self.ledger.get_new_address().await?,
        })
    }

    /// Verify every authority's individual address and bind the derived
    /// multisig to the mint address.
    pub async fn register_mint_deposit_address(
        &self,
        request: &RegisterMintDepositAddressRequest,
    ) -> BridgeResult<DepositAddressResponse> {
        let nodes = &self.settings.authority_nodes;
        let responses = &request.generate_deposit_address_responses;
        if responses.len() != nodes.len() {
            return Err(BridgeError::InvalidInput(format!(
                "expected {} deposit address responses, got {}",
                nodes.len(),
                responses.len()
            )));
        }

        let mut candidates = Vec::with_capacity(responses.len());
        for (envelope, node) in responses.iter().zip(nodes) {
            let generated: GenerateDepositAddressResponse =
                self.codec.verify(envelope, &node.wallet_address).await?;
            if generated.mint_address != request.mint_address {
                return Err(BridgeError::ConsensusFailed(format!(
                    "authority {} generated an address for mint {}",
                    node.wallet_address, generated.mint_address
                )));
            }
            candidates.push(generated.deposit_address);
        }
        self.check_account_address("mintAddress", &request.mint_address)?;

        let writer = self.planner.accounting().write().await;
        let record = writer
            .register_deposit_address(&request.mint_address, &candidates)
            .await?;
        Ok(DepositAddressResponse {
            deposit_address: record.deposit_address,
        })
    }

    pub async fn query_mint_balance(&self, request: &MintAddressRequest) -> BridgeResult<MintBalanceResponse> {
        self.check_account_address("mintAddress", &request.mint_address)?;
        let deposit_address = self.registered_deposit_address(&request.mint_address)?;

        let confirmed = self
            .ledger
            .received_by_address(self.settings.deposit_confirmations, &deposit_address)
            .await?;
        let seen = self.ledger.received_by_address(0, &deposit_address).await?;
        let unconfirmed = seen.saturating_sub(confirmed);
        let history = self
            .contract
            .mint_history(&request.mint_address, &deposit_address)
            .await?;

        Ok(MintBalanceResponse {
            mint_nonce: history.mint_nonce,
            mint_address: request.mint_address.clone(),
            deposit_address,
            deposited_amount: after_tax_or_zero(confirmed),
            unconfirmed_amount: after_tax_or_zero(unconfirmed),
            minted_amount: history.minted_amount,
        })
    }

    /// Sign a mint of everything deposited (after tax) and not yet minted.
    pub async fn create_mint_transaction(
        &self,
        request: &MintAddressRequest,
    ) -> BridgeResult<MintTransactionResponse> {
        self.check_account_address("mintAddress", &request.mint_address)?;
        let deposit_address = self.registered_deposit_address(&request.mint_address)?;

        let confirmed = self
            .ledger
            .received_by_address(self.settings.deposit_confirmations, &deposit_address)
            .await?;
        let history = self
            .contract
            .mint_history(&request.mint_address, &deposit_address)
            .await?;
        let mint_amount = after_tax_or_zero(confirmed).saturating_sub(history.minted_amount);

        let digest = mint_digest(
            self.settings.chain_id,
            &request.mint_address,
            history.mint_nonce,
            &deposit_address,
            mint_amount,
        );
        info!(
            mint_address = %request.mint_address,
            mint_nonce = history.mint_nonce,
            mint_amount = %mint_amount,
            "mint authorised"
        );
        Ok(MintTransactionResponse {
            mint_address: request.mint_address.clone(),
            mint_nonce: history.mint_nonce,
            deposit_address,
            mint_amount,
            on_contract_verification: sign_contract_call(self.codec.wallet(), &digest),
        })
    }

    pub async fn query_burn_history(&self, request: &BurnHistoryRequest) -> BridgeResult<BurnHistoryResponse> {
        self.check_account_address("burnAddress", &request.burn_address)?;
        let burns = self.contract.burn_history(&request.burn_address).await?;
        let accounting = self.planner.accounting();

        let mut burn_history = Vec::with_capacity(burns.len());
        for (index, burn) in burns.into_iter().enumerate() {
            let status = accounting
                .withdrawal(&request.burn_address, index as u64)?
                .map(|w| w.status());
            burn_history.push(BurnHistoryEntry {
                burn_destination: burn.burn_destination,
                burn_amount: burn.burn_amount,
                status,
            });
        }
        Ok(BurnHistoryResponse { burn_history })
    }

    pub async fn submit_withdrawal(&self, request: &SubmitWithdrawalRequest) -> BridgeResult<()> {
        self.check_account_address("burnAddress", &request.burn_address)?;
        let accounting = self.planner.accounting();
        let writer = accounting.write().await;

        if accounting
            .withdrawal(&request.burn_address, request.burn_index)?
            .is_some()
        {
            return Err(BridgeError::DuplicateWithdrawal {
                burn_address: request.burn_address.clone(),
                burn_index: request.burn_index,
            });
        }
        let burn = self
            .contract
            .burn_record(&request.burn_address, request.burn_index)
            .await?;
        if !self.ledger.verify_address(&burn.burn_destination).await? {
            return Err(BridgeError::InvalidInput(format!(
                "withdrawal destination {} is not a valid ledger address",
                burn.burn_destination
            )));
        }
        if !meets_tax(burn.burn_amount) {
            return Err(BridgeError::BelowTaxFloor {
                amount: burn.burn_amount,
            });
        }
        writer.record_withdrawal(&request.burn_address, request.burn_index)?;
        Ok(())
    }

    pub async fn stats(&self) -> BridgeResult<AuthorityStats> {
        self.stats.get_or_refresh(|| self.collect_stats()).await
    }

    async fn collect_stats(&self) -> BridgeResult<AuthorityStats> {
        let settings = &self.settings;
        let db = self.planner.accounting().db();
        let current_height = self.ledger.block_count().await?;

        let records = db.mint_deposit_records()?;
        let deposit_addresses: Vec<String> =
            records.iter().map(|r| r.deposit_address.clone()).collect();
        let confirmed = self
            .ledger
            .received_by_addresses(settings.deposit_confirmations, &deposit_addresses)
            .await?;
        let seen = self.ledger.received_by_addresses(0, &deposit_addresses).await?;

        let withdrawals = db.withdrawals()?;
        let keys: Vec<(String, u64)> = withdrawals
            .iter()
            .map(|w| (w.burn_address.clone(), w.burn_index))
            .collect();
        let burns = self.contract.burn_records(&keys).await?;

        let change = std::slice::from_ref(&settings.change_address);
        let confirmed_change = self.ledger.list_unspent(settings.change_confirmations, change).await?;
        let unconfirmed_change = self.ledger.list_unspent(0, change).await?;
        let (confirmed_held, unconfirmed_held) = if deposit_addresses.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            (
                self.ledger
                    .list_unspent(settings.deposit_confirmations, &deposit_addresses)
                    .await?,
                self.ledger.list_unspent(0, &deposit_addresses).await?,
            )
        };

        Ok(AuthorityStats {
            version: VersionInfo {
                package: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
                protocol_version: PROTOCOL_VERSION.to_string(),
                genix_version: self.ledger.client_version().await?,
            },
            current_height,
            time: chrono::Utc::now().timestamp_millis(),
            network_settings: settings.public_view(),
            wallet_address: self.address(),
            confirmed_deposits: stats::deposit_stats(&records, &confirmed),
            unconfirmed_deposits: stats::deposit_stats(&records, &seen),
            withdrawals: stats::withdrawal_stats(&withdrawals, &burns),
            confirmed_utxos: stats::utxo_stats(&confirmed_change, &confirmed_held),
            unconfirmed_utxos: stats::utxo_stats(&unconfirmed_change, &unconfirmed_held),
        })
    }

    // -----------------------------------------------------------------------
    // Federation endpoints
    // -----------------------------------------------------------------------

    /// Vote on the next federation. Signs only a proposal identical to the
    /// locally configured one.
    pub async fn trigger_reconfiguration(&self, envelope: &SignedEnvelope) -> BridgeResult<ReconfigurationResponse> {
        let settings = &self.settings;
        if !settings.support_reconfiguration {
            return Err(BridgeError::ReconfigurationUnsupported);
        }
        let proposal: ReconfigurationRequest = self
            .codec
            .verify(envelope, &settings.coordinator().wallet_address)
            .await?;

        let ours = settings.new_wallet_addresses();
        let mut response = ReconfigurationResponse {
            msg: String::new(),
            config_nonce: settings.configuration_nonce,
            new_authority_addresses: ours.clone(),
            new_authority_threshold: settings.new_authority_threshold,
            new_min_burn_amount: settings.new_min_burn_amount,
            signature: None,
        };
        let matches = proposal.addresses == ours
            && proposal.config_nonce == settings.configuration_nonce
            && proposal.new_authority_threshold == settings.new_authority_threshold
            && proposal.new_min_burn_amount == settings.new_min_burn_amount;
        if matches {
            let digest = configure_digest(
                settings.chain_id,
                settings.configuration_nonce,
                &ours,
                settings.new_authority_threshold,
                settings.new_min_burn_amount,
            );
            response.msg = CONSENSUS_PASS.to_string();
            response.signature = Some(sign_contract_call(self.codec.wallet(), &digest));
            info!(config_nonce = settings.configuration_nonce, "reconfiguration approved");
        } else {
            warn!(config_nonce = proposal.config_nonce, "reconfiguration proposal differs from local settings");
        }
        Ok(response)
    }

    pub async fn log(&self, envelope: &SignedEnvelope) -> BridgeResult<LogResponse> {
        self.verify_peer::<Empty>(envelope).await?;
        Ok(LogResponse {
            log: self.errors.entries(),
        })
    }

    pub async fn compute_pending_payouts(&self, envelope: &SignedEnvelope) -> BridgeResult<PendingPayouts> {
        let request: ComputePendingPayoutsRequest = self.verify_peer(envelope).await?;
        self.planner
            .compute_pending_payouts(request.process_deposits, request.process_withdrawals)
            .await
    }

    pub async fn compute_unspent(&self, envelope: &SignedEnvelope) -> BridgeResult<UnspentResponse> {
        self.verify_peer::<Empty>(envelope).await?;
        Ok(UnspentResponse {
            unspent: self.planner.compute_unspent().await?,
        })
    }

    pub async fn approve(&self, envelope: &SignedEnvelope, mode: ApprovalMode) -> BridgeResult<ApprovalResponse> {
        self.approvals.approve(envelope, mode).await
    }

    pub async fn dump_database(&self, envelope: &SignedEnvelope) -> BridgeResult<StateDump> {
        self.verify_peer::<Empty>(envelope).await?;
        Ok(self.planner.accounting().db().dump()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::settings::tests::sample_network;
    use crate::sim::{SimChain, SimContract, SimLedger};
    use crate::storage::WithdrawalStatus;
    use serde_json::json;

    const MINT: &str = "0x000000000000000000000000000000000000000a";
    const BURNER: &str = "0x0000000000000000000000000000000000000b0b";

    struct Single {
        chain: Arc<SimChain>,
        contract: Arc<SimContract>,
        service: AuthorityService,
        wallet: AuthorityWallet,
    }

    fn single() -> Single {
        let chain = SimChain::new(100);
        let contract = Arc::new(SimContract::new());
        let wallet = AuthorityWallet::from_seed(&[7; 32]);
        let mut network = sample_network(&[wallet.address()]);
        network.deposit_confirmations = 1;
        network.change_confirmations = 1;
        let service = AuthorityService::new(
            Arc::new(network),
            BridgeDB::open_temporary().unwrap(),
            wallet.clone(),
            Arc::new(SimLedger::new(chain.clone(), 0)),
            contract.clone(),
        );
        Single {
            chain,
            contract,
            service,
            wallet,
        }
    }

    impl Single {
        async fn register(&self) -> String {
            let generated = self
                .service
                .handle(Endpoint::GenerateDepositAddress, json!({ "mintAddress": MINT }))
                .await
                .unwrap();
            let registered = self
                .service
                .handle(
                    Endpoint::RegisterMintDepositAddress,
                    json!({
                        "mintAddress": MINT,
                        "generateDepositAddressResponses": [generated],
                    }),
                )
                .await
                .unwrap();
            registered.peek::<DepositAddressResponse>().unwrap().deposit_address
        }
    }

    #[tokio::test]
    async fn registration_and_mint_balance() {
        let a = single();
        let deposit_address = a.register().await;
        a.chain.deposit(&deposit_address, 10 * COIN);
        a.chain.mine(1);
        a.chain.deposit(&deposit_address, 2 * COIN);

        let balance = a
            .service
            .query_mint_balance(&MintAddressRequest {
                mint_address: MINT.into(),
            })
            .await
            .unwrap();
        assert_eq!(balance.deposit_address, deposit_address);
        assert_eq!(balance.deposited_amount, 990_000_000);
        assert_eq!(balance.unconfirmed_amount, 198_000_000);
        assert_eq!(balance.minted_amount, 0);
    }

    #[tokio::test]
    async fn mint_amount_subtracts_what_was_minted() {
        let a = single();
        let deposit_address = a.register().await;
        a.chain.deposit(&deposit_address, 10 * COIN);
        a.chain.mine(1);
        a.contract.mint(MINT, 400_000_000);

        let mint = a
            .service
            .create_mint_transaction(&MintAddressRequest {
                mint_address: MINT.into(),
            })
            .await
            .unwrap();
        assert_eq!(mint.mint_amount, 590_000_000);
        assert_eq!(mint.mint_nonce, 1);
        let digest = mint_digest(56, MINT, 1, &deposit_address, 590_000_000);
        assert!(crate::crypto::verify_contract_call(
            &a.wallet.address(),
            &digest,
            &mint.on_contract_verification
        ));
    }

    #[tokio::test]
    async fn unknown_mint_address_is_not_registered() {
        let a = single();
        let err = a
            .service
            .handle(Endpoint::QueryMintBalance, json!({ "mintAddress": MINT }))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::NotRegistered(MINT.into()));
        assert_eq!(a.service.error_log().entries()[0].path, "/queryMintBalance");
    }

    #[tokio::test]
    async fn withdrawal_submission_rules() {
        let a = single();
        let ok = a.contract.burn(BURNER, "gDest", 100 * COIN);
        let bad_destination = a.contract.burn(BURNER, "not-a-ledger-address", 100 * COIN);

        a.service
            .submit_withdrawal(&SubmitWithdrawalRequest {
                burn_address: BURNER.into(),
                burn_index: ok,
            })
            .await
            .unwrap();
        let again = a
            .service
            .handle(
                Endpoint::SubmitWithdrawal,
                json!({ "burnAddress": BURNER, "burnIndex": ok }),
            )
            .await
            .unwrap_err();
        assert!(matches!(again, BridgeError::DuplicateWithdrawal { .. }));

        let invalid = a
            .service
            .submit_withdrawal(&SubmitWithdrawalRequest {
                burn_address: BURNER.into(),
                burn_index: bad_destination,
            })
            .await
            .unwrap_err();
        assert!(matches!(invalid, BridgeError::InvalidInput(_)));

        let history = a
            .service
            .query_burn_history(&BurnHistoryRequest {
                burn_address: BURNER.into(),
            })
            .await
            .unwrap();
        assert_eq!(history.burn_history[0].status, Some(WithdrawalStatus::Submitted));
        assert_eq!(history.burn_history[1].status, None);
    }

    #[tokio::test]
    async fn federation_endpoints_need_an_authority_envelope() {
        let a = single();
        let outsider = EnvelopeCodec::new(
            Arc::new(SimLedger::new(a.chain.clone(), 0)),
            AuthorityWallet::from_seed(&[9; 32]),
            15,
        );
        let envelope = outsider.create(&Empty {}).await.unwrap();
        let err = a
            .service
            .handle(Endpoint::DumpDatabase, serde_json::to_value(&envelope).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::BadSignature);

        let plain = a.service.handle(Endpoint::ComputeUnspent, json!({})).await.unwrap_err();
        assert!(matches!(plain, BridgeError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn reconfiguration_is_refused_when_unsupported() {
        let a = single();
        let codec = EnvelopeCodec::new(
            Arc::new(SimLedger::new(a.chain.clone(), 0)),
            a.wallet.clone(),
            15,
        );
        let proposal = ReconfigurationRequest {
            addresses: vec![],
            config_nonce: 0,
            new_authority_threshold: 1,
            new_min_burn_amount: 10 * COIN,
        };
        let envelope = codec.create(&proposal).await.unwrap();
        assert_eq!(
            a.service.trigger_reconfiguration(&envelope).await.unwrap_err(),
            BridgeError::ReconfigurationUnsupported
        );
    }

    #[tokio::test]
    async fn terminate_notifies_after_answering() {
        let a = single();
        let codec = EnvelopeCodec::new(
            Arc::new(SimLedger::new(a.chain.clone(), 0)),
            a.wallet.clone(),
            15,
        );
        let signal = a.service.shutdown_signal();
        let envelope = codec.create(&Empty {}).await.unwrap();
        a.service
            .handle(Endpoint::Terminate, serde_json::to_value(&envelope).unwrap())
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stats_reflect_deposits_and_withdrawals() {
        let a = single();
        let deposit_address = a.register().await;
        a.chain.deposit(&deposit_address, 10 * COIN);
        a.chain.mine(1);
        let index = a.contract.burn(BURNER, "gDest", 100 * COIN);
        a.service
            .submit_withdrawal(&SubmitWithdrawalRequest {
                burn_address: BURNER.into(),
                burn_index: index,
            })
            .await
            .unwrap();

        let stats = a.service.stats().await.unwrap();
        assert_eq!(stats.wallet_address, a.wallet.address());
        assert_eq!(stats.confirmed_deposits.count, 1);
        assert_eq!(stats.confirmed_deposits.total_approvable_tax, 10_000_000);
        assert_eq!(stats.withdrawals.total_burned_amount, 100 * COIN);
        assert_eq!(stats.confirmed_utxos.total_deposits_balance, 10 * COIN);
        assert!(stats.network_settings.genix_rpc.password.is_empty());
        assert_eq!(a.service.stats_refreshes(), 1);
    }
}
