//! Coordinating-side driver: fans requests out to every authority, reduces
//! their answers, and threads approval chains through the federation.
//!
//! Every reply is verified against the wallet address configured for the
//! authority that sent it. Authorities are contacted one at a time, in
//! configuration order. A failing authority is recorded in its
//! [`AuthorityReply`] and the round carries on without it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::consensus::aggregator::{intersect_payouts, intersect_unspent, require_quorum};
use crate::envelope::{EnvelopeCodec, SignedEnvelope};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{LedgerClient, UnspentOutput};
use crate::rpc::{
    AuthorityStats, BurnHistoryRequest, BurnHistoryResponse, ComputePendingPayoutsRequest,
    DepositAddressResponse, Empty, Endpoint, GenerateDepositAddressResponse, LogResponse,
    MintAddressRequest, MintBalanceResponse, MintTransactionResponse, PingResponse,
    ReconfigurationRequest, ReconfigurationResponse, RegisterMintDepositAddressRequest,
    SubmitWithdrawalRequest, UnspentResponse,
};
use crate::settings::NetworkSettings;
use crate::settlement::{ApprovalMode, ApprovalRequest, ApprovalResponse, PendingPayouts};
use crate::storage::{BridgeDB, StateDump};

/// Delivery of one request body to one authority.
#[async_trait]
pub trait AuthorityTransport: Send + Sync {
    /// POST `body` to `endpoint` at the authority whose base URL is `url`
    /// and return the decoded JSON reply. Fails with
    /// [`BridgeError::Unreachable`] when nothing came back and with
    /// [`BridgeError::Remote`] on an error status.
    async fn post(&self, url: &str, endpoint: Endpoint, body: Value) -> BridgeResult<Value>;
}

/// One authority's answer to a fan-out.
#[derive(Debug, Clone)]
pub struct AuthorityReply<T> {
    pub index: usize,
    pub url: String,
    pub outcome: BridgeResult<T>,
}

impl<T> AuthorityReply<T> {
    pub fn ok(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }
}

fn successes<T: Clone>(replies: &[AuthorityReply<T>]) -> Vec<T> {
    replies.iter().filter_map(|r| r.ok().cloned()).collect()
}

/// Per-authority views plus the reduction every responder agrees on.
#[derive(Debug, Clone)]
pub struct Quorum<T> {
    pub replies: Vec<AuthorityReply<T>>,
    pub agreed: BridgeResult<T>,
}

#[derive(Debug, Clone)]
pub struct DepositAddressReport {
    pub generated: Vec<AuthorityReply<GenerateDepositAddressResponse>>,
    pub registered: Vec<AuthorityReply<DepositAddressResponse>>,
    pub deposit_address: BridgeResult<String>,
}

#[derive(Debug, Clone)]
pub struct ReconfigurationReport {
    pub proposal: ReconfigurationRequest,
    pub replies: Vec<AuthorityReply<ReconfigurationResponse>>,
    pub approvals: usize,
    pub authorised: bool,
}

/// One pass of an approval chain through the federation.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub mode: ApprovalMode,
    pub hops: Vec<AuthorityReply<String>>,
    /// Authorities that approved. In test mode each one signed locally but
    /// the chain it passed on carries no signature.
    pub signatures: usize,
    pub approval_chain: BridgeResult<String>,
}

/// Everything `execute-payouts` did, in order. Steps after a failure are
/// `None`.
#[derive(Debug, Clone)]
pub struct PayoutExecution {
    pub pending: Option<Quorum<PendingPayouts>>,
    pub unspent: Option<Quorum<Vec<UnspentOutput>>>,
    pub test_round: Option<RoundReport>,
    pub real_round: Option<RoundReport>,
    /// Broadcast txid of a real run; `Ok(None)` for a test run or when
    /// there was nothing to settle.
    pub outcome: BridgeResult<Option<String>>,
}

pub struct Coordinator {
    settings: Arc<NetworkSettings>,
    codec: EnvelopeCodec,
    ledger: Arc<dyn LedgerClient>,
    transport: Arc<dyn AuthorityTransport>,
}

impl Coordinator {
    pub fn new(
        settings: Arc<NetworkSettings>,
        codec: EnvelopeCodec,
        ledger: Arc<dyn LedgerClient>,
        transport: Arc<dyn AuthorityTransport>,
    ) -> Self {
        Self {
            settings,
            codec,
            ledger,
            transport,
        }
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn url(&self, index: usize) -> String {
        self.settings
            .authority_nodes
            .get(index)
            .map(|n| n.url(self.settings.authority_port))
            .unwrap_or_default()
    }

    /// Send one request and verify the signed reply. Envelope endpoints get
    /// a freshly signed envelope around `body`.
    async fn request<Req, Resp>(
        &self,
        index: usize,
        endpoint: Endpoint,
        body: &Req,
    ) -> BridgeResult<(SignedEnvelope, Resp)>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let node = self.settings.authority_nodes.get(index).ok_or_else(|| {
            BridgeError::InvalidInput(format!("no authority with index {index}"))
        })?;
        let url = node.url(self.settings.authority_port);

        let payload = if endpoint.requires_envelope() {
            serde_json::to_value(self.codec.create(body).await?)?
        } else {
            serde_json::to_value(body)?
        };
        let reply = self.transport.post(&url, endpoint, payload).await?;
        let envelope: SignedEnvelope = serde_json::from_value(reply)
            .map_err(|e| BridgeError::InvalidPayload(format!("reply from {url}: {e}")))?;
        let decoded = self.codec.verify(&envelope, &node.wallet_address).await?;
        Ok((envelope, decoded))
    }

    async fn request_one<Req, Resp>(&self, index: usize, endpoint: Endpoint, body: &Req) -> AuthorityReply<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let outcome = self.request(index, endpoint, body).await.map(|(_, r)| r);
        let url = self.url(index);
        if let Err(e) = &outcome {
            warn!(authority = %url, endpoint = %endpoint, error = %e, "authority request failed");
        }
        AuthorityReply { index, url, outcome }
    }

    async fn fan_out<Req, Resp>(&self, endpoint: Endpoint, body: &Req) -> Vec<AuthorityReply<Resp>>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut replies = Vec::with_capacity(self.settings.authority_count());
        for index in 0..self.settings.authority_count() {
            replies.push(self.request_one(index, endpoint, body).await);
        }
        replies
    }

    pub async fn ping(&self) -> Vec<AuthorityReply<PingResponse>> {
        self.fan_out(Endpoint::Ping, &Empty {}).await
    }

    /// Collect one fresh individual address per authority, then have every
    /// authority derive and register the same multisig from them.
    pub async fn create_mint_deposit_address(&self, mint_address: &str) -> DepositAddressReport {
        let request = MintAddressRequest {
            mint_address: mint_address.to_string(),
        };

        let mut generated = Vec::new();
        let mut envelopes = Vec::new();
        for index in 0..self.settings.authority_count() {
            let outcome = self
                .request::<_, GenerateDepositAddressResponse>(index, Endpoint::GenerateDepositAddress, &request)
                .await
                .map(|(envelope, response)| {
                    envelopes.push(envelope);
                    response
                });
            generated.push(AuthorityReply {
                index,
                url: self.url(index),
                outcome,
            });
        }
        if envelopes.len() != self.settings.authority_count() {
            return DepositAddressReport {
                generated,
                registered: Vec::new(),
                deposit_address: Err(BridgeError::ConsensusFailed(
                    "not every authority produced an individual deposit address".into(),
                )),
            };
        }

        let registration = RegisterMintDepositAddressRequest {
            mint_address: mint_address.to_string(),
            generate_deposit_address_responses: envelopes,
        };
        let registered: Vec<AuthorityReply<DepositAddressResponse>> = self
            .fan_out(Endpoint::RegisterMintDepositAddress, &registration)
            .await;

        let addresses: Vec<String> = successes(&registered)
            .into_iter()
            .map(|r| r.deposit_address)
            .collect();
        let deposit_address = match addresses.first() {
            Some(first)
                if addresses.len() == registered.len() && addresses.iter().all(|a| a == first) =>
            {
                Ok(first.clone())
            }
            _ => Err(BridgeError::ConsensusFailed(
                "authorities disagree on the multisig deposit address".into(),
            )),
        };
        DepositAddressReport {
            generated,
            registered,
            deposit_address,
        }
    }

    pub async fn query_mint_balance(&self, mint_address: &str) -> Vec<AuthorityReply<MintBalanceResponse>> {
        let request = MintAddressRequest {
            mint_address: mint_address.to_string(),
        };
        self.fan_out(Endpoint::QueryMintBalance, &request).await
    }

    pub async fn create_mint_transaction(&self, mint_address: &str) -> Vec<AuthorityReply<MintTransactionResponse>> {
        let request = MintAddressRequest {
            mint_address: mint_address.to_string(),
        };
        self.fan_out(Endpoint::CreateMintTransaction, &request).await
    }

    pub async fn query_burn_history(&self, burn_address: &str) -> Vec<AuthorityReply<BurnHistoryResponse>> {
        let request = BurnHistoryRequest {
            burn_address: burn_address.to_string(),
        };
        self.fan_out(Endpoint::QueryBurnHistory, &request).await
    }

    pub async fn submit_withdrawal(&self, burn_address: &str, burn_index: u64) -> Vec<AuthorityReply<Empty>> {
        let request = SubmitWithdrawalRequest {
            burn_address: burn_address.to_string(),
            burn_index,
        };
        self.fan_out(Endpoint::SubmitWithdrawal, &request).await
    }

    /// Ask every authority to sign the configured next federation.
    pub async fn start_reconfiguration(&self) -> BridgeResult<ReconfigurationReport> {
        let settings = &self.settings;
        if !settings.support_reconfiguration {
            return Err(BridgeError::ReconfigurationUnsupported);
        }
        let proposal = ReconfigurationRequest {
            addresses: settings.new_wallet_addresses(),
            config_nonce: settings.configuration_nonce,
            new_authority_threshold: settings.new_authority_threshold,
            new_min_burn_amount: settings.new_min_burn_amount,
        };
        let replies: Vec<AuthorityReply<ReconfigurationResponse>> = self
            .fan_out(Endpoint::TriggerReconfigurationEvent, &proposal)
            .await;
        let approvals = successes(&replies)
            .iter()
            .filter(|r| {
                r.passed()
                    && r.new_authority_addresses == proposal.addresses
                    && r.new_authority_threshold == proposal.new_authority_threshold
                    && r.new_min_burn_amount == proposal.new_min_burn_amount
            })
            .count();
        let authorised = approvals >= settings.authority_threshold;
        info!(approvals, authorised, "reconfiguration vote collected");
        Ok(ReconfigurationReport {
            proposal,
            replies,
            approvals,
            authorised,
        })
    }

    pub async fn stats(&self) -> Vec<AuthorityReply<AuthorityStats>> {
        self.fan_out(Endpoint::Stats, &Empty {}).await
    }

    pub async fn log(&self, index: usize) -> BridgeResult<LogResponse> {
        Ok(self.request(index, Endpoint::Log, &Empty {}).await?.1)
    }

    pub async fn dump_database(&self, index: usize) -> BridgeResult<StateDump> {
        Ok(self.request(index, Endpoint::DumpDatabase, &Empty {}).await?.1)
    }

    /// Replace the local store with authority `index`'s state.
    pub async fn sync_database(&self, index: usize, db: &BridgeDB) -> BridgeResult<StateDump> {
        let dump = self.dump_database(index).await?;
        db.reset(&dump)?;
        db.flush()?;
        info!(
            authority = %self.url(index),
            deposit_addresses = dump.mint_deposit_addresses.len(),
            withdrawals = dump.withdrawals.len(),
            "database synchronised"
        );
        Ok(dump)
    }

    /// Signal one authority, or all of them, to shut down.
    pub async fn terminate(&self, index: Option<usize>) -> Vec<AuthorityReply<Empty>> {
        match index {
            Some(index) => vec![self.request_one(index, Endpoint::Terminate, &Empty {}).await],
            None => self.fan_out(Endpoint::Terminate, &Empty {}).await,
        }
    }

    pub async fn pending_payouts_quorum(
        &self,
        process_deposits: bool,
        process_withdrawals: bool,
    ) -> Quorum<PendingPayouts> {
        let request = ComputePendingPayoutsRequest {
            process_deposits,
            process_withdrawals,
        };
        let replies: Vec<AuthorityReply<PendingPayouts>> =
            self.fan_out(Endpoint::ComputePendingPayouts, &request).await;
        let views = successes(&replies);
        let agreed = require_quorum("pending payouts", views.len(), self.settings.authority_threshold)
            .map(|_| intersect_payouts(&views).restrict(process_deposits, process_withdrawals));
        Quorum { replies, agreed }
    }

    pub async fn unspent_quorum(&self) -> Quorum<Vec<UnspentOutput>> {
        let replies: Vec<AuthorityReply<Vec<UnspentOutput>>> = self
            .fan_out::<_, UnspentResponse>(Endpoint::ComputeUnspent, &Empty {})
            .await
            .into_iter()
            .map(|r| AuthorityReply {
                index: r.index,
                url: r.url,
                outcome: r.outcome.map(|u| u.unspent),
            })
            .collect();
        let views = successes(&replies);
        let agreed = require_quorum("unspent", views.len(), self.settings.authority_threshold)
            .map(|_| intersect_unspent(&views));
        Quorum { replies, agreed }
    }

    /// Thread an approval chain through every authority in order. An
    /// authority that fails is skipped and the chain passes on unchanged.
    pub async fn approval_round(
        &self,
        payouts: &PendingPayouts,
        unspent: &[UnspentOutput],
        mode: ApprovalMode,
    ) -> RoundReport {
        let endpoint = match mode {
            ApprovalMode::Test => Endpoint::ApprovePayoutsTest,
            ApprovalMode::Real => Endpoint::ApprovePayouts,
        };

        let mut chain: Option<String> = None;
        let mut hops = Vec::with_capacity(self.settings.authority_count());
        let mut signatures = 0;
        for index in 0..self.settings.authority_count() {
            let request = ApprovalRequest {
                payouts: payouts.clone(),
                unspent: unspent.to_vec(),
                approval_chain: chain.clone(),
            };
            let reply: AuthorityReply<ApprovalResponse> = self.request_one(index, endpoint, &request).await;
            let outcome = reply.outcome.map(|r| r.approval_chain);
            if let Ok(next) = &outcome {
                chain = Some(next.clone());
                signatures += 1;
            }
            hops.push(AuthorityReply {
                index,
                url: reply.url,
                outcome,
            });
        }

        let threshold = self.settings.authority_threshold;
        let approval_chain = match chain {
            Some(chain) if signatures >= threshold => Ok(chain),
            _ => Err(BridgeError::ConsensusFailed(format!(
                "{signatures} of {threshold} required signatures collected"
            ))),
        };
        info!(mode = ?mode, signatures, threshold, "approval round finished");
        RoundReport {
            mode,
            hops,
            signatures,
            approval_chain,
        }
    }

    /// Agree on payouts and inputs, rehearse the round in test mode, then
    /// (unless `test_only`) run it for real and broadcast the result.
    pub async fn execute_payouts(
        &self,
        process_deposits: bool,
        process_withdrawals: bool,
        test_only: bool,
    ) -> BridgeResult<PayoutExecution> {
        if !process_deposits && !process_withdrawals {
            return Err(BridgeError::InvalidInput(
                "at least one of deposits or withdrawals must be processed".into(),
            ));
        }
        let mut report = PayoutExecution {
            pending: None,
            unspent: None,
            test_round: None,
            real_round: None,
            outcome: Ok(None),
        };
        report.outcome = self
            .run_payouts(process_deposits, process_withdrawals, test_only, &mut report)
            .await;
        Ok(report)
    }

    async fn run_payouts(
        &self,
        process_deposits: bool,
        process_withdrawals: bool,
        test_only: bool,
        report: &mut PayoutExecution,
    ) -> BridgeResult<Option<String>> {
        let pending = self
            .pending_payouts_quorum(process_deposits, process_withdrawals)
            .await;
        let payouts = pending.agreed.clone();
        report.pending = Some(pending);
        let payouts = payouts?;
        if payouts.is_empty() {
            info!("no payouts agreed by every responding authority");
            return Ok(None);
        }

        let unspent = self.unspent_quorum().await;
        let inputs = unspent.agreed.clone();
        report.unspent = Some(unspent);
        let inputs = inputs?;

        let rehearsal = self.approval_round(&payouts, &inputs, ApprovalMode::Test).await;
        let rehearsed = rehearsal.approval_chain.clone();
        report.test_round = Some(rehearsal);
        rehearsed?;
        if test_only {
            return Ok(None);
        }

        let round = self.approval_round(&payouts, &inputs, ApprovalMode::Real).await;
        let signed = round.approval_chain.clone();
        report.real_round = Some(round);
        let txid = self.ledger.send_raw_transaction(&signed?).await?;
        info!(txid = %txid, "settlement transaction broadcast");
        Ok(Some(txid))
    }
}
