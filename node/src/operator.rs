//! # Operator Commands
//!
//! The coordinating side of the federation as a command-line tool. Each
//! command drives a [`Coordinator`] against every configured authority and
//! renders what each one answered:
//!
//! ```text
//! [http://authority-0:8443] -> {"depositAddress":"gM..."}
//! [http://authority-1:8443] -> error: authority http://authority-1:8443 unreachable: ...
//! ```
//!
//! Reports are built as strings so they can be checked without a terminal.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use wgenix_protocol::amount::{from_satoshi, to_satoshi};
use wgenix_protocol::config::OPERATOR_REQUEST_TIMEOUT;
use wgenix_protocol::consensus::{
    AuthorityReply, AuthorityTransport, Coordinator, PayoutExecution, Quorum, RoundReport,
};
use wgenix_protocol::crypto::AuthorityWallet;
use wgenix_protocol::envelope::EnvelopeCodec;
use wgenix_protocol::ledger::LedgerClient;
use wgenix_protocol::rpc::AuthorityStats;
use wgenix_protocol::settings::Settings;
use wgenix_protocol::storage::BridgeDB;
use wgenix_protocol::tax::{amount_after_tax, meets_tax, tax_amount};
use wgenix_protocol::BridgeResult;

use crate::genix::GenixRpcClient;
use crate::peer::HttpTransport;

/// Sections of `/stats` compared by `consensus`, in display order.
const STATS_SECTIONS: [&str; 6] = [
    "version",
    "confirmedDeposits",
    "unconfirmedDeposits",
    "withdrawals",
    "confirmedUtxos",
    "unconfirmedUtxos",
];

pub struct Operator {
    coordinator: Coordinator,
    database_path: PathBuf,
    contract_address: String,
    chain_id: u64,
}

impl Operator {
    /// Operator wired to the real ledger daemon and the authorities' HTTP
    /// endpoints.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let wallet = AuthorityWallet::from_hex(&settings.private.wallet_private_key)
            .context("invalid walletPrivateKey in private settings")?;
        let ledger: Arc<dyn LedgerClient> = Arc::new(
            GenixRpcClient::new(&settings.network.genix_rpc).context("cannot build ledger client")?,
        );
        let transport: Arc<dyn AuthorityTransport> = Arc::new(
            HttpTransport::new(OPERATOR_REQUEST_TIMEOUT).context("cannot build peer transport")?,
        );
        Ok(Self::new(settings, wallet, ledger, transport))
    }

    pub fn new(
        settings: &Settings,
        wallet: AuthorityWallet,
        ledger: Arc<dyn LedgerClient>,
        transport: Arc<dyn AuthorityTransport>,
    ) -> Self {
        let network = Arc::new(settings.network.clone());
        let codec = EnvelopeCodec::new(ledger.clone(), wallet, network.sync_delay_threshold);
        Self {
            coordinator: Coordinator::new(network.clone(), codec, ledger, transport),
            database_path: settings.database.database_path.clone(),
            contract_address: network.contract_address.clone(),
            chain_id: network.chain_id,
        }
    }

    pub async fn create_mint_deposit_address(&self, mint_address: &str) -> String {
        let report = self.coordinator.create_mint_deposit_address(mint_address).await;
        let mut out = String::new();
        section(&mut out, "generateDepositAddress");
        out.push_str(&render_replies(&report.generated));
        if !report.registered.is_empty() {
            section(&mut out, "registerMintDepositAddress");
            out.push_str(&render_replies(&report.registered));
        }
        match &report.deposit_address {
            Ok(address) => line(&mut out, format!("deposit address for {mint_address}: {address}")),
            Err(e) => line(&mut out, format!("no deposit address: {e}")),
        }
        out
    }

    pub async fn query_mint_balance(&self, mint_address: &str) -> String {
        render_replies(&self.coordinator.query_mint_balance(mint_address).await)
    }

    pub async fn create_mint_transaction(&self, mint_address: &str) -> String {
        render_replies(&self.coordinator.create_mint_transaction(mint_address).await)
    }

    pub async fn query_burn_history(&self, burn_address: &str) -> String {
        render_replies(&self.coordinator.query_burn_history(burn_address).await)
    }

    pub async fn submit_withdrawal(&self, burn_address: &str, burn_index: u64) -> String {
        render_replies(&self.coordinator.submit_withdrawal(burn_address, burn_index).await)
    }

    /// Instructions for burning `amount` GENIX towards `destination`.
    pub fn create_burn_transaction(&self, amount: &str, destination: &str) -> Result<String> {
        burn_instructions(amount, destination, &self.contract_address, self.chain_id)
    }

    pub async fn start_reconfiguration(&self) -> BridgeResult<String> {
        let report = self.coordinator.start_reconfiguration().await?;
        let mut out = String::new();
        line(
            &mut out,
            format!(
                "proposal: nonce {} threshold {} min burn {} addresses {}",
                report.proposal.config_nonce,
                report.proposal.new_authority_threshold,
                from_satoshi(report.proposal.new_min_burn_amount),
                report.proposal.addresses.join(",")
            ),
        );
        out.push_str(&render_replies(&report.replies));
        line(
            &mut out,
            format!(
                "approvals: {} of {} required, authorised: {}",
                report.approvals,
                self.coordinator.settings().authority_threshold,
                yes_no(report.authorised)
            ),
        );
        Ok(out)
    }

    pub async fn execute_payouts(&self, deposits: bool, withdrawals: bool, test_only: bool) -> BridgeResult<String> {
        let execution = self
            .coordinator
            .execute_payouts(deposits, withdrawals, test_only)
            .await?;
        Ok(render_execution(&execution, test_only))
    }

    pub async fn consensus(&self) -> String {
        render_consensus(&self.coordinator.stats().await)
    }

    pub async fn log(&self, index: usize) -> BridgeResult<String> {
        let log = self.coordinator.log(index).await?;
        let mut out = String::new();
        line(&mut out, format!("[{}] -> {} entries", self.coordinator.url(index), log.log.len()));
        for entry in &log.log {
            line(
                &mut out,
                format!(
                    "{} {} {}: {} request={}",
                    entry.timestamp.to_rfc3339(),
                    entry.path,
                    entry.kind,
                    entry.error,
                    entry.request
                ),
            );
        }
        Ok(out)
    }

    /// Overwrite the local store at the configured database path with
    /// authority `index`'s dump.
    pub async fn sync_database(&self, index: usize) -> Result<String> {
        let db = BridgeDB::open(&self.database_path)
            .with_context(|| format!("cannot open database at {}", self.database_path.display()))?;
        let dump = self.coordinator.sync_database(index, &db).await?;
        Ok(format!(
            "[{}] -> copied {} deposit addresses, {} used deposit addresses, {} withdrawals into {}\n",
            self.coordinator.url(index),
            dump.mint_deposit_addresses.len(),
            dump.used_deposit_addresses.len(),
            dump.withdrawals.len(),
            self.database_path.display()
        ))
    }

    pub async fn terminate(&self, index: Option<usize>) -> String {
        render_replies(&self.coordinator.terminate(index).await)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn line(out: &mut String, text: impl AsRef<str>) {
    out.push_str(text.as_ref());
    out.push('\n');
}

fn section(out: &mut String, title: &str) {
    line(out, format!("== {title} =="));
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// One `[url] -> ...` line per authority.
pub fn render_replies<T: Serialize>(replies: &[AuthorityReply<T>]) -> String {
    let mut out = String::new();
    for reply in replies {
        let text = match &reply.outcome {
            Ok(value) => serde_json::to_string(value).unwrap_or_else(|e| format!("<unprintable: {e}>")),
            Err(e) => format!("error: {e}"),
        };
        line(&mut out, format!("[{}] -> {}", reply.url, text));
    }
    out
}

fn render_quorum<T: Serialize>(out: &mut String, title: &str, quorum: &Quorum<T>) {
    section(out, title);
    out.push_str(&render_replies(&quorum.replies));
    match &quorum.agreed {
        Ok(agreed) => line(
            out,
            format!(
                "agreed: {}",
                serde_json::to_string(agreed).unwrap_or_else(|e| format!("<unprintable: {e}>"))
            ),
        ),
        Err(e) => line(out, format!("no agreement: {e}")),
    }
}

fn render_round(out: &mut String, title: &str, round: &RoundReport) {
    section(out, title);
    for hop in &round.hops {
        let text = match &hop.outcome {
            Ok(chain) => format!("signed ({} hex chars)", chain.len()),
            Err(e) => format!("error: {e}"),
        };
        line(out, format!("[{}] -> {}", hop.url, text));
    }
    line(out, format!("signatures: {}", round.signatures));
}

pub fn render_execution(execution: &PayoutExecution, test_only: bool) -> String {
    let mut out = String::new();
    if let Some(pending) = &execution.pending {
        render_quorum(&mut out, "computePendingPayouts", pending);
    }
    if let Some(unspent) = &execution.unspent {
        render_quorum(&mut out, "computeUnspent", unspent);
    }
    if let Some(round) = &execution.test_round {
        render_round(&mut out, "approvePayoutsTest", round);
    }
    if let Some(round) = &execution.real_round {
        render_round(&mut out, "approvePayouts", round);
    }
    match &execution.outcome {
        Ok(Some(txid)) => line(&mut out, format!("broadcast: {txid}")),
        Ok(None) if test_only && execution.test_round.is_some() => {
            line(&mut out, "test round passed; nothing signed for real")
        }
        Ok(None) => line(&mut out, "nothing to settle"),
        Err(e) => line(&mut out, format!("payouts failed: {e}")),
    }
    out
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".into(),
        other => other.to_string(),
    }
}

fn render_table(out: &mut String, header: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, c) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(c.len());
            }
        }
    }
    let render_row = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    line(out, render_row(header));
    line(
        out,
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"),
    );
    for row in rows {
        line(out, render_row(row));
    }
}

/// Per-section tables of every reachable authority's statistics, with a
/// final row marking each column YES when all of them agree.
pub fn render_consensus(replies: &[AuthorityReply<AuthorityStats>]) -> String {
    let mut out = String::new();
    let mut reachable: Vec<(String, Value)> = Vec::new();
    for reply in replies {
        match &reply.outcome {
            Ok(stats) => match serde_json::to_value(stats) {
                Ok(value) => reachable.push((reply.url.clone(), value)),
                Err(e) => line(&mut out, format!("[{}] -> error: {e}", reply.url)),
            },
            Err(e) => line(&mut out, format!("[{}] -> error: {e}", reply.url)),
        }
    }
    line(
        &mut out,
        format!("{} of {} authorities reachable", reachable.len(), replies.len()),
    );
    if reachable.is_empty() {
        return out;
    }

    section(&mut out, "chain");
    let header = vec!["authority".to_string(), "currentHeight".into(), "walletAddress".into()];
    let rows: Vec<Vec<String>> = reachable
        .iter()
        .map(|(url, v)| vec![url.clone(), cell(&v["currentHeight"]), cell(&v["walletAddress"])])
        .collect();
    render_table(&mut out, &header, &rows);

    for name in STATS_SECTIONS {
        let columns: Vec<String> = match reachable[0].1[name].as_object() {
            Some(object) => object.keys().cloned().collect(),
            None => continue,
        };
        section(&mut out, name);
        let mut header = vec!["authority".to_string()];
        header.extend(columns.iter().cloned());

        let mut rows: Vec<Vec<String>> = reachable
            .iter()
            .map(|(url, v)| {
                let mut row = vec![url.clone()];
                row.extend(columns.iter().map(|c| cell(&v[name][c])));
                row
            })
            .collect();
        let mut agreement = vec!["agreement".to_string()];
        agreement.extend(columns.iter().map(|c| {
            let first = &reachable[0].1[name][c];
            yes_no(reachable.iter().all(|(_, v)| &v[name][c] == first)).to_string()
        }));
        rows.push(agreement);
        render_table(&mut out, &header, &rows);
    }
    out
}

/// What a token holder must do to withdraw `amount` GENIX to `destination`.
pub fn burn_instructions(amount: &str, destination: &str, contract: &str, chain_id: u64) -> Result<String> {
    let satoshis = to_satoshi(amount).with_context(|| format!("invalid amount {amount:?}"))?;
    if !meets_tax(satoshis) {
        anyhow::bail!("{amount} GENIX is below the minimum withdrawal amount");
    }
    let net = amount_after_tax(satoshis)?;
    let tax = tax_amount(satoshis)?;

    let mut out = String::new();
    line(&mut out, format!("amount (satoshi): {satoshis}"));
    line(&mut out, format!("destination: {destination}"));
    line(
        &mut out,
        format!(
            "call burn({satoshis}, \"{destination}\") on contract {contract} (chain id {chain_id}) from the address holding the tokens"
        ),
    );
    line(
        &mut out,
        format!(
            "after settlement {destination} receives {} GENIX; {} GENIX is withheld as bridge tax",
            from_satoshi(net),
            from_satoshi(tax)
        ),
    );
    line(
        &mut out,
        "then run `wgenix-node submit-withdrawal <burn address> <burn index>` with the index the contract assigned",
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgenix_protocol::amount::COIN;
    use wgenix_protocol::authority::AuthorityService;
    use wgenix_protocol::settings::{
        AuthorityNode, DatabaseSettings, GenixRpcSettings, NetworkSettings, PrivateSettings,
    };
    use wgenix_protocol::sim::{SimChain, SimContract, SimLedger};
    use wgenix_protocol::BridgeError;

    use crate::api::{create_router, AppState};
    use crate::metrics::BridgeMetrics;

    const MINT: &str = "0x000000000000000000000000000000000000000a";

    fn reply<T>(index: usize, outcome: BridgeResult<T>) -> AuthorityReply<T> {
        AuthorityReply {
            index,
            url: format!("http://authority-{index}:8443"),
            outcome,
        }
    }

    #[test]
    fn replies_render_one_line_per_authority() {
        let replies = vec![
            reply(0, Ok(serde_json::json!({"depositAddress": "gM1"}))),
            reply(
                1,
                Err(BridgeError::Unreachable {
                    authority: "http://authority-1:8443".into(),
                    reason: "connection refused".into(),
                }),
            ),
        ];
        let out = render_replies(&replies);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], r#"[http://authority-0:8443] -> {"depositAddress":"gM1"}"#);
        assert!(lines[1].starts_with("[http://authority-1:8443] -> error: "));
        assert!(lines[1].contains("connection refused"));
    }

    #[test]
    fn burn_instructions_give_satoshis() {
        let out = burn_instructions("12.5", "gDest", "0xcc", 56).unwrap();
        assert!(out.contains("amount (satoshi): 1250000000"));
        assert!(out.contains("destination: gDest"));
        assert!(out.contains("burn(1250000000, \"gDest\")"));
        assert!(burn_instructions("0.5", "gDest", "0xcc", 56).is_err());
        assert!(burn_instructions("1.000000001", "gDest", "0xcc", 56).is_err());
    }

    // -----------------------------------------------------------------------
    // Against live routers
    // -----------------------------------------------------------------------

    struct LiveFederation {
        operator: Operator,
        _db_dir: tempfile::TempDir,
        database_path: PathBuf,
    }

    /// Two authorities served over real sockets, driven through the HTTP
    /// transport.
    async fn live_federation() -> LiveFederation {
        let chain = SimChain::new(100);
        let contract = Arc::new(SimContract::new());
        let wallets: Vec<AuthorityWallet> = (1..=2u8).map(|i| AuthorityWallet::from_seed(&[i; 32])).collect();

        let mut listeners = Vec::new();
        let mut nodes = Vec::new();
        for wallet in &wallets {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            nodes.push(AuthorityNode {
                hostname: format!("http://{}", listener.local_addr().unwrap()),
                wallet_address: wallet.address(),
                new_wallet_address: None,
            });
            listeners.push(listener);
        }
        let network = NetworkSettings {
            authority_nodes: nodes,
            authority_threshold: 2,
            payout_coordinator: 0,
            deposit_confirmations: 1,
            change_confirmations: 1,
            tax_payout_addresses: vec!["gTax".into()],
            change_address: "gChange".into(),
            configuration_nonce: 0,
            new_authority_threshold: 2,
            new_min_burn_amount: 10 * COIN,
            support_reconfiguration: false,
            chain_id: 56,
            contract_address: "0x00000000000000000000000000000000000000cc".into(),
            provider: "http://indexer.invalid".into(),
            genix_rpc: GenixRpcSettings {
                url: "http://genix.invalid".into(),
                username: String::new(),
                password: String::new(),
            },
            authority_port: 8443,
            sync_delay_threshold: 15,
        };
        let shared = Arc::new(network.clone());

        for (i, (wallet, listener)) in wallets.iter().zip(listeners).enumerate() {
            let service = Arc::new(AuthorityService::new(
                shared.clone(),
                BridgeDB::open_temporary().unwrap(),
                wallet.clone(),
                Arc::new(SimLedger::new(chain.clone(), i)),
                contract.clone(),
            ));
            let router = create_router(AppState {
                service,
                metrics: Arc::new(BridgeMetrics::new().unwrap()),
            });
            tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
        }

        let db_dir = tempfile::tempdir().unwrap();
        let database_path = db_dir.path().join("db");
        let settings = Settings {
            network_name: "test".into(),
            network,
            database: DatabaseSettings {
                database_path: database_path.clone(),
            },
            private: PrivateSettings {
                wallet_private_key: wallets[0].seed_hex(),
            },
        };
        let ledger: Arc<dyn LedgerClient> = Arc::new(SimLedger::new(chain, 0));
        let transport: Arc<dyn AuthorityTransport> =
            Arc::new(HttpTransport::new(std::time::Duration::from_secs(5)).unwrap());
        LiveFederation {
            operator: Operator::new(&settings, wallets[0].clone(), ledger, transport),
            _db_dir: db_dir,
            database_path,
        }
    }

    #[tokio::test]
    async fn registers_over_http_and_syncs_the_local_store() {
        let fed = live_federation().await;
        let out = fed.operator.create_mint_deposit_address(MINT).await;
        assert!(out.contains(&format!("deposit address for {MINT}: gM")), "{out}");

        let again = fed.operator.create_mint_deposit_address(MINT).await;
        assert!(again.contains("409"), "{again}");

        let out = fed.operator.sync_database(1).await.unwrap();
        assert!(out.contains("copied 1 deposit addresses"), "{out}");
        let db = BridgeDB::open(&fed.database_path).unwrap();
        assert_eq!(db.dump().unwrap().mint_deposit_addresses.len(), 1);
    }

    #[tokio::test]
    async fn consensus_tables_mark_agreement() {
        let fed = live_federation().await;
        let out = fed.operator.consensus().await;
        assert!(out.contains("2 of 2 authorities reachable"), "{out}");
        assert!(out.contains("== confirmedDeposits =="));
        let agreement = out
            .lines()
            .find(|l| l.starts_with("agreement"))
            .expect("agreement row");
        assert!(agreement.contains("YES"));
        assert!(!agreement.contains("NO"));
    }

    #[tokio::test]
    async fn empty_settlement_reports_nothing_to_settle() {
        let fed = live_federation().await;
        let out = fed.operator.execute_payouts(true, true, false).await.unwrap();
        assert!(out.contains("== computePendingPayouts =="), "{out}");
        assert!(out.ends_with("nothing to settle\n"), "{out}");
        assert!(fed.operator.execute_payouts(false, false, true).await.is_err());
    }
}
