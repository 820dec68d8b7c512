//! Federation-level integration tests.
//!
//! Four authorities, each with its own temporary store and its own view of
//! one simulated ledger, wired together through the in-process transport.
//! The coordinator drives them exactly as the operator CLI does.

use std::sync::Arc;

use wgenix_protocol::amount::COIN;
use wgenix_protocol::authority::AuthorityService;
use wgenix_protocol::consensus::Coordinator;
use wgenix_protocol::crypto::{configure_digest, verify_contract_call, AuthorityWallet};
use wgenix_protocol::envelope::EnvelopeCodec;
use wgenix_protocol::ledger::{LedgerClient, Vouts};
use wgenix_protocol::settings::{AuthorityNode, GenixRpcSettings, NetworkSettings};
use wgenix_protocol::settlement::{ApprovalMode, ApprovalRequest};
use wgenix_protocol::sim::{SimChain, SimContract, SimLedger, SimTransport};
use wgenix_protocol::storage::{BridgeDB, WithdrawalStatus};
use wgenix_protocol::BridgeError;

const MINT: &str = "0x000000000000000000000000000000000000000a";
const BURNER: &str = "0x0000000000000000000000000000000000000b0b";
const N: usize = 4;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Federation {
    chain: Arc<SimChain>,
    contract: Arc<SimContract>,
    transport: Arc<SimTransport>,
    services: Vec<Arc<AuthorityService>>,
    wallets: Vec<AuthorityWallet>,
    coordinator: Coordinator,
}

fn url(i: usize) -> String {
    format!("http://authority-{i}")
}

fn network(wallets: &[AuthorityWallet], new_wallets: &[AuthorityWallet]) -> NetworkSettings {
    NetworkSettings {
        authority_nodes: wallets
            .iter()
            .enumerate()
            .map(|(i, w)| AuthorityNode {
                hostname: url(i),
                wallet_address: w.address(),
                new_wallet_address: new_wallets.get(i).map(|n| n.address()),
            })
            .collect(),
        authority_threshold: 3,
        payout_coordinator: 0,
        deposit_confirmations: 1,
        change_confirmations: 1,
        tax_payout_addresses: vec!["gTaxA".into(), "gTaxB".into()],
        change_address: "gChange".into(),
        configuration_nonce: 7,
        new_authority_threshold: 3,
        new_min_burn_amount: 10 * COIN,
        support_reconfiguration: !new_wallets.is_empty(),
        chain_id: 56,
        contract_address: "0x00000000000000000000000000000000000000cc".into(),
        provider: "http://indexer.invalid".into(),
        genix_rpc: GenixRpcSettings {
            url: "http://genix.invalid".into(),
            username: "rpc".into(),
            password: "secret".into(),
        },
        authority_port: 8443,
        sync_delay_threshold: 15,
    }
}

fn federation_with(reconfigurable: bool) -> Federation {
    let chain = SimChain::new(100);
    let contract = Arc::new(SimContract::new());
    let wallets: Vec<AuthorityWallet> =
        (1..=N as u8).map(|i| AuthorityWallet::from_seed(&[i; 32])).collect();
    let new_wallets: Vec<AuthorityWallet> = if reconfigurable {
        (1..=N as u8).map(|i| AuthorityWallet::from_seed(&[100 + i; 32])).collect()
    } else {
        Vec::new()
    };
    let settings = Arc::new(network(&wallets, &new_wallets));
    settings.validate("test").expect("valid settings");

    let transport = Arc::new(SimTransport::new());
    let mut services = Vec::new();
    for (i, wallet) in wallets.iter().enumerate() {
        let service = Arc::new(AuthorityService::new(
            settings.clone(),
            BridgeDB::open_temporary().expect("temp db"),
            wallet.clone(),
            Arc::new(SimLedger::new(chain.clone(), i)),
            contract.clone(),
        ));
        transport.register(url(i), service.clone());
        services.push(service);
    }

    let operator_ledger: Arc<dyn LedgerClient> = Arc::new(SimLedger::new(chain.clone(), 0));
    let coordinator = Coordinator::new(
        settings,
        EnvelopeCodec::new(operator_ledger.clone(), wallets[0].clone(), 15),
        operator_ledger,
        transport.clone(),
    );
    Federation {
        chain,
        contract,
        transport,
        services,
        wallets,
        coordinator,
    }
}

fn federation() -> Federation {
    federation_with(false)
}

impl Federation {
    async fn deposit_address(&self) -> String {
        let report = self.coordinator.create_mint_deposit_address(MINT).await;
        report.deposit_address.expect("deposit address")
    }

    /// Register a deposit address, fund it with `gross`, and confirm it.
    async fn funded(&self, gross: u128) -> String {
        let address = self.deposit_address().await;
        self.chain.deposit(&address, gross);
        self.chain.mine(1);
        address
    }

    async fn burn_and_submit(&self, amount: u128) -> u64 {
        let index = self.contract.burn(BURNER, "gDest", amount);
        for reply in self.coordinator.submit_withdrawal(BURNER, index).await {
            reply.outcome.expect("withdrawal accepted");
        }
        index
    }
}

// ---------------------------------------------------------------------------
// Deposit addresses and mints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_authority_binds_the_same_multisig() {
    let fed = federation();
    let report = fed.coordinator.create_mint_deposit_address(MINT).await;
    let address = report.deposit_address.clone().unwrap();
    assert!(address.starts_with("gM"));
    assert_eq!(report.generated.len(), N);
    for service in &fed.services {
        assert_eq!(
            service.planner().accounting().deposit_address(MINT).unwrap(),
            Some(address.clone())
        );
    }

    let again = fed.coordinator.create_mint_deposit_address(MINT).await;
    assert!(again.deposit_address.is_err());
    assert!(again
        .registered
        .iter()
        .all(|r| matches!(r.outcome, Err(BridgeError::Remote { status: 409, .. }))));
}

#[tokio::test]
async fn registration_needs_every_authority() {
    let fed = federation();
    fed.transport.set_down(&url(2), true);
    let report = fed.coordinator.create_mint_deposit_address(MINT).await;
    assert!(matches!(report.deposit_address, Err(BridgeError::ConsensusFailed(_))));
    assert!(report.registered.is_empty());
    assert!(matches!(
        report.generated[2].outcome,
        Err(BridgeError::Unreachable { .. })
    ));
}

#[tokio::test]
async fn one_billion_deposit_is_taxed_one_percent() {
    let fed = federation();
    let address = fed.funded(1_000_000_000).await;

    for reply in fed.coordinator.query_mint_balance(MINT).await {
        let balance = reply.outcome.unwrap();
        assert_eq!(balance.deposit_address, address);
        assert_eq!(balance.deposited_amount, 990_000_000);
    }

    let pending = fed.coordinator.pending_payouts_quorum(true, false).await;
    let payouts = pending.agreed.unwrap();
    assert_eq!(payouts.deposit_tax_payouts.len(), 1);
    assert_eq!(payouts.deposit_tax_payouts[0].amount, 10_000_000);

    for reply in fed.coordinator.create_mint_transaction(MINT).await {
        assert_eq!(reply.outcome.unwrap().mint_amount, 990_000_000);
    }
}

// ---------------------------------------------------------------------------
// Withdrawals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_withdrawal_is_a_conflict_everywhere() {
    let fed = federation();
    let index = fed.burn_and_submit(100 * COIN).await;
    for reply in fed.coordinator.submit_withdrawal(BURNER, index).await {
        assert!(matches!(
            reply.outcome,
            Err(BridgeError::Remote { status: 409, .. })
        ));
    }
    for reply in fed.coordinator.query_burn_history(BURNER).await {
        let history = reply.outcome.unwrap().burn_history;
        assert_eq!(history[0].status, Some(WithdrawalStatus::Submitted));
    }
}

#[tokio::test]
async fn divergent_authority_excludes_the_withdrawal() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    let index = fed.contract.burn(BURNER, "gDest", 100 * COIN);
    fed.transport.set_down(&url(3), true);
    fed.coordinator.submit_withdrawal(BURNER, index).await;
    fed.transport.set_down(&url(3), false);

    let pending = fed.coordinator.pending_payouts_quorum(true, true).await;
    let per_authority = pending.replies[0].ok().unwrap();
    assert_eq!(per_authority.withdrawal_payouts.len(), 1);
    let agreed = pending.agreed.unwrap();
    assert_eq!(agreed.deposit_tax_payouts.len(), 1);
    assert!(agreed.withdrawal_payouts.is_empty());
    assert!(agreed.withdrawal_tax_payouts.is_empty());
}

// ---------------------------------------------------------------------------
// Settlement rounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_payouts_settles_and_broadcasts() {
    let fed = federation();
    let address = fed.funded(500 * COIN).await;
    let index = fed.burn_and_submit(100 * COIN).await;

    let report = fed.coordinator.execute_payouts(true, true, false).await.unwrap();
    let txid = report.outcome.unwrap().expect("broadcast txid");
    assert!(!txid.is_empty());
    assert_eq!(report.test_round.as_ref().unwrap().signatures, N);
    assert_eq!(report.real_round.as_ref().unwrap().signatures, N);
    assert_eq!(fed.chain.broadcasts().len(), 1);

    fed.chain.mine(1);
    assert_eq!(fed.chain.total_received("gDest"), 99 * COIN);
    assert_eq!(fed.chain.total_received("gTaxA"), 2 * COIN);
    assert_eq!(fed.chain.total_received("gTaxB"), 2 * COIN);
    assert_eq!(fed.chain.total_received("gChange"), 395 * COIN);

    for service in &fed.services {
        let accounting = service.planner().accounting();
        let record = accounting.deposit_record(MINT).unwrap().unwrap();
        assert_eq!(record.deposit_address, address);
        assert_eq!(record.approved_tax, 5 * COIN);
        let withdrawal = accounting.withdrawal(BURNER, index).unwrap().unwrap();
        assert_eq!(withdrawal.approved_amount, 99 * COIN);
        assert_eq!(withdrawal.approved_tax, COIN);
    }

    let next = fed.coordinator.execute_payouts(true, true, false).await.unwrap();
    assert_eq!(next.outcome, Ok(None));
    assert!(next.pending.unwrap().agreed.unwrap().is_empty());
    assert_eq!(fed.chain.broadcasts().len(), 1);
}

#[tokio::test]
async fn test_only_execution_changes_nothing() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    let before = fed.services[1].planner().accounting().db().dump().unwrap();

    let report = fed.coordinator.execute_payouts(true, false, true).await.unwrap();
    assert_eq!(report.outcome, Ok(None));
    assert!(report.test_round.unwrap().approval_chain.is_ok());
    assert!(report.real_round.is_none());
    assert!(fed.chain.broadcasts().is_empty());
    assert_eq!(fed.services[1].planner().accounting().db().dump().unwrap(), before);
}

#[tokio::test]
async fn rehearsal_chain_cannot_be_broadcast() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    fed.burn_and_submit(100 * COIN).await;

    let report = fed.coordinator.execute_payouts(true, true, true).await.unwrap();
    let rehearsal = report.test_round.unwrap();
    assert_eq!(rehearsal.signatures, N);
    let chain = rehearsal.approval_chain.unwrap();

    let ledger = SimLedger::new(fed.chain.clone(), 0);
    assert!(matches!(
        ledger.send_raw_transaction(&chain).await,
        Err(BridgeError::Ledger(_))
    ));
    assert!(fed.chain.broadcasts().is_empty());
    fed.chain.mine(1);
    assert_eq!(fed.chain.total_received("gDest"), 0);

    let pending = fed.coordinator.pending_payouts_quorum(true, true).await;
    let agreed = pending.agreed.unwrap();
    assert_eq!(agreed.withdrawal_payouts.len(), 1);
    assert_eq!(agreed.deposit_tax_payouts.len(), 1);
}

#[tokio::test]
async fn threshold_of_signatures_survives_one_down_authority() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    fed.transport.set_down(&url(2), true);

    let report = fed.coordinator.execute_payouts(true, false, false).await.unwrap();
    assert!(report.outcome.unwrap().is_some());
    let real = report.real_round.unwrap();
    assert_eq!(real.signatures, 3);
    assert!(matches!(real.hops[2].outcome, Err(BridgeError::Unreachable { .. })));
}

#[tokio::test]
async fn too_few_responders_is_a_consensus_failure() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    fed.transport.set_down(&url(1), true);
    fed.transport.set_down(&url(2), true);

    let report = fed.coordinator.execute_payouts(true, true, false).await.unwrap();
    assert!(matches!(report.outcome, Err(BridgeError::ConsensusFailed(_))));
    assert!(report.unspent.is_none());

    assert!(matches!(
        fed.coordinator.execute_payouts(false, false, true).await,
        Err(BridgeError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn tampered_chain_is_refused_by_the_next_hop() {
    let fed = federation();
    fed.funded(500 * COIN).await;
    let payouts = fed.coordinator.pending_payouts_quorum(true, false).await.agreed.unwrap();
    let unspent = fed.coordinator.unspent_quorum().await.agreed.unwrap();

    let ledger = SimLedger::new(fed.chain.clone(), 0);
    let mut diverted = Vouts::new();
    diverted.insert("gThief".into(), 499 * COIN);
    let tampered = ledger.create_raw_transaction(&unspent, &diverted).await.unwrap();

    let codec = EnvelopeCodec::new(Arc::new(ledger), fed.wallets[0].clone(), 15);
    let envelope = codec
        .create(&ApprovalRequest {
            payouts,
            unspent,
            approval_chain: Some(tampered),
        })
        .await
        .unwrap();
    let err = fed.services[1]
        .approve(&envelope, ApprovalMode::Real)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ChainTampered(_)));
    assert_eq!(
        fed.services[1]
            .planner()
            .accounting()
            .deposit_record(MINT)
            .unwrap()
            .unwrap()
            .approved_tax,
        0
    );
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconfiguration_is_authorised_by_matching_votes() {
    let fed = federation_with(true);
    let report = fed.coordinator.start_reconfiguration().await.unwrap();
    assert_eq!(report.approvals, N);
    assert!(report.authorised);

    let digest = configure_digest(
        56,
        7,
        &report.proposal.addresses,
        report.proposal.new_authority_threshold,
        report.proposal.new_min_burn_amount,
    );
    for (reply, wallet) in report.replies.iter().zip(&fed.wallets) {
        let vote = reply.ok().unwrap();
        let signature = vote.signature.as_ref().unwrap();
        assert!(verify_contract_call(&wallet.address(), &digest, signature));
    }

    assert_eq!(
        federation().coordinator.start_reconfiguration().await.unwrap_err(),
        BridgeError::ReconfigurationUnsupported
    );
}

#[tokio::test]
async fn failures_show_up_in_the_error_log() {
    let fed = federation();
    fed.coordinator.query_mint_balance(MINT).await;
    let log = fed.coordinator.log(1).await.unwrap();
    assert_eq!(log.log.len(), 1);
    assert_eq!(log.log[0].path, "/queryMintBalance");
    assert_eq!(log.log[0].kind, "NotRegistered");
}

#[tokio::test]
async fn sync_database_copies_a_peer_store() {
    let fed = federation();
    fed.funded(10 * COIN).await;
    fed.burn_and_submit(100 * COIN).await;

    let local = BridgeDB::open_temporary().unwrap();
    let dump = fed.coordinator.sync_database(2, &local).await.unwrap();
    assert_eq!(dump.mint_deposit_addresses.len(), 1);
    assert_eq!(local.dump().unwrap(), dump);
    assert_eq!(local.withdrawal_count(), 1);
}

#[tokio::test]
async fn stats_agree_across_authorities() {
    let fed = federation();
    fed.funded(10 * COIN).await;
    let stats: Vec<_> = fed
        .coordinator
        .stats()
        .await
        .into_iter()
        .map(|r| r.outcome.unwrap())
        .collect();
    assert!(stats
        .iter()
        .all(|s| s.confirmed_deposits == stats[0].confirmed_deposits));
    assert_eq!(stats[0].confirmed_deposits.total_deposited_amount, 10 * COIN);
    assert_ne!(stats[0].wallet_address, stats[1].wallet_address);
}

#[tokio::test]
async fn terminate_signals_the_target_only() {
    let fed = federation();
    let signal = fed.services[3].shutdown_signal();
    let replies = fed.coordinator.terminate(Some(3)).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].outcome.is_ok());
    tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
        .await
        .unwrap();
}
