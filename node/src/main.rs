// Copyright (c) 2026 wGenix Authorities. MIT License.
// See LICENSE for details.

//! # wGenix Authority Node
//!
//! Entry point for the `wgenix-node` binary. `run` serves one authority's
//! RPC surface and metrics; `init` writes a settings folder; `version`
//! prints build information; every other subcommand acts as the
//! federation's operator and prints what each authority answered.

mod api;
mod cli;
mod genix;
mod indexer;
mod jsonrpc;
mod logging;
mod metrics;
mod operator;
mod peer;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use wgenix_protocol::amount::COIN;
use wgenix_protocol::authority::AuthorityService;
use wgenix_protocol::config::{DEFAULT_AUTHORITY_PORT, HEIGHT_POLL_INTERVAL, PROTOCOL_VERSION, SYNC_DELAY_THRESHOLD};
use wgenix_protocol::crypto::{same_address, AuthorityWallet};
use wgenix_protocol::ledger::LedgerClient;
use wgenix_protocol::settings::{
    AuthorityNode, DatabaseSettings, GenixRpcSettings, NetworkSettings, PrivateSettings, Settings,
    NETWORKS_FILE, PRIVATE_FILE,
};
use wgenix_protocol::storage::BridgeDB;

use cli::{Commands, GlobalArgs, WgenixNodeCli};
use logging::LogFormat;
use metrics::BridgeMetrics;
use operator::Operator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WgenixNodeCli::parse();
    let global = cli.global;
    let format = LogFormat::from_str_lossy(&global.log_format);

    match cli.command {
        Commands::Run(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, format);
            run_node(&global, args).await
        }
        Commands::Init(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, format);
            init_node(&global, args)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
        command => {
            logging::init_logging(logging::OPERATOR_FILTER, format);
            run_operator(&global, command).await
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_node(global: &GlobalArgs, args: cli::RunArgs) -> Result<()> {
    let settings = load_settings(global)?;
    let network = Arc::new(settings.network.clone());
    let wallet = AuthorityWallet::from_hex(&settings.private.wallet_private_key)
        .context("invalid walletPrivateKey in private settings")?;
    let index = network
        .authority_nodes
        .iter()
        .position(|n| same_address(&n.wallet_address, &wallet.address()))
        .with_context(|| {
            format!(
                "wallet {} is not an authority of network {}",
                wallet.address(),
                settings.network_name
            )
        })?;

    tracing::info!(
        network = %settings.network_name,
        authority = index,
        wallet = %wallet.address(),
        port = network.authority_port,
        metrics_port = args.metrics_port,
        "starting wgenix-node"
    );

    // --- Persistent storage ---
    let db_path = &settings.database.database_path;
    let db = BridgeDB::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Backends ---
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        genix::GenixRpcClient::new(&network.genix_rpc).context("cannot build ledger client")?,
    );
    let contract = Arc::new(
        indexer::ContractIndexerClient::new(&network).context("cannot build contract client")?,
    );
    match ledger.client_version().await {
        Ok(version) => tracing::info!(genix = %version, "ledger daemon reachable"),
        Err(e) => tracing::warn!(error = %e, "ledger daemon not reachable yet"),
    }

    let service = Arc::new(AuthorityService::new(
        network.clone(),
        db,
        wallet,
        ledger.clone(),
        contract,
    ));
    let metrics = Arc::new(BridgeMetrics::new().context("cannot register metrics")?);

    // --- Listeners ---
    let api_router = api::create_router(api::AppState {
        service: service.clone(),
        metrics: metrics.clone(),
    });
    let api_addr = format!("{}:{}", args.bind, network.authority_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {api_addr}"))?;
    tracing::info!("authority RPC listening on {}", api_addr);

    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics listening on {}", metrics_addr);
    let metrics_server = tokio::spawn({
        let router = metrics::metrics_router(metrics.clone());
        async move {
            if let Err(e) = axum::serve(metrics_listener, router).await {
                tracing::error!(error = %e, "metrics server error");
            }
        }
    });

    // --- Ledger height sampler ---
    let height_poller = tokio::spawn({
        let ledger = ledger.clone();
        let metrics = metrics.clone();
        async move {
            let mut interval = tokio::time::interval(HEIGHT_POLL_INTERVAL);
            loop {
                interval.tick().await;
                match ledger.block_count().await {
                    Ok(height) => metrics
                        .ledger_height
                        .set(i64::try_from(height).unwrap_or(i64::MAX)),
                    Err(e) => tracing::warn!(error = %e, "cannot sample ledger height"),
                }
            }
        }
    });

    // --- Serve until a signal or a verified /terminate ---
    let terminate = service.shutdown_signal();
    let served = axum::serve(api_listener, api_router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => tracing::info!("shutdown signal received, draining connections"),
                _ = terminate.notified() => tracing::warn!("terminate requested by a federation peer"),
            }
        })
        .await;

    height_poller.abort();
    metrics_server.abort();
    served.context("authority RPC server failed")?;
    tracing::info!("wgenix-node stopped");
    Ok(())
}

fn load_settings(global: &GlobalArgs) -> Result<Settings> {
    Settings::load(&global.settings, &global.network).with_context(|| {
        format!(
            "cannot load network {:?} from settings folder {}",
            global.network,
            global.settings.display()
        )
    })
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Single-authority template around a freshly generated wallet. Operators
/// merge the authority lists of every member afterwards.
fn template_network(wallet: &AuthorityWallet, args: &cli::InitArgs) -> NetworkSettings {
    NetworkSettings {
        authority_nodes: vec![AuthorityNode {
            hostname: "127.0.0.1".into(),
            wallet_address: wallet.address(),
            new_wallet_address: None,
        }],
        authority_threshold: 1,
        payout_coordinator: 0,
        deposit_confirmations: 6,
        change_confirmations: 6,
        tax_payout_addresses: vec!["<ledger address receiving bridge tax>".into()],
        change_address: "<ledger address receiving change>".into(),
        configuration_nonce: 0,
        new_authority_threshold: 1,
        new_min_burn_amount: 10 * COIN,
        support_reconfiguration: false,
        chain_id: 56,
        contract_address: "0x0000000000000000000000000000000000000000".into(),
        provider: args.provider.clone(),
        genix_rpc: GenixRpcSettings {
            url: args.genix_rpc_url.clone(),
            username: String::new(),
            password: String::new(),
        },
        authority_port: DEFAULT_AUTHORITY_PORT,
        sync_delay_threshold: SYNC_DELAY_THRESHOLD,
    }
}

fn init_node(global: &GlobalArgs, args: cli::InitArgs) -> Result<()> {
    let folder = &global.settings;
    if folder.join(NETWORKS_FILE).exists() && !args.force {
        anyhow::bail!(
            "{} already holds settings; pass --force to overwrite",
            folder.display()
        );
    }
    tracing::info!(folder = %folder.display(), network = %global.network, "initializing settings");

    let wallet = AuthorityWallet::generate();
    Settings::write(
        folder,
        &global.network,
        &template_network(&wallet, &args),
        &DatabaseSettings {
            database_path: "db".into(),
        },
        &PrivateSettings {
            wallet_private_key: wallet.seed_hex(),
        },
    )
    .with_context(|| format!("failed to write settings to {}", folder.display()))?;
    restrict_permissions(&folder.join(PRIVATE_FILE))?;

    println!("Settings initialized.");
    println!("  Folder         : {}", folder.display());
    println!("  Network        : {}", global.network);
    println!("  Wallet address : {}", wallet.address());
    println!("  Private key    : {}", folder.join(PRIVATE_FILE).display());
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// ---------------------------------------------------------------------------
// operator
// ---------------------------------------------------------------------------

async fn run_operator(global: &GlobalArgs, command: Commands) -> Result<()> {
    let settings = load_settings(global)?;
    let operator = Operator::connect(&settings)?;

    let report = match command {
        Commands::CreateMintDepositAddress(args) => {
            operator.create_mint_deposit_address(&args.mint_address).await
        }
        Commands::QueryMintBalance(args) => operator.query_mint_balance(&args.mint_address).await,
        Commands::CreateMintTransaction(args) => {
            operator.create_mint_transaction(&args.mint_address).await
        }
        Commands::QueryBurnHistory(args) => operator.query_burn_history(&args.burn_address).await,
        Commands::CreateBurnTransaction(args) => {
            operator.create_burn_transaction(&args.amount, &args.destination)?
        }
        Commands::SubmitWithdrawal(args) => {
            operator.submit_withdrawal(&args.burn_address, args.burn_index).await
        }
        Commands::StartReconfiguration => operator.start_reconfiguration().await?,
        Commands::ExecutePayouts(args) => {
            operator
                .execute_payouts(args.deposits, args.withdrawals, args.test)
                .await?
        }
        Commands::Consensus => operator.consensus().await,
        Commands::Log(args) => operator.log(args.authority).await?,
        Commands::SyncDatabase(args) => operator.sync_database(args.authority).await?,
        Commands::Terminate(args) => operator.terminate(args.authority).await,
        Commands::Run(_) | Commands::Init(_) | Commands::Version => {
            anyhow::bail!("not an operator command")
        }
    };
    print!("{report}");
    Ok(())
}

// ---------------------------------------------------------------------------
// version / signals
// ---------------------------------------------------------------------------

fn print_version() {
    println!("wgenix-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. A handler
/// that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
