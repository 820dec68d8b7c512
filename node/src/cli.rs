//! # CLI Interface
//!
//! `wgenix-node` runs an authority daemon (`run`), prepares a settings
//! folder (`init`), and drives the federation as its operator (every other
//! subcommand). Operator subcommands load the same settings folder as the
//! daemon and talk to every authority listed in it.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// wGenix bridge authority.
#[derive(Parser, Debug)]
#[command(
    name = "wgenix-node",
    about = "wGenix bridge authority daemon and operator CLI",
    version,
    propagate_version = true
)]
pub struct WgenixNodeCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Settings folder holding networks.json, database.json and the private key file.
    #[arg(long, short = 's', global = true, env = "WGENIX_SETTINGS", default_value = "settings")]
    pub settings: PathBuf,

    /// Network entry of networks.json to use.
    #[arg(long, short = 'n', global = true, env = "WGENIX_NETWORK", default_value = "mainnet")]
    pub network: String,

    /// Log output format: pretty or json.
    #[arg(long, global = true, env = "WGENIX_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve this authority's RPC surface.
    Run(RunArgs),
    /// Write a fresh settings folder with a newly generated wallet.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
    /// Have every authority generate and register a deposit address for a mint address.
    CreateMintDepositAddress(MintAddressArgs),
    /// Show each authority's view of a mint address's deposits.
    QueryMintBalance(MintAddressArgs),
    /// Collect a signed mint authorisation from each authority.
    CreateMintTransaction(MintAddressArgs),
    /// Show each authority's view of a burn address's withdrawals.
    QueryBurnHistory(BurnAddressArgs),
    /// Print the contract call needed to burn tokens towards a ledger address.
    CreateBurnTransaction(BurnTransactionArgs),
    /// Submit one burn to every authority for settlement.
    SubmitWithdrawal(SubmitWithdrawalArgs),
    /// Collect votes for the configured authority-set change.
    StartReconfiguration,
    /// Agree on pending payouts and settle them on the ledger.
    ExecutePayouts(ExecutePayoutsArgs),
    /// Compare every authority's statistics.
    Consensus,
    /// Print an authority's error log.
    Log(AuthorityArgs),
    /// Replace the local store with a copy of another authority's.
    SyncDatabase(SyncDatabaseArgs),
    /// Ask one or every authority to shut down.
    Terminate(TerminateArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "WGENIX_METRICS_PORT", default_value_t = wgenix_protocol::config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Address to bind both listeners to.
    #[arg(long, env = "WGENIX_BIND", default_value = "0.0.0.0")]
    pub bind: String,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Ledger node JSON-RPC URL to write into the template.
    #[arg(long, default_value = "http://127.0.0.1:43649")]
    pub genix_rpc_url: String,

    /// Contract indexer URL to write into the template.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub provider: String,

    /// Overwrite an existing settings folder.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct MintAddressArgs {
    /// Account-chain address receiving the minted tokens.
    pub mint_address: String,
}

#[derive(Args, Debug)]
pub struct BurnAddressArgs {
    /// Account-chain address that burned the tokens.
    pub burn_address: String,
}

#[derive(Args, Debug)]
pub struct BurnTransactionArgs {
    /// Amount to burn, in GENIX (e.g. `12.5`).
    pub amount: String,
    /// Ledger address the released GENIX should go to.
    pub destination: String,
}

#[derive(Args, Debug)]
pub struct SubmitWithdrawalArgs {
    pub burn_address: String,
    pub burn_index: u64,
}

#[derive(Args, Debug)]
pub struct ExecutePayoutsArgs {
    /// Settle deposit taxes.
    #[arg(long)]
    pub deposits: bool,
    /// Settle withdrawals.
    #[arg(long)]
    pub withdrawals: bool,
    /// Stop after the rehearsal round; nothing is signed for real or broadcast.
    #[arg(long)]
    pub test: bool,
}

#[derive(Args, Debug)]
pub struct AuthorityArgs {
    /// Index of the authority in networks.json.
    pub authority: usize,
}

#[derive(Args, Debug)]
pub struct SyncDatabaseArgs {
    /// Index of the authority to copy from.
    pub authority: usize,
}

#[derive(Args, Debug)]
pub struct TerminateArgs {
    /// Index of the authority to stop. Every authority when omitted.
    pub authority: Option<usize>,
}
