//! # Deployment Settings
//!
//! Per-deployment configuration loaded from a settings folder:
//!
//! | File                                | Contents                                   |
//! |-------------------------------------|--------------------------------------------|
//! | `networks.json`                     | network name → [`NetworkSettings`]         |
//! | `database.json`                     | [`DatabaseSettings`]                       |
//! | `private.DO_NOT_SHARE_THIS.json`    | [`PrivateSettings`] (wallet signing seed)  |
//!
//! All keys are camelCase. Settings are immutable for the life of the
//! process; a reconfiguration of the federation happens on the contract
//! side and is picked up by restarting with new files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::amount::{self, Satoshis};
use crate::config::{DEFAULT_AUTHORITY_PORT, SYNC_DELAY_THRESHOLD};

pub const NETWORKS_FILE: &str = "networks.json";
pub const DATABASE_FILE: &str = "database.json";
pub const PRIVATE_FILE: &str = "private.DO_NOT_SHARE_THIS.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("network {0:?} is not defined in networks.json")]
    UnknownNetwork(String),

    #[error("invalid settings for network {network:?}: {reason}")]
    Invalid {
        network: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Authority set
// ---------------------------------------------------------------------------

/// One federation member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityNode {
    /// Host name, or a full base URL when it contains a scheme.
    pub hostname: String,
    pub wallet_address: String,
    /// Signing address this authority will use after a reconfiguration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_wallet_address: Option<String>,
}

impl AuthorityNode {
    /// Base URL of this authority's RPC surface.
    pub fn url(&self, port: u16) -> String {
        if self.hostname.contains("://") {
            self.hostname.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.hostname, port)
        }
    }
}

/// Ledger node JSON-RPC endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenixRpcSettings {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for GenixRpcSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenixRpcSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_authority_port() -> u16 {
    DEFAULT_AUTHORITY_PORT
}

fn default_sync_delay_threshold() -> u64 {
    SYNC_DELAY_THRESHOLD
}

/// Settings of one deployment network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    pub authority_nodes: Vec<AuthorityNode>,
    pub authority_threshold: usize,
    /// Index into `authority_nodes` of the only authority allowed to start
    /// settlement rounds and reconfiguration votes.
    pub payout_coordinator: usize,
    pub deposit_confirmations: u32,
    pub change_confirmations: u32,
    pub tax_payout_addresses: Vec<String>,
    pub change_address: String,
    pub configuration_nonce: u64,
    pub new_authority_threshold: usize,
    #[serde(with = "amount::decimal")]
    pub new_min_burn_amount: Satoshis,
    #[serde(default)]
    pub support_reconfiguration: bool,
    pub chain_id: u64,
    pub contract_address: String,
    /// Contract indexer endpoint.
    pub provider: String,
    pub genix_rpc: GenixRpcSettings,
    #[serde(default = "default_authority_port")]
    pub authority_port: u16,
    #[serde(default = "default_sync_delay_threshold")]
    pub sync_delay_threshold: u64,
}

impl NetworkSettings {
    pub fn authority_count(&self) -> usize {
        self.authority_nodes.len()
    }

    pub fn coordinator(&self) -> &AuthorityNode {
        &self.authority_nodes[self.payout_coordinator]
    }

    pub fn wallet_addresses(&self) -> Vec<String> {
        self.authority_nodes
            .iter()
            .map(|n| n.wallet_address.clone())
            .collect()
    }

    /// New signing addresses in authority order, empty entries for authorities
    /// that have none configured.
    pub fn new_wallet_addresses(&self) -> Vec<String> {
        self.authority_nodes
            .iter()
            .map(|n| n.new_wallet_address.clone().unwrap_or_default())
            .collect()
    }

    pub fn authority_urls(&self) -> Vec<String> {
        self.authority_nodes
            .iter()
            .map(|n| n.url(self.authority_port))
            .collect()
    }

    /// Copy safe to publish through `/stats`.
    pub fn public_view(&self) -> Self {
        let mut view = self.clone();
        view.genix_rpc.username.clear();
        view.genix_rpc.password.clear();
        view
    }

    pub fn validate(&self, network: &str) -> Result<(), SettingsError> {
        let invalid = |reason: String| SettingsError::Invalid {
            network: network.to_string(),
            reason,
        };

        let n = self.authority_nodes.len();
        if n == 0 {
            return Err(invalid("no authority nodes configured".into()));
        }
        if self.authority_threshold == 0 || self.authority_threshold > n {
            return Err(invalid(format!(
                "authorityThreshold {} not within 1..={}",
                self.authority_threshold, n
            )));
        }
        if self.payout_coordinator >= n {
            return Err(invalid(format!(
                "payoutCoordinator {} out of range for {} authorities",
                self.payout_coordinator, n
            )));
        }
        if self.tax_payout_addresses.is_empty() {
            return Err(invalid("taxPayoutAddresses is empty".into()));
        }
        if self.change_address.is_empty() {
            return Err(invalid("changeAddress is empty".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.authority_nodes {
            if !seen.insert(node.wallet_address.to_lowercase()) {
                return Err(invalid(format!(
                    "duplicate authority wallet address {}",
                    node.wallet_address
                )));
            }
        }
        if self.support_reconfiguration {
            if self.authority_nodes.iter().any(|n| n.new_wallet_address.is_none()) {
                return Err(invalid(
                    "supportReconfiguration requires newWalletAddress on every authority".into(),
                ));
            }
            if self.new_authority_threshold == 0 || self.new_authority_threshold > n {
                return Err(invalid(format!(
                    "newAuthorityThreshold {} not within 1..={}",
                    self.new_authority_threshold, n
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    pub database_path: PathBuf,
}

/// The authority's signing seed. Never logged.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateSettings {
    pub wallet_private_key: String,
}

impl fmt::Debug for PrivateSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateSettings { wallet_private_key: <redacted> }")
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything an authority or operator needs, resolved for one network.
#[derive(Debug, Clone)]
pub struct Settings {
    pub network_name: String,
    pub network: NetworkSettings,
    pub database: DatabaseSettings,
    pub private: PrivateSettings,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    let raw = serde_json::to_string_pretty(value).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, raw).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Settings {
    /// Load and validate the settings of `network` from `folder`.
    pub fn load(folder: impl AsRef<Path>, network: &str) -> Result<Self, SettingsError> {
        let folder = folder.as_ref();
        let mut networks: BTreeMap<String, NetworkSettings> =
            read_json(&folder.join(NETWORKS_FILE))?;
        let network_settings = networks
            .remove(network)
            .ok_or_else(|| SettingsError::UnknownNetwork(network.to_string()))?;
        network_settings.validate(network)?;

        let mut database: DatabaseSettings = read_json(&folder.join(DATABASE_FILE))?;
        if database.database_path.is_relative() {
            database.database_path = folder.join(&database.database_path);
        }
        let private: PrivateSettings = read_json(&folder.join(PRIVATE_FILE))?;

        Ok(Self {
            network_name: network.to_string(),
            network: network_settings,
            database,
            private,
        })
    }

    /// Write a settings folder. Used by `wgenix-node init` and by tests.
    pub fn write(
        folder: impl AsRef<Path>,
        network: &str,
        network_settings: &NetworkSettings,
        database: &DatabaseSettings,
        private: &PrivateSettings,
    ) -> Result<(), SettingsError> {
        let folder = folder.as_ref();
        fs::create_dir_all(folder).map_err(|source| SettingsError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        let mut networks = BTreeMap::new();
        networks.insert(network.to_string(), network_settings.clone());
        write_json(&folder.join(NETWORKS_FILE), &networks)?;
        write_json(&folder.join(DATABASE_FILE), database)?;
        write_json(&folder.join(PRIVATE_FILE), private)
    }
}
