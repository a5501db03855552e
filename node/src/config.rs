use anyhow::Context;
use cosigner_primitives::transaction::PermissionLevel;
use cosigner_primitives::Name;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Config for the HTTP listener serving cosigning requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebUIConfig {
    pub host: String,
    pub port: u16,
}

/// How to reach the chain node used for interface lookups and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Base URL of the node's HTTP API, e.g. `https://eos.greymass.com`.
    pub api_url: String,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    10
}

/// Interfaces are fetched per request unless this is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiCacheConfig {
    pub capacity: NonZeroUsize,
    /// How long a fetched interface is served before it is fetched again.
    pub ttl_sec: u64,
}

/// The contents of the main config.yaml file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// The account the service cosigns as.
    pub account: Name,
    /// Permission of `account` whose key is supplied at start-up.
    pub permission: Name,
    pub chain: ChainConfig,
    pub web_ui: WebUIConfig,
    #[serde(default)]
    pub abi_cache: Option<AbiCacheConfig>,
    #[serde(default = "default_verify_transaction_id")]
    pub verify_transaction_id: bool,
}

fn default_verify_transaction_id() -> bool {
    true
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&file)?;
        Ok(config)
    }

    pub fn permission_level(&self) -> PermissionLevel {
        PermissionLevel {
            actor: self.account,
            permission: self.permission,
        }
    }
}

pub fn load_config_file(home_dir: &Path) -> anyhow::Result<ConfigFile> {
    let config_path = home_dir.join("config.yaml");
    ConfigFile::from_file(&config_path).context("Load config.yaml")
}
