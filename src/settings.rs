use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Fatal startup errors. Running without a chain endpoint or a store produces
/// no useful output, so these refuse to start the process (never retried).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("rpc.http_url is not configured")]
    MissingRpcUrl,
    #[error("database.url is not configured")]
    MissingDatabaseUrl,
    #[error("contracts.factory is not a valid address: {0}")]
    InvalidFactoryAddress(String),
    #[error("contracts.stable_asset is not a valid address: {0}")]
    InvalidStableAddress(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    pub http_url: String,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_call_timeout_seconds() -> u64 {
    8
}
fn default_max_concurrent_requests() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Indexer {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_initial_lookback_blocks")]
    pub initial_lookback_blocks: u64,
    /// Raw base units; a pool with either reserve at/below this is treated as
    /// drained and removed from the pools table.
    #[serde(default = "default_dust_threshold_wei")]
    pub dust_threshold_wei: u64,
    #[serde(default = "default_snapshot_throttle_seconds")]
    pub snapshot_throttle_seconds: u64,
    #[serde(default = "default_volume_window_days")]
    pub volume_window_days: i64,
    #[serde(default = "default_max_addresses_per_filter")]
    pub max_addresses_per_filter: usize,
}

fn default_poll_interval_seconds() -> u64 {
    15
}
fn default_initial_lookback_blocks() -> u64 {
    5000
}
fn default_dust_threshold_wei() -> u64 {
    1000
}
fn default_snapshot_throttle_seconds() -> u64 {
    60
}
fn default_volume_window_days() -> i64 {
    30
}
fn default_max_addresses_per_filter() -> usize {
    100
}

impl Default for Indexer {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            initial_lookback_blocks: default_initial_lookback_blocks(),
            dust_threshold_wei: default_dust_threshold_wei(),
            snapshot_throttle_seconds: default_snapshot_throttle_seconds(),
            volume_window_days: default_volume_window_days(),
            max_addresses_per_filter: default_max_addresses_per_filter(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Contracts {
    pub factory: String,
    pub stable_asset: String,
}

/// Static token metadata override (address -> symbol/decimals) applied before
/// any on-chain lookup.
#[derive(Debug, Deserialize, Clone)]
pub struct KnownToken {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub rpc: Rpc,
    pub database: Database,
    #[serde(default)]
    pub indexer: Indexer,
    pub contracts: Contracts,
    #[serde(default)]
    pub known_tokens: Vec<KnownToken>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name(path)).build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides
        if let Ok(url) = env::var("INDEXER_RPC_HTTP_URL") {
            if !url.trim().is_empty() {
                settings.rpc.http_url = url;
            }
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                settings.database.url = url;
            }
        }
        if let Ok(addr) = env::var("INDEXER_FACTORY_ADDRESS") {
            if !addr.trim().is_empty() {
                settings.contracts.factory = addr;
            }
        }
        if let Ok(addr) = env::var("INDEXER_STABLE_ASSET") {
            if !addr.trim().is_empty() {
                settings.contracts.stable_asset = addr;
            }
        }
        if let Ok(raw) = env::var("INDEXER_POLL_INTERVAL_SECONDS") {
            if let Ok(secs) = raw.trim().parse() {
                settings.indexer.poll_interval_seconds = secs;
            }
        }

        // Optional: extra known-token entries via ENV
        // (JSON array: [{"address": "..", "symbol": "..", "decimals": 18}])
        if let Ok(raw) = env::var("INDEXER_KNOWN_TOKENS") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                match serde_json::from_str::<Vec<KnownToken>>(trimmed) {
                    Ok(mut list) => settings.known_tokens.append(&mut list),
                    Err(e) => {
                        eprintln!("Failed to parse INDEXER_KNOWN_TOKENS as JSON: {}", e);
                    }
                }
            }
        }

        Ok(settings)
    }

    /// Startup validation. Returns the parsed contract addresses so callers
    /// fail here, once, instead of deep inside the first cycle.
    pub fn validate(&self) -> Result<(Address, Address), SettingsError> {
        if self.rpc.http_url.trim().is_empty() {
            return Err(SettingsError::MissingRpcUrl);
        }
        if self.database.url.trim().is_empty() {
            return Err(SettingsError::MissingDatabaseUrl);
        }
        let factory = self
            .contracts
            .factory
            .parse::<Address>()
            .map_err(|_| SettingsError::InvalidFactoryAddress(self.contracts.factory.clone()))?;
        let stable = self
            .contracts
            .stable_asset
            .parse::<Address>()
            .map_err(|_| SettingsError::InvalidStableAddress(self.contracts.stable_asset.clone()))?;
        Ok((factory, stable))
    }
}
