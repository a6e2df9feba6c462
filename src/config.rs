//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::engine::{ScannerSettings, WalletThreshold};
use crate::quotes::FixedRateGasOracle;
use crate::strategy::RiskLimits;
use crate::types::{ChainFamily, Network};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub risk: RiskLimits,
    pub scanner: ScannersConfig,
    #[serde(default)]
    pub quotes: QuotesConfig,
    pub gas: FixedRateGasOracle,
    #[serde(default)]
    pub storage: StorageConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub wallets: Vec<WalletThreshold>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub cycle_interval_secs: u64,
    /// Runs older than this are never approved.
    pub decision_window_secs: u64,
    /// Consecutive executor failures per strategy that trip safe mode.
    #[serde(default = "default_failure_limit")]
    pub consecutive_failure_limit: u32,
}

fn default_failure_limit() -> u32 {
    3
}

impl PipelineConfig {
    pub fn decision_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.decision_window_secs.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannersConfig {
    pub native: ScannerSettings,
    pub evm: ScannerSettings,
}

impl ScannersConfig {
    pub fn settings(&self, family: ChainFamily) -> &ScannerSettings {
        match family {
            ChainFamily::Native => &self.native,
            ChainFamily::Evm => &self.evm,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotesConfig {
    /// Live quote endpoint. Without it every scan prices synthetically.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Family/network pairs the live endpoint can price.
    #[serde(default)]
    pub live: Vec<LiveNetwork>,
    #[serde(default = "default_spread_bps")]
    pub synthetic_spread_bps: u32,
}

fn default_spread_bps() -> u32 {
    30
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: None,
            live: Vec::new(),
            synthetic_spread_bps: default_spread_bps(),
        }
    }
}

impl QuotesConfig {
    /// The quote API key, if one is configured and present in the environment.
    pub fn api_key(&self) -> Result<Option<SecretString>> {
        match &self.api_key_env {
            Some(name) => Ok(Some(SecretString::new(AppConfig::resolve_env(name)?))),
            None => Ok(None),
        }
    }

    pub fn live_pairs(&self) -> Vec<(ChainFamily, Network)> {
        self.live.iter().map(|l| (l.family, l.network)).collect()
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LiveNetwork {
    pub family: ChainFamily,
    pub network: Network,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite URL. Without it records are kept in memory only.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
