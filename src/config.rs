//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, the action service token) are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::{ExecutorConfig, OrchestratorConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub exchanges: Vec<ExchangeAccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Seconds between polls of the action service.
    pub tick_interval_secs: u64,
    pub fill_attempts: u32,
    pub poll_attempts: u32,
    pub poll_interval_secs: u64,
    pub use_order_book: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token_env: String,
}

/// One exchange account the engine trades on.
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeAccountConfig {
    pub name: String,
    pub enabled: bool,
    pub api_key_env: String,
    pub api_secret_env: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

impl EngineConfig {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            fill_attempts: self.fill_attempts,
            use_order_book: self.use_order_book,
            executor: ExecutorConfig {
                poll_attempts: self.poll_attempts,
                poll_interval: Duration::from_secs(self.poll_interval_secs),
            },
        }
    }
}
