//! Process configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;

use crate::collector::DEFAULT_MAX_BLOCK_RANGE;
use crate::recovery::{IndexerSettings, DEFAULT_POLL_INTERVAL_SECS};
use crate::rpc::{RpcConfig, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};
use crate::store::DEFAULT_KEY_PREFIX;

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default trait catalog location
pub const DEFAULT_TRAITS_CONFIG_PATH: &str = "./config.json";

/// Default prefix of composed image references
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://storage.googleapis.com/polymorph-images/";

/// Errors that can occur while reading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration of the indexer process
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    pub redis_url: String,
    pub redis_key_prefix: String,
    pub traits_config_path: PathBuf,
    pub poll_interval_secs: u64,
    pub max_block_range: u64,
    pub start_block: u64,
    pub rpc_timeout_ms: u64,
    pub rpc_max_retries: u32,
    pub image_base_url: String,
}

impl IndexerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RPC_URL` (required)
    /// - `CONTRACT_ADDRESS` (required)
    /// - `REDIS_URL` (default: redis://127.0.0.1:6379)
    /// - `REDIS_KEY_PREFIX` (default: polymorph)
    /// - `TRAITS_CONFIG_PATH` (default: ./config.json)
    /// - `POLL_INTERVAL_SECS` (default: 15)
    /// - `MAX_BLOCK_RANGE` (default: 1000)
    /// - `START_BLOCK` (default: 0)
    /// - `RPC_TIMEOUT_MS` (default: 10000)
    /// - `RPC_MAX_RETRIES` (default: 3)
    /// - `IMAGE_BASE_URL` (default: the public image bucket)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let rpc_url = var("RPC_URL").ok_or(ConfigError::Missing("RPC_URL"))?;
        let contract_address = parse(
            "CONTRACT_ADDRESS",
            var("CONTRACT_ADDRESS").ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))?,
        )?;
        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            var(name).map_or(Ok(default), |v| parse(name, v))
        };

        let max_block_range = number("MAX_BLOCK_RANGE", DEFAULT_MAX_BLOCK_RANGE)?;
        if max_block_range == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_BLOCK_RANGE",
                value: "0".into(),
            });
        }

        Ok(Self {
            rpc_url,
            contract_address,
            redis_url: var("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            redis_key_prefix: var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            traits_config_path: PathBuf::from(expand_path(
                &var("TRAITS_CONFIG_PATH")
                    .unwrap_or_else(|| DEFAULT_TRAITS_CONFIG_PATH.to_string()),
            )),
            poll_interval_secs: number("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            max_block_range,
            start_block: number("START_BLOCK", 0)?,
            rpc_timeout_ms: number("RPC_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            rpc_max_retries: var("RPC_MAX_RETRIES")
                .map_or(Ok(DEFAULT_MAX_RETRIES), |v| parse("RPC_MAX_RETRIES", v))?,
            image_base_url: var("IMAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string()),
        })
    }

    /// Settings for the RPC client
    pub fn rpc(&self) -> RpcConfig {
        let mut rpc = RpcConfig::new(self.rpc_url.clone(), self.contract_address);
        rpc.timeout_ms = self.rpc_timeout_ms;
        rpc.max_retries = self.rpc_max_retries;
        rpc
    }

    /// Settings for the scheduler
    pub fn indexer(&self) -> IndexerSettings {
        IndexerSettings {
            start_block: self.start_block,
            max_block_range: self.max_block_range,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(ConfigError::Invalid { name, value }),
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONTRACT: &str = "0x1cbb182322aee8ce9f4f1f98d7460173ee30af1f";

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            IndexerConfig::from_vars(vars(&[("RPC_URL", "http://node"), ("CONTRACT_ADDRESS", CONTRACT)]))
                .unwrap();

        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.redis_key_prefix, "polymorph");
        assert_eq!(config.traits_config_path, PathBuf::from("./config.json"));
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.max_block_range, 1000);
        assert_eq!(config.start_block, 0);
        assert_eq!(config.rpc_timeout_ms, 10_000);
        assert_eq!(config.rpc_max_retries, 3);
        assert_eq!(config.image_base_url, DEFAULT_IMAGE_BASE_URL);
        assert_eq!(config.contract_address, CONTRACT.parse::<Address>().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = IndexerConfig::from_vars(vars(&[
            ("RPC_URL", "http://node"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("REDIS_KEY_PREFIX", "poly-test"),
            ("POLL_INTERVAL_SECS", "5"),
            ("MAX_BLOCK_RANGE", "250"),
            ("START_BLOCK", "13000000"),
            ("RPC_MAX_RETRIES", "0"),
        ]))
        .unwrap();

        assert_eq!(config.redis_key_prefix, "poly-test");
        assert_eq!(config.indexer().poll_interval, Duration::from_secs(5));
        assert_eq!(config.indexer().max_block_range, 250);
        assert_eq!(config.indexer().start_block, 13_000_000);
        assert_eq!(config.rpc().max_retries, 0);
        assert_eq!(config.rpc().url, "http://node");
    }

    #[test]
    fn test_missing_required() {
        let err = IndexerConfig::from_vars(vars(&[("CONTRACT_ADDRESS", CONTRACT)])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("RPC_URL"));

        let err = IndexerConfig::from_vars(vars(&[("RPC_URL", "http://node")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("CONTRACT_ADDRESS"));
    }

    #[test]
    fn test_invalid_numbers_and_address() {
        let err = IndexerConfig::from_vars(vars(&[
            ("RPC_URL", "http://node"),
            ("CONTRACT_ADDRESS", "not-an-address"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CONTRACT_ADDRESS", .. }));

        let err = IndexerConfig::from_vars(vars(&[
            ("RPC_URL", "http://node"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_INTERVAL_SECS", .. }));

        let err = IndexerConfig::from_vars(vars(&[
            ("RPC_URL", "http://node"),
            ("CONTRACT_ADDRESS", CONTRACT),
            ("MAX_BLOCK_RANGE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_BLOCK_RANGE", .. }));
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/etc/traits.json"), "/etc/traits.json");
        let expanded = expand_path("~/traits.json");
        if dirs::home_dir().is_some() {
            assert!(!expanded.starts_with('~'));
            assert!(expanded.ends_with("/traits.json"));
        }
    }
}
