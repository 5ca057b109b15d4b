//! CLI configuration: a JSON file plus environment overrides.
//!
//! ```json
//! {
//!   "indexer": { "start_height": 17777000, "window_size": 100 },
//!   "rpc_url": "https://rpc.archive.osmosis.zone:443",
//!   "database": "./swapindex.db",
//!   "log": { "level": "info", "json": false }
//! }
//! ```
//!
//! Every field is optional. `SWAPINDEX_RPC_URL`, `SWAPINDEX_PRICES_URL`,
//! `SWAPINDEX_DB` and `RUST_LOG` override the file.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use swapindex_core::IndexerConfig;
use swapindex_cosmos::{
    AttributeEncoding, CometBftConfig, SqsConfig, DEFAULT_RPC_URL, DEFAULT_SQS_URL, USDC_DENOM,
};

use crate::logging::LogConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub indexer: IndexerConfig,
    pub rpc_url: String,
    pub prices_url: String,
    /// Denom priced as one US dollar.
    pub quote_denom: String,
    /// SQLite file path or `sqlite:` URL.
    pub database: String,
    pub attribute_encoding: AttributeEncoding,
    pub request_timeout_ms: u64,
    pub log: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            indexer: IndexerConfig::default(),
            rpc_url: DEFAULT_RPC_URL.into(),
            prices_url: DEFAULT_SQS_URL.into(),
            quote_denom: USDC_DENOM.into(),
            database: "./swapindex.db".into(),
            attribute_encoding: AttributeEncoding::Plain,
            request_timeout_ms: 30_000,
            log: LogConfig::default(),
        }
    }
}

impl CliConfig {
    /// Read `path` (or start from defaults) and apply the process environment.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
            .indexer
            .validate()
            .context("invalid indexer configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SWAPINDEX_RPC_URL") {
            self.rpc_url = url;
        }
        if let Some(url) = var("SWAPINDEX_PRICES_URL") {
            self.prices_url = url;
        }
        if let Some(db) = var("SWAPINDEX_DB") {
            self.database = db;
        }
        if let Some(filter) = var("RUST_LOG") {
            self.log.level = filter;
        }
    }

    pub fn cometbft(&self) -> CometBftConfig {
        CometBftConfig {
            url: self.rpc_url.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            attribute_encoding: self.attribute_encoding,
        }
    }

    pub fn sqs(&self) -> SqsConfig {
        SqsConfig {
            base_url: self.prices_url.clone(),
            quote_denom: self.quote_denom.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            bucket_secs: self.indexer.price.bucket_secs,
            ..SqsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapindex_core::ScanMode;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: CliConfig = serde_json::from_str(
            r#"{
                "indexer": {"start_height": 100, "mode": {"kind": "bounded_range", "end_height": 150}},
                "attribute_encoding": "base64",
                "log": {"json": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.indexer.start_height, 100);
        assert_eq!(config.indexer.mode, ScanMode::BoundedRange { end_height: 150 });
        assert_eq!(config.attribute_encoding, AttributeEncoding::Base64);
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.database, "./swapindex.db");
        assert!(config.log.json);
    }

    #[test]
    fn env_overrides() {
        let mut config = CliConfig::default();
        config.apply_env(|key| match key {
            "SWAPINDEX_RPC_URL" => Some("http://localhost:26657".into()),
            "SWAPINDEX_DB" => Some("/tmp/swaps.db".into()),
            "RUST_LOG" => Some("debug".into()),
            _ => None,
        });
        assert_eq!(config.rpc_url, "http://localhost:26657");
        assert_eq!(config.prices_url, DEFAULT_SQS_URL);
        assert_eq!(config.database, "/tmp/swaps.db");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.cometbft().url, "http://localhost:26657");
    }

    #[test]
    fn price_source_follows_bucket_width() {
        let config: CliConfig =
            serde_json::from_str(r#"{"indexer": {"price": {"bucket_secs": 3600}}}"#).unwrap();
        assert_eq!(config.sqs().bucket_secs, 3600);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = CliConfig::from_file(Path::new("/nonexistent/swapindex.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
