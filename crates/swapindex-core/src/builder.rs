//! Fluent builder API for indexer configuration.
//!
//! # Example
//!
//! ```rust
//! use swapindex_core::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .chain("osmosis-1")
//!     .start_height(17_777_000)
//!     .end_height(17_777_050)
//!     .window_size(10)
//!     .build_config()
//!     .unwrap();
//! assert_eq!(config.window_size, 10);
//! ```

use crate::error::IndexerError;
use crate::indexer::{IndexerConfig, ScanMode};

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// First height to index.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Stop after `height` instead of following the tip.
    pub fn end_height(mut self, height: u64) -> Self {
        self.config.mode = ScanMode::BoundedRange { end_height: height };
        self
    }

    pub fn follow(mut self) -> Self {
        self.config.mode = ScanMode::CatchUpThenFollow;
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn min_fetch_interval_ms(mut self, ms: u64) -> Self {
        self.config.min_fetch_interval_ms = ms;
        self
    }

    /// Attempts per height and initial backoff for transient fetch errors.
    pub fn fetch_retry(mut self, max_attempts: u32, initial_backoff_ms: u64) -> Self {
        self.config.max_fetch_attempts = max_attempts;
        self.config.initial_backoff_ms = initial_backoff_ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn max_commit_attempts(mut self, n: u32) -> Self {
        self.config.max_commit_attempts = n;
        self
    }

    pub fn window_size(mut self, size: u64) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn bucket_secs(mut self, secs: u64) -> Self {
        self.config.price.bucket_secs = secs;
        self
    }

    /// Register the decimal exponent of a denom.
    pub fn denom_decimals(mut self, denom: impl Into<String>, decimals: u32) -> Self {
        self.config.price.denom_decimals.insert(denom.into(), decimals);
        self
    }

    /// Validate and return the configuration.
    pub fn build_config(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config().unwrap();
        assert_eq!(cfg.chain, "osmosis-1");
        assert_eq!(cfg.start_height, 17_777_000);
        assert_eq!(cfg.min_fetch_interval_ms, 500);
        assert_eq!(cfg.mode, ScanMode::CatchUpThenFollow);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .id("osmo-swaps")
            .start_height(100)
            .end_height(150)
            .confirmation_depth(2)
            .fetch_retry(3, 10)
            .window_size(25)
            .denom_decimals("ibc/ABC", 8)
            .build_config()
            .unwrap();
        assert_eq!(cfg.id, "osmo-swaps");
        assert_eq!(cfg.mode, ScanMode::BoundedRange { end_height: 150 });
        assert_eq!(cfg.max_fetch_attempts, 3);
        assert_eq!(cfg.window_spec().range(1), (125, 149));
        assert_eq!(cfg.denom_registry().decimals_for("ibc/ABC"), Some(8));
    }

    #[test]
    fn builder_validates() {
        assert!(IndexerBuilder::new().start_height(0).build_config().is_err());
        assert!(IndexerBuilder::new().window_size(0).build_config().is_err());
    }
}
