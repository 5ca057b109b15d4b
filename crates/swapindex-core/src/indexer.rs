//! Indexer configuration and runtime state types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::policy::RetryConfig;
use crate::price::{DenomRegistry, DEFAULT_BUCKET_SECS};
use crate::window::WindowSpec;

/// How far the scanner runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanMode {
    /// Catch up to the tip, then keep polling for new heights.
    CatchUpThenFollow,
    /// Stop once `end_height` (inclusive) is committed.
    BoundedRange { end_height: u64 },
}

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Continue after the persisted cursor.
    Persisted,
    /// Start at an explicit height (must not skip past the cursor).
    Override(u64),
}

/// Pricing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Width of a price bucket in seconds.
    pub bucket_secs: u64,
    /// Decimal exponents of denoms that do not follow the `u`-prefix rule.
    pub denom_decimals: HashMap<String, u32>,
    /// Denoms whose current price is refreshed in the background.
    pub refresh_denoms: Vec<String>,
    /// Background refresh period (milliseconds).
    pub refresh_interval_ms: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            bucket_secs: DEFAULT_BUCKET_SECS,
            denom_decimals: HashMap::new(),
            refresh_denoms: vec!["uosmo".into()],
            refresh_interval_ms: 60_000,
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used in logs).
    pub id: String,
    /// Chain id (e.g. `"osmosis-1"`).
    pub chain: String,
    /// First height to index; also the origin of merkle windows.
    pub start_height: u64,
    pub mode: ScanMode,
    /// Heights to stay behind the tip.
    pub confirmation_depth: u64,
    /// Tip polling interval once caught up (milliseconds).
    pub poll_interval_ms: u64,
    /// Minimum spacing between two upstream fetches (milliseconds).
    pub min_fetch_interval_ms: u64,
    /// Tries per height before giving up on transient errors.
    pub max_fetch_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Tries per commit before halting on storage errors.
    pub max_commit_attempts: u32,
    /// Heights per merkle window.
    pub window_size: u64,
    pub price: PriceConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "swapindex".into(),
            chain: "osmosis-1".into(),
            start_height: 17_777_000,
            mode: ScanMode::CatchUpThenFollow,
            confirmation_depth: 0,
            poll_interval_ms: 2_000,
            min_fetch_interval_ms: 500,
            max_fetch_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_commit_attempts: 5,
            window_size: 100,
            price: PriceConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Rejects settings the scanner cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.start_height == 0 {
            return Err(IndexerError::Config("start_height must be >= 1".into()));
        }
        if self.window_size == 0 {
            return Err(IndexerError::Config("window_size must be > 0".into()));
        }
        if self.price.bucket_secs == 0 {
            return Err(IndexerError::Config("price.bucket_secs must be > 0".into()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(IndexerError::Config("max_fetch_attempts must be > 0".into()));
        }
        if self.max_commit_attempts == 0 {
            return Err(IndexerError::Config("max_commit_attempts must be > 0".into()));
        }
        if let ScanMode::BoundedRange { end_height } = self.mode {
            if end_height < self.start_height {
                return Err(IndexerError::Config(format!(
                    "end_height {end_height} precedes start_height {}",
                    self.start_height
                )));
            }
        }
        Ok(())
    }

    pub fn fetch_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_fetch_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
        }
    }

    pub fn commit_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_commit_attempts,
            ..self.fetch_retry()
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(self.start_height, self.window_size)
    }

    pub fn denom_registry(&self) -> DenomRegistry {
        DenomRegistry::new(self.price.denom_decimals.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.min_fetch_interval_ms)
    }
}

/// Runtime state of the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Waiting to process the next height.
    Idle { next_height: u64 },
    Fetching(u64),
    Extracting(u64),
    Pricing(u64),
    Committing(u64),
    /// Caught up; polling the tip.
    Following,
    /// Shutdown requested or bounded range complete.
    Stopped,
    /// A fatal error stopped the scanner.
    Halted(String),
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle { next_height } => write!(f, "idle(next={next_height})"),
            Self::Fetching(h) => write!(f, "fetching({h})"),
            Self::Extracting(h) => write!(f, "extracting({h})"),
            Self::Pricing(h) => write!(f, "pricing({h})"),
            Self::Committing(h) => write!(f, "committing({h})"),
            Self::Following => write!(f, "following"),
            Self::Stopped => write!(f, "stopped"),
            Self::Halted(reason) => write!(f, "halted: {reason}"),
        }
    }
}
