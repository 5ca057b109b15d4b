//! The `BlockFetcher` abstraction over a chain RPC endpoint.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::BlockResults;

/// Fetch failure, classified by whether retrying can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, throttling, 5xx, heights not produced yet.
    #[error("transient: {0}")]
    Transient(String),
    /// Pruned heights, malformed responses, client errors.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Permanent(r) => r,
        }
    }
}

/// Source of finalized block results.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Latest height the node has committed.
    async fn latest_height(&self) -> Result<u64, FetchError>;

    /// Transaction results and block time of `height`.
    async fn fetch_block_results(&self, height: u64) -> Result<BlockResults, FetchError>;
}
