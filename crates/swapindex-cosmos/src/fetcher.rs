//! `BlockFetcher` over a CometBFT JSON-RPC endpoint, backed by `reqwest`.
//!
//! One height costs two calls issued concurrently: `block_results` for the
//! transaction events and `header` for the block time. Pacing and retries are
//! the scanner's job; this client only classifies failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use swapindex_core::fetcher::{BlockFetcher, FetchError};
use swapindex_core::types::BlockResults;

use crate::rpc::{
    into_block_results, parse_height, AttributeEncoding, BlockResultsResult, HeaderResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, StatusResult,
};

/// Public Osmosis archive node.
pub const DEFAULT_RPC_URL: &str = "https://rpc.archive.osmosis.zone:443";

/// Configuration for `CometBftFetcher`.
#[derive(Debug, Clone)]
pub struct CometBftConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub attribute_encoding: AttributeEncoding,
}

impl Default for CometBftConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.into(),
            request_timeout: Duration::from_secs(30),
            attribute_encoding: AttributeEncoding::Plain,
        }
    }
}

/// CometBFT JSON-RPC block fetcher.
pub struct CometBftFetcher {
    config: CometBftConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl CometBftFetcher {
    pub fn new(config: CometBftConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default settings for the given endpoint.
    pub fn for_url(url: impl Into<String>) -> Result<Self, FetchError> {
        Self::new(CometBftConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T: DeserializeOwned>(&self, req: JsonRpcRequest) -> Result<T, FetchError> {
        tracing::debug!(method = %req.method, id = %req.id, url = %self.config.url, "rpc call");

        let resp = self
            .http
            .post(&self.config.url)
            .json(&req)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body: JsonRpcResponse = resp.json().await.map_err(classify_transport)?;
        let result = body.into_result().map_err(classify_rpc)?;
        decode_result(&req.method, result)
    }
}

#[async_trait]
impl BlockFetcher for CometBftFetcher {
    async fn latest_height(&self) -> Result<u64, FetchError> {
        let status: StatusResult = self
            .call(JsonRpcRequest::new(self.next_id(), "status", Value::Object(Default::default())))
            .await?;
        parse_height(&status.sync_info.latest_block_height).map_err(FetchError::Permanent)
    }

    async fn fetch_block_results(&self, height: u64) -> Result<BlockResults, FetchError> {
        let results_req = JsonRpcRequest::at_height(self.next_id(), "block_results", height);
        let header_req = JsonRpcRequest::at_height(self.next_id(), "header", height);

        let (raw, header) = tokio::try_join!(
            self.call::<BlockResultsResult>(results_req),
            self.call::<HeaderResult>(header_req),
        )?;

        let header_height = parse_height(&header.header.height).map_err(FetchError::Permanent)?;
        if header_height != height {
            return Err(FetchError::Permanent(format!(
                "header for {height} reports height {header_height}"
            )));
        }

        let block = into_block_results(raw, Some(header.header.time), self.config.attribute_encoding)
            .map_err(FetchError::Permanent)?;
        tracing::debug!(height, txs = block.txs.len(), "fetched block results");
        Ok(block)
    }
}

// ─── Error classification ────────────────────────────────────────────────────

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::Permanent(format!("undecodable response: {e}"))
    } else if e.is_builder() {
        FetchError::Permanent(e.to_string())
    } else {
        // timeouts, refused and reset connections, truncated bodies
        FetchError::Transient(e.to_string())
    }
}

fn classify_status(status: u16, body: &str) -> FetchError {
    let reason = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    if status == 429 || status >= 500 {
        FetchError::Transient(reason)
    } else {
        FetchError::Permanent(reason)
    }
}

fn classify_rpc(e: JsonRpcError) -> FetchError {
    if e.is_unavailable_height() {
        FetchError::Permanent(e.to_string())
    } else {
        // includes heights past the node's tip
        FetchError::Transient(e.to_string())
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T, FetchError> {
    serde_json::from_value(result)
        .map_err(|e| FetchError::Permanent(format!("unexpected {method} result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert!(classify_status(429, "slow down").is_transient());
        assert!(classify_status(502, "bad gateway").is_transient());
        assert!(classify_status(503, "").is_transient());
        assert!(!classify_status(400, "bad request").is_transient());
        assert!(!classify_status(404, "").is_transient());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(5_000);
        let err = classify_status(500, &body);
        assert!(err.reason().len() < 300);
    }

    #[test]
    fn rpc_errors() {
        let pruned = JsonRpcError {
            code: -32603,
            message: "Internal error".into(),
            data: Some(Value::String(
                "height 1 is not available, lowest height is 3".into(),
            )),
        };
        assert!(!classify_rpc(pruned).is_transient());

        let ahead = JsonRpcError {
            code: -32603,
            message: "Internal error".into(),
            data: Some(Value::String(
                "height 20000000 must be less than or equal to the current blockchain height 17800000"
                    .into(),
            )),
        };
        assert!(classify_rpc(ahead).is_transient());
    }

    #[test]
    fn bad_result_shape_is_permanent() {
        let err = decode_result::<StatusResult>("status", serde_json::json!({"nope": 1}))
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.reason().contains("status"));
    }

    #[test]
    fn fetcher_construction() {
        let fetcher = CometBftFetcher::for_url("http://localhost:26657").unwrap();
        assert_eq!(fetcher.url(), "http://localhost:26657");
        assert_eq!(fetcher.next_id(), 1);
        assert_eq!(fetcher.next_id(), 2);
    }

    #[tokio::test]
    async fn unreachable_node_is_transient() {
        let fetcher = CometBftFetcher::new(CometBftConfig {
            url: "http://127.0.0.1:9".into(),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();
        let err = fetcher.latest_height().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
