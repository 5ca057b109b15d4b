//! CometBFT JSON-RPC 2.0 wire types.
//!
//! CometBFT takes named parameters and encodes 64-bit integers as decimal
//! strings. Event attributes are plain strings from v0.37 on and base64 on
//! older nodes; [`AttributeEncoding`] selects how they are normalized.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use swapindex_core::types::{AbciEvent, Attribute, BlockResults, TxResult};

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request with named parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }

    /// A request whose only parameter is `height`.
    pub fn at_height(id: u64, method: impl Into<String>, height: u64) -> Self {
        Self::new(id, method, serde_json::json!({ "height": height.to_string() }))
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    /// CometBFT puts the human-readable cause here as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Message and data joined, for classification and logging.
    pub fn detail(&self) -> String {
        match &self.data {
            Some(Value::String(s)) => format!("{}: {s}", self.message),
            Some(other) => format!("{}: {other}", self.message),
            None => self.message.clone(),
        }
    }

    /// The node pruned the height or never had it.
    pub fn is_unavailable_height(&self) -> bool {
        let detail = self.detail();
        detail.contains("lowest height is") || detail.contains("is not available")
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.detail())
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── CometBFT results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    pub latest_block_height: String,
    #[serde(default)]
    pub catching_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderResult {
    pub header: RawHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHeader {
    pub height: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResultsResult {
    pub height: String,
    /// `null` for blocks without transactions.
    #[serde(default)]
    pub txs_results: Option<Vec<RawTxResult>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub events: Option<Vec<RawEvent>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Option<Vec<RawAttribute>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttribute {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Decimal string to `u64`, as CometBFT encodes heights.
pub fn parse_height(raw: &str) -> Result<u64, String> {
    raw.parse::<u64>()
        .map_err(|e| format!("invalid height '{raw}': {e}"))
}

// ─── Attribute encoding ──────────────────────────────────────────────────────

/// How event attribute keys and values are encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeEncoding {
    /// CometBFT 0.37 and later.
    #[default]
    Plain,
    /// Tendermint / CometBFT 0.34.
    Base64,
}

impl std::str::FromStr for AttributeEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "base64" => Ok(Self::Base64),
            other => Err(format!("unknown attribute encoding '{other}'")),
        }
    }
}

impl AttributeEncoding {
    fn decode(self, raw: Option<String>) -> Result<String, String> {
        let raw = raw.unwrap_or_default();
        match self {
            Self::Plain => Ok(raw),
            Self::Base64 => {
                let bytes = ATTRIBUTE_BASE64
                    .decode(raw.as_bytes())
                    .map_err(|e| format!("invalid base64 attribute '{raw}': {e}"))?;
                String::from_utf8(bytes).map_err(|e| format!("attribute is not UTF-8: {e}"))
            }
        }
    }
}

/// Standard alphabet; CometBFT 0.34 pads, some proxies strip it.
const ATTRIBUTE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Build the chain-neutral block from CometBFT results and the header time.
pub fn into_block_results(
    raw: BlockResultsResult,
    timestamp: Option<DateTime<Utc>>,
    encoding: AttributeEncoding,
) -> Result<BlockResults, String> {
    let height = parse_height(&raw.height)?;
    let mut txs = Vec::new();
    for tx in raw.txs_results.unwrap_or_default() {
        let mut events = Vec::new();
        for ev in tx.events.unwrap_or_default() {
            let mut attributes = Vec::new();
            for attr in ev.attributes.unwrap_or_default() {
                attributes.push(Attribute {
                    key: encoding.decode(attr.key)?,
                    value: encoding.decode(attr.value)?,
                });
            }
            events.push(AbciEvent {
                kind: ev.kind,
                attributes,
            });
        }
        txs.push(TxResult {
            code: tx.code,
            events,
        });
    }
    Ok(BlockResults {
        height,
        timestamp,
        txs,
    })
}
