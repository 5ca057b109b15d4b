//! Core domain types: coins, swap events and raw block results.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// ABCI event type emitted by the poolmanager for every executed swap.
pub const TOKEN_SWAPPED: &str = "token_swapped";

/// Attribute keys of a `token_swapped` event.
pub mod attr {
    pub const TOKENS_IN: &str = "tokens_in";
    pub const TOKENS_OUT: &str = "tokens_out";
    pub const POOL_ID: &str = "pool_id";
    pub const SENDER: &str = "sender";
}

// ─── Coin ────────────────────────────────────────────────────────────────────

/// An integer token amount with its denomination, e.g. `1000000uosmo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coin {
    pub denom: String,
    pub amount: BigUint,
}

/// Why a coin string was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinParseError(pub String);

impl fmt::Display for CoinParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CoinParseError {}

impl Coin {
    pub fn new(amount: impl Into<BigUint>, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }

    /// Parse the normalized `<amount><denom>` form used in SDK events.
    pub fn parse(raw: &str) -> Result<Self, CoinParseError> {
        let s = raw.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| CoinParseError(format!("coin '{s}' has no denom")))?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() {
            return Err(CoinParseError(format!("coin '{s}' has no amount")));
        }
        validate_denom(denom)?;
        let amount = BigUint::from_str(amount)
            .map_err(|e| CoinParseError(format!("coin '{s}': bad amount: {e}")))?;
        Ok(Self {
            denom: denom.to_string(),
            amount,
        })
    }
}

/// Denoms match `[a-zA-Z][a-zA-Z0-9/:._-]{2,127}`.
pub fn validate_denom(denom: &str) -> Result<(), CoinParseError> {
    let mut chars = denom.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(CoinParseError(format!(
                "invalid denom '{denom}': must start with a letter"
            )))
        }
    }
    if !(3..=128).contains(&denom.len()) {
        return Err(CoinParseError(format!(
            "invalid denom '{denom}': length must be 3..=128"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || "/:._-".contains(*c))) {
        return Err(CoinParseError(format!(
            "invalid denom '{denom}': unexpected character '{bad}'"
        )));
    }
    Ok(())
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = CoinParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Coin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Coin::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ─── NaturalKey ──────────────────────────────────────────────────────────────

/// Position of a swap on chain: `(height, tx_index, event_index)`.
///
/// Ordering is lexicographic, which is also chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub height: u64,
    pub tx_index: u32,
    pub event_index: u32,
}

impl NaturalKey {
    pub fn new(height: u64, tx_index: u32, event_index: u32) -> Self {
        Self {
            height,
            tx_index,
            event_index,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.height, self.tx_index, self.event_index)
    }
}

impl FromStr for NaturalKey {
    type Err = String;

    /// Parses `height:tx_index:event_index`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(format!(
                "expected height:tx_index:event_index, got '{s}'"
            ));
        }
        let height = parts[0]
            .parse()
            .map_err(|e| format!("bad height '{}': {e}", parts[0]))?;
        let tx_index = parts[1]
            .parse()
            .map_err(|e| format!("bad tx index '{}': {e}", parts[1]))?;
        let event_index = parts[2]
            .parse()
            .map_err(|e| format!("bad event index '{}': {e}", parts[2]))?;
        Ok(Self::new(height, tx_index, event_index))
    }
}

// ─── SwapEvent ───────────────────────────────────────────────────────────────

/// One executed swap as extracted from a `token_swapped` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub height: u64,
    pub tx_index: u32,
    /// Index of the event in its transaction's full event list.
    pub event_index: u32,
    pub pool_id: u64,
    pub sender: String,
    pub token_in: Coin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_out: Option<Coin>,
    /// USD value of `token_in`; `None` when no price could be resolved.
    #[serde(default)]
    pub usd_value: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<DateTime<Utc>>,
}

impl SwapEvent {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.height, self.tx_index, self.event_index)
    }

    /// Compares the on-chain fields only. `usd_value` and `block_time` are
    /// derived and may legitimately be filled in later.
    pub fn same_raw_content(&self, other: &SwapEvent) -> bool {
        self.key() == other.key()
            && self.pool_id == other.pool_id
            && self.sender == other.sender
            && self.token_in == other.token_in
            && self.token_out == other.token_out
    }
}

// ─── Raw block results ───────────────────────────────────────────────────────

/// A single ABCI event attribute with plain-text key and value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

/// An ABCI event emitted during transaction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl AbciEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// All values carried under `key`, in emission order.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.key == key)
            .map(|a| a.value.as_str())
            .collect()
    }
}

/// Execution result of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// ABCI result code; `0` means the transaction succeeded.
    pub code: u32,
    #[serde(default)]
    pub events: Vec<AbciEvent>,
}

impl TxResult {
    pub fn ok(events: Vec<AbciEvent>) -> Self {
        Self { code: 0, events }
    }
}

/// Everything the scanner needs from one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResults {
    pub height: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub txs: Vec<TxResult>,
}

impl BlockResults {
    pub fn empty(height: u64) -> Self {
        Self {
            height,
            timestamp: None,
            txs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_coin() {
        let c = Coin::parse("1000000uosmo").unwrap();
        assert_eq!(c.denom, "uosmo");
        assert_eq!(c.amount, BigUint::from(1_000_000u64));
        assert_eq!(c.to_string(), "1000000uosmo");
    }

    #[test]
    fn parse_ibc_and_factory_denoms() {
        let ibc = Coin::parse(
            "42ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2",
        )
        .unwrap();
        assert!(ibc.denom.starts_with("ibc/"));
        let factory = Coin::parse(" 7factory/osmo1abc/alloyed/allBTC ").unwrap();
        assert_eq!(factory.amount, BigUint::from(7u32));
        assert_eq!(factory.denom, "factory/osmo1abc/alloyed/allBTC");
    }

    #[test]
    fn parse_huge_amount() {
        let c = Coin::parse("340282366920938463463374607431768211456uosmo").unwrap();
        assert_eq!(
            c.amount.to_string(),
            "340282366920938463463374607431768211456"
        );
    }

    #[test]
    fn reject_bad_coins() {
        assert!(Coin::parse("uosmo").is_err());
        assert!(Coin::parse("1000").is_err());
        assert!(Coin::parse("").is_err());
        assert!(Coin::parse("10ab").is_err());
        assert!(Coin::parse("10 uosmo").is_err());
        assert!(Coin::parse("1.5uosmo").is_err());
        assert!(Coin::parse("10uosmo,5uatom").is_err());
        assert!(Coin::parse("10-uosmo").is_err());
    }

    #[test]
    fn coin_serde_as_string() {
        let c = Coin::new(5u32, "uion");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"5uion\"");
        let back: Coin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn natural_key_order_and_parse() {
        let a = NaturalKey::new(10, 0, 5);
        let b = NaturalKey::new(10, 1, 0);
        let c = NaturalKey::new(11, 0, 0);
        assert!(a < b && b < c);
        assert_eq!("10:1:0".parse::<NaturalKey>().unwrap(), b);
        assert!("10:1".parse::<NaturalKey>().is_err());
        assert!("x:1:0".parse::<NaturalKey>().is_err());
    }

    #[test]
    fn raw_content_ignores_derived_fields() {
        let base = SwapEvent {
            height: 1,
            tx_index: 0,
            event_index: 3,
            pool_id: 1,
            sender: "osmo1sender".into(),
            token_in: Coin::new(10u32, "uosmo"),
            token_out: None,
            usd_value: None,
            block_time: None,
        };
        let mut priced = base.clone();
        priced.usd_value = Some("1.5".parse().unwrap());
        assert!(base.same_raw_content(&priced));

        let mut other_pool = base.clone();
        other_pool.pool_id = 2;
        assert!(!base.same_raw_content(&other_pool));
    }

    #[test]
    fn abci_event_json_shape() {
        let json = r#"{"type":"token_swapped","attributes":[{"key":"pool_id","value":"1"}]}"#;
        let ev: AbciEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.kind, TOKEN_SWAPPED);
        assert_eq!(ev.values(attr::POOL_ID), vec!["1"]);
    }
}
