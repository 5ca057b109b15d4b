//! USD pricing of swap inputs.
//!
//! Prices are resolved per `(denom, TimeBucket)` and cached forever: once a
//! bucket has a price it never changes, so re-scans annotate identically.
//! Concurrent requests for the same key share one upstream fetch; failures
//! are not cached and surface as [`PriceResolution::Unresolved`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use crate::types::Coin;

/// Default bucket width: one day.
pub const DEFAULT_BUCKET_SECS: u64 = 86_400;

/// Decimals assumed for `u`-prefixed micro denoms such as `uosmo`.
pub const MICRO_DECIMALS: u32 = 6;

/// Discretized block time: `timestamp / bucket_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeBucket(pub i64);

impl TimeBucket {
    pub fn of(timestamp: DateTime<Utc>, bucket_secs: u64) -> Self {
        Self(timestamp.timestamp().div_euclid(bucket_secs.max(1) as i64))
    }

    /// First instant covered by the bucket.
    pub fn start(&self, bucket_secs: u64) -> Option<DateTime<Utc>> {
        let secs = self.0.checked_mul(bucket_secs as i64)?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("price source unavailable: {0}")]
    Unavailable(String),
    #[error("no price for denom '{0}'")]
    UnknownDenom(String),
    #[error("invalid price data: {0}")]
    Invalid(String),
}

/// Upstream provider of USD prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price of one display unit of `denom` during `bucket`.
    async fn fetch_usd_price(&self, denom: &str, bucket: TimeBucket)
        -> Result<BigDecimal, PriceError>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Outcome of a price lookup. Never a silent zero.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceResolution {
    Resolved(BigDecimal),
    Unresolved(String),
}

impl PriceResolution {
    pub fn value(self) -> Option<BigDecimal> {
        match self {
            Self::Resolved(v) => Some(v),
            Self::Unresolved(_) => None,
        }
    }
}

// ─── Denom registry ──────────────────────────────────────────────────────────

/// Decimal exponents per denom, used to turn base units into display units.
#[derive(Debug, Clone, Default)]
pub struct DenomRegistry {
    decimals: HashMap<String, u32>,
}

impl DenomRegistry {
    pub fn new(decimals: HashMap<String, u32>) -> Self {
        Self { decimals }
    }

    pub fn with(mut self, denom: impl Into<String>, decimals: u32) -> Self {
        self.decimals.insert(denom.into(), decimals);
        self
    }

    /// Explicit entry first, then the micro-denom convention. Anything else
    /// (IBC hashes, factory denoms) must be registered explicitly.
    pub fn decimals_for(&self, denom: &str) -> Option<u32> {
        if let Some(d) = self.decimals.get(denom) {
            return Some(*d);
        }
        let is_micro = denom.len() > 1 && denom.starts_with('u') && !denom.contains('/');
        is_micro.then_some(MICRO_DECIMALS)
    }
}

/// `amount / 10^decimals * price`, exact.
pub fn scale_usd(coin: &Coin, decimals: u32, price: &BigDecimal) -> BigDecimal {
    let units = BigDecimal::new(BigInt::from(coin.amount.clone()), decimals as i64);
    units * price
}

// ─── Oracle ──────────────────────────────────────────────────────────────────

type PriceCell = Arc<OnceCell<BigDecimal>>;

/// Caching, single-flight front of a [`PriceSource`].
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    registry: DenomRegistry,
    bucket_secs: u64,
    cache: RwLock<HashMap<(String, TimeBucket), PriceCell>>,
    upstream_calls: AtomicU64,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>, registry: DenomRegistry, bucket_secs: u64) -> Self {
        Self {
            source,
            registry,
            bucket_secs: bucket_secs.max(1),
            cache: RwLock::new(HashMap::new()),
            upstream_calls: AtomicU64::new(0),
        }
    }

    pub fn bucket_secs(&self) -> u64 {
        self.bucket_secs
    }

    pub fn registry(&self) -> &DenomRegistry {
        &self.registry
    }

    /// Number of fetches that actually reached the source.
    pub fn upstream_calls(&self) -> u64 {
        self.upstream_calls.load(Ordering::Relaxed)
    }

    fn cell(&self, denom: &str, bucket: TimeBucket) -> PriceCell {
        let key = (denom.to_string(), bucket);
        if let Some(cell) = self.cache.read().unwrap().get(&key) {
            return Arc::clone(cell);
        }
        let mut cache = self.cache.write().unwrap();
        Arc::clone(cache.entry(key).or_default())
    }

    /// USD price of one display unit of `denom` at `timestamp`.
    pub async fn resolve(&self, denom: &str, height: u64, timestamp: DateTime<Utc>) -> PriceResolution {
        let bucket = TimeBucket::of(timestamp, self.bucket_secs);
        let cell = self.cell(denom, bucket);
        let result = cell
            .get_or_try_init(|| async {
                self.upstream_calls.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(denom, height, bucket = bucket.0, source = self.source.name(), "fetching price");
                self.source.fetch_usd_price(denom, bucket).await
            })
            .await;
        match result {
            Ok(price) => PriceResolution::Resolved(price.clone()),
            Err(e) => {
                tracing::warn!(denom, height, bucket = bucket.0, error = %e, "price unresolved");
                PriceResolution::Unresolved(e.to_string())
            }
        }
    }

    /// USD value of `coin` at block time, or why it could not be computed.
    pub async fn usd_value(
        &self,
        coin: &Coin,
        height: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> PriceResolution {
        let Some(timestamp) = timestamp else {
            return PriceResolution::Unresolved(format!("block time of height {height} unknown"));
        };
        let Some(decimals) = self.registry.decimals_for(&coin.denom) else {
            return PriceResolution::Unresolved(format!("no decimals registered for '{}'", coin.denom));
        };
        match self.resolve(&coin.denom, height, timestamp).await {
            PriceResolution::Resolved(price) => {
                PriceResolution::Resolved(scale_usd(coin, decimals, &price))
            }
            unresolved => unresolved,
        }
    }

    /// Periodically warms the cache for the current bucket of `denoms` until
    /// `shutdown` flips to `true`.
    pub fn spawn_refresh(
        self: Arc<Self>,
        denoms: Vec<String>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let now = Utc::now();
                for denom in &denoms {
                    let _ = self.resolve(denom, 0, now).await;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("price refresh stopped");
        })
    }
}

// ─── Static source ───────────────────────────────────────────────────────────

/// Fixed price table, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<String, BigDecimal>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, denom: impl Into<String>, price: BigDecimal) -> Self {
        self.prices.insert(denom.into(), price);
        self
    }

    pub fn from_map(prices: HashMap<String, BigDecimal>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_usd_price(&self, denom: &str, _bucket: TimeBucket) -> Result<BigDecimal, PriceError> {
        self.prices
            .get(denom)
            .cloned()
            .ok_or_else(|| PriceError::UnknownDenom(denom.to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::AtomicU32;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn oracle(source: impl PriceSource + 'static) -> PriceOracle {
        PriceOracle::new(Arc::new(source), DenomRegistry::default(), DEFAULT_BUCKET_SECS)
    }

    /// Fails the first `failures` calls, then returns a fixed price.
    struct Flaky {
        failures: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl PriceSource for Flaky {
        async fn fetch_usd_price(&self, _denom: &str, _bucket: TimeBucket) -> Result<BigDecimal, PriceError> {
            tokio::time::sleep(self.delay).await;
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PriceError::Unavailable("503".into()));
            }
            Ok(dec("2.5"))
        }
    }

    #[test]
    fn bucket_of_timestamp() {
        assert_eq!(TimeBucket::of(ts(0), 86_400), TimeBucket(0));
        assert_eq!(TimeBucket::of(ts(86_399), 86_400), TimeBucket(0));
        assert_eq!(TimeBucket::of(ts(86_400), 86_400), TimeBucket(1));
        assert_eq!(TimeBucket(2).start(86_400), Some(ts(172_800)));
    }

    #[test]
    fn registry_defaults() {
        let reg = DenomRegistry::default().with("ibc/ABC", 18);
        assert_eq!(reg.decimals_for("uosmo"), Some(6));
        assert_eq!(reg.decimals_for("ibc/ABC"), Some(18));
        assert_eq!(reg.decimals_for("ibc/DEF"), None);
        assert_eq!(reg.decimals_for("stake"), None);
    }

    #[tokio::test]
    async fn osmo_swap_value() {
        let o = oracle(StaticPriceSource::new().with_price("uosmo", dec("0.75")));
        let coin = Coin::new(1_000_000u64, "uosmo");
        let v = o.usd_value(&coin, 17777010, Some(ts(1_714_000_000))).await;
        assert_eq!(v, PriceResolution::Resolved(dec("0.75")));
    }

    #[tokio::test]
    async fn unknown_price_is_unresolved_not_zero() {
        let o = oracle(StaticPriceSource::new());
        let v = o
            .usd_value(&Coin::new(5u32, "uion"), 1, Some(ts(10)))
            .await;
        assert!(matches!(v, PriceResolution::Unresolved(_)));
        let no_time = o.usd_value(&Coin::new(5u32, "uion"), 1, None).await;
        assert!(matches!(no_time, PriceResolution::Unresolved(_)));
    }

    #[tokio::test]
    async fn same_bucket_is_cached() {
        let o = oracle(StaticPriceSource::new().with_price("uosmo", dec("1")));
        o.resolve("uosmo", 1, ts(100)).await;
        o.resolve("uosmo", 2, ts(200)).await;
        assert_eq!(o.upstream_calls(), 1);
        o.resolve("uosmo", 3, ts(90_000)).await;
        assert_eq!(o.upstream_calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let o = oracle(Flaky {
            failures: AtomicU32::new(1),
            delay: Duration::ZERO,
        });
        assert!(o.resolve("uosmo", 1, ts(5)).await.value().is_none());
        let second = o.resolve("uosmo", 1, ts(5)).await;
        assert_eq!(second.value(), Some(dec("2.5")));
        assert_eq!(o.upstream_calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let o = Arc::new(oracle(Flaky {
            failures: AtomicU32::new(0),
            delay: Duration::from_millis(50),
        }));
        let mut handles = Vec::new();
        for h in 0..8 {
            let o = Arc::clone(&o);
            handles.push(tokio::spawn(async move { o.resolve("uosmo", h, ts(5)).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().value().is_some());
        }
        assert_eq!(o.upstream_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_warms_and_stops() {
        let o = Arc::new(oracle(StaticPriceSource::new().with_price("uosmo", dec("1"))));
        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&o).spawn_refresh(vec!["uosmo".into()], Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(o.upstream_calls() >= 1);
    }
}
