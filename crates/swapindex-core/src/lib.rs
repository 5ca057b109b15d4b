//! swapindex-core: scanner, extraction, pricing, storage contracts and
//! merkle windows for a resumable Osmosis swap index.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → ChainScanner
//!                      ├── BlockFetcher   (chain RPC, paced + retried)
//!                      ├── extractor      (token_swapped → SwapEvent)
//!                      ├── PriceOracle    (USD per denom and time bucket)
//!                      ├── SwapStore      (atomic height + cursor commits)
//!                      └── MerkleIndex    (sealed windows, inclusion proofs)
//! QueryService → SwapStore + MerkleIndex
//! ```

pub mod backfill;
pub mod builder;
pub mod cursor;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod indexer;
pub mod merkle;
pub mod policy;
pub mod price;
pub mod query;
pub mod scanner;
pub mod store;
pub mod types;
pub mod window;

pub use backfill::{backfill_usd, BackfillReport};
pub use builder::IndexerBuilder;
pub use cursor::ScanCursor;
pub use error::IndexerError;
pub use fetcher::{BlockFetcher, FetchError};
pub use indexer::{IndexerConfig, PriceConfig, ResumeFrom, ScanMode, ScannerState};
pub use merkle::{verify_proof, NodeHash, ProofStep, Side};
pub use price::{
    DenomRegistry, PriceError, PriceOracle, PriceResolution, PriceSource, StaticPriceSource,
    TimeBucket,
};
pub use query::QueryService;
pub use scanner::{ChainScanner, ScanReport};
pub use store::{CommitOutcome, IndexStore, MemoryStore, SwapStore, WindowStore};
pub use types::{AbciEvent, Attribute, BlockResults, Coin, NaturalKey, SwapEvent, TxResult};
pub use window::{MerkleIndex, MerkleProof, MerkleWindow, WindowSpec};
