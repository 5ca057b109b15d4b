//! swapindex-cosmos: Cosmos chain collaborators for swapindex.
//!
//! - [`CometBftFetcher`]: `BlockFetcher` over CometBFT JSON-RPC (`status`,
//!   `block_results`, `header`)
//! - [`SqsPriceSource`]: `PriceSource` over the Osmosis Sidecar Query Server

pub mod fetcher;
pub mod prices;
pub mod rpc;

pub use fetcher::{CometBftConfig, CometBftFetcher, DEFAULT_RPC_URL};
pub use prices::{SqsConfig, SqsPriceSource, DEFAULT_SQS_URL, USDC_DENOM};
pub use rpc::AttributeEncoding;
