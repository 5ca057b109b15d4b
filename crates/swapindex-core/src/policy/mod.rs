//! Reliability policies applied around every upstream call of the scanner.
//!
//! ```text
//! fetch → [FetchPacer] → [BlockFetcher] → on transient error → [RetryPolicy]
//! commit → [SwapStore] → on storage error → [RetryPolicy]
//! ```

pub mod pacer;
pub mod retry;

pub use pacer::FetchPacer;
pub use retry::{RetryConfig, RetryPolicy};
