//! swapindex-storage: persistent storage backends for swapindex.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//! - the in-memory [`MemoryStore`] lives in `swapindex-core`

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use swapindex_core::store::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
