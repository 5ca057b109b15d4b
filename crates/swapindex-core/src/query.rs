//! Read-only query surface over a committed index.

use std::sync::Arc;

use crate::error::IndexerError;
use crate::store::IndexStore;
use crate::types::{NaturalKey, SwapEvent};
use crate::window::{MerkleIndex, MerkleProof, MerkleWindow, WindowSpec};

/// Serves swaps, proofs and progress. Never observes uncommitted heights:
/// ranges are clamped to the cursor.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn IndexStore>,
    index: MerkleIndex,
    start_height: u64,
}

impl QueryService {
    pub fn new(store: Arc<dyn IndexStore>, spec: WindowSpec) -> Self {
        Self {
            index: MerkleIndex::new(Arc::clone(&store), spec),
            start_height: spec.origin,
            store,
        }
    }

    /// Last committed height.
    pub async fn cursor(&self) -> Result<u64, IndexerError> {
        Ok(self
            .store
            .read_cursor(self.start_height)
            .await?
            .last_completed_height)
    }

    /// Committed swaps with `from <= height <= to`, in chain order. `to` is
    /// clamped to the cursor.
    pub async fn events(&self, from: u64, to: u64) -> Result<Vec<SwapEvent>, IndexerError> {
        if from > to {
            return Err(IndexerError::Config(format!("invalid range {from}..={to}")));
        }
        let to = to.min(self.cursor().await?);
        if from > to {
            return Ok(Vec::new());
        }
        self.store.read_events_in_range(from, to).await
    }

    pub async fn event(&self, key: NaturalKey) -> Result<SwapEvent, IndexerError> {
        self.store
            .read_event(key)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("swap {key}")))
    }

    pub async fn proof(&self, key: NaturalKey) -> Result<MerkleProof, IndexerError> {
        self.index.get_proof(key).await
    }

    pub async fn window(&self, window_id: u64) -> Result<MerkleWindow, IndexerError> {
        self.store
            .load_window(window_id)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("window {window_id}")))
    }

    pub async fn latest_window(&self) -> Result<Option<MerkleWindow>, IndexerError> {
        self.store.latest_window().await
    }

    /// Rebuilds a stored window from its swaps and checks the root.
    pub async fn audit_window(&self, window_id: u64) -> Result<MerkleWindow, IndexerError> {
        self.index.audit_window(window_id).await
    }
}
