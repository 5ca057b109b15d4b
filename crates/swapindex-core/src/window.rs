//! Merkle windows: fixed height ranges sealed under a single root.
//!
//! Window `w` covers `[origin + w * size, origin + (w + 1) * size - 1]`.
//! It is built exactly once, after the cursor has passed its last height,
//! and is never rebuilt differently: a stored window whose rebuild yields a
//! different root means the committed swaps changed underneath it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cursor::ScanCursor;
use crate::error::IndexerError;
use crate::merkle::{self, NodeHash, ProofStep};
use crate::store::IndexStore;
use crate::types::{NaturalKey, SwapEvent};

/// Window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// First height of window 0.
    pub origin: u64,
    /// Heights per window.
    pub size: u64,
}

impl WindowSpec {
    pub fn new(origin: u64, size: u64) -> Self {
        Self { origin, size }
    }

    /// Window containing `height`, if it lies at or after the origin.
    pub fn window_of(&self, height: u64) -> Option<u64> {
        if height < self.origin || self.size == 0 {
            return None;
        }
        Some((height - self.origin) / self.size)
    }

    /// Inclusive height range of window `id`.
    pub fn range(&self, id: u64) -> (u64, u64) {
        let start = self.origin + id * self.size;
        (start, start + self.size - 1)
    }
}

/// A sealed window: the leaves of every swap in its range and their root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleWindow {
    pub window_id: u64,
    pub start_height: u64,
    pub end_height: u64,
    /// Leaf hashes in natural-key order.
    pub leaf_hashes: Vec<NodeHash>,
    pub root: NodeHash,
    /// Unix timestamp of construction.
    pub built_at: i64,
}

impl MerkleWindow {
    /// Build window `id` from its (ordered) events.
    pub fn build(spec: &WindowSpec, id: u64, events: &[SwapEvent]) -> Self {
        let (start_height, end_height) = spec.range(id);
        let leaf_hashes: Vec<NodeHash> = events.iter().map(merkle::leaf_hash).collect();
        let root = merkle::merkle_root(&leaf_hashes);
        Self {
            window_id: id,
            start_height,
            end_height,
            leaf_hashes,
            root,
            built_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_hashes.is_empty()
    }
}

/// Inclusion proof of one swap in its window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub key: NaturalKey,
    pub window_id: u64,
    pub leaf_index: usize,
    pub leaf_hash: NodeHash,
    pub path: Vec<ProofStep>,
    pub root: NodeHash,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        merkle::verify_proof(&self.leaf_hash, &self.path, &self.root)
    }
}

// ─── MerkleIndex ─────────────────────────────────────────────────────────────

/// Builds windows as the cursor advances and serves proofs from them.
#[derive(Clone)]
pub struct MerkleIndex {
    store: Arc<dyn IndexStore>,
    spec: WindowSpec,
}

impl MerkleIndex {
    pub fn new(store: Arc<dyn IndexStore>, spec: WindowSpec) -> Self {
        Self { store, spec }
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Build and persist every window whose end height the cursor has
    /// reached and that is not stored yet, in window order.
    pub async fn build_ready_windows(
        &self,
        cursor: &ScanCursor,
    ) -> Result<Vec<MerkleWindow>, IndexerError> {
        let mut next_id = match self.store.latest_window().await? {
            Some(w) => w.window_id + 1,
            None => 0,
        };
        let mut built = Vec::new();
        loop {
            let (start, end) = self.spec.range(next_id);
            if end > cursor.last_completed_height || start < cursor.start_height {
                break;
            }
            let events = self.store.read_events_in_range(start, end).await?;
            let window = MerkleWindow::build(&self.spec, next_id, &events);
            self.store.save_window(&window).await?;
            tracing::info!(
                window_id = window.window_id,
                start_height = start,
                end_height = end,
                leaves = window.leaf_count(),
                root = %window.root,
                "merkle window sealed"
            );
            built.push(window);
            next_id += 1;
        }
        Ok(built)
    }

    /// Rebuild window `id` from the stored swaps and compare roots.
    pub async fn audit_window(&self, id: u64) -> Result<MerkleWindow, IndexerError> {
        let stored = self
            .store
            .load_window(id)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("window {id}")))?;
        let events = self
            .store
            .read_events_in_range(stored.start_height, stored.end_height)
            .await?;
        let rebuilt = MerkleWindow::build(&self.spec, id, &events);
        if rebuilt.root != stored.root {
            return Err(IndexerError::ConsistencyViolation(format!(
                "window {id} rebuilds to root {} but {} is stored",
                rebuilt.root, stored.root
            )));
        }
        Ok(stored)
    }

    /// Inclusion proof for the swap at `key`.
    pub async fn get_proof(&self, key: NaturalKey) -> Result<MerkleProof, IndexerError> {
        let window_id = self
            .spec
            .window_of(key.height)
            .ok_or_else(|| IndexerError::NotFound(format!("height {} precedes the index", key.height)))?;
        let window = self
            .store
            .load_window(window_id)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("window {window_id} is not sealed yet")))?;
        let event = self
            .store
            .read_event(key)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("swap {key}")))?;

        let leaf_hash = merkle::leaf_hash(&event);
        let leaf_index = window
            .leaf_hashes
            .iter()
            .position(|h| *h == leaf_hash)
            .ok_or_else(|| {
                IndexerError::ConsistencyViolation(format!(
                    "swap {key} is stored but not a leaf of window {window_id}"
                ))
            })?;
        let path = merkle::proof_path(&window.leaf_hashes, leaf_index).ok_or_else(|| {
            IndexerError::ConsistencyViolation(format!("leaf {leaf_index} outside window {window_id}"))
        })?;
        Ok(MerkleProof {
            key,
            window_id,
            leaf_index,
            leaf_hash,
            path,
            root: window.root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SwapStore, WindowStore};
    use crate::types::Coin;

    fn swap(height: u64, event_index: u32) -> SwapEvent {
        SwapEvent {
            height,
            tx_index: 0,
            event_index,
            pool_id: 1,
            sender: "osmo1abc".into(),
            token_in: Coin::new(100u32 + event_index, "uosmo"),
            token_out: None,
            usd_value: None,
            block_time: None,
        }
    }

    async fn commit_range(store: &MemoryStore, start: u64, from: u64, to: u64) -> ScanCursor {
        let mut cursor = store.read_cursor(start).await.unwrap();
        for h in from..=to {
            let events: Vec<_> = if h % 2 == 0 { vec![swap(h, 0), swap(h, 1)] } else { vec![] };
            cursor = cursor.advanced_to(h);
            store.commit_height(h, &events, &cursor).await.unwrap();
        }
        cursor
    }

    #[test]
    fn geometry() {
        let spec = WindowSpec::new(100, 10);
        assert_eq!(spec.range(0), (100, 109));
        assert_eq!(spec.range(3), (130, 139));
        assert_eq!(spec.window_of(99), None);
        assert_eq!(spec.window_of(100), Some(0));
        assert_eq!(spec.window_of(139), Some(3));
        assert_eq!(spec.window_of(140), Some(4));
    }

    #[tokio::test]
    async fn builds_only_complete_windows() {
        let store = Arc::new(MemoryStore::new());
        let index = MerkleIndex::new(store.clone(), WindowSpec::new(100, 10));

        let cursor = commit_range(&store, 100, 100, 115).await;
        let built = index.build_ready_windows(&cursor).await.unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].leaf_count(), 10);

        let again = index.build_ready_windows(&cursor).await.unwrap();
        assert!(again.is_empty());

        let cursor = commit_range(&store, 100, 116, 129).await;
        let built = index.build_ready_windows(&cursor).await.unwrap();
        let ids: Vec<_> = built.iter().map(|w| w.window_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.latest_window().await.unwrap().unwrap().window_id, 2);
    }

    #[tokio::test]
    async fn every_swap_has_a_valid_proof() {
        let store = Arc::new(MemoryStore::new());
        let index = MerkleIndex::new(store.clone(), WindowSpec::new(100, 10));
        let cursor = commit_range(&store, 100, 100, 109).await;
        index.build_ready_windows(&cursor).await.unwrap();

        for ev in store.read_events_in_range(100, 109).await.unwrap() {
            let proof = index.get_proof(ev.key()).await.unwrap();
            assert_eq!(proof.window_id, 0);
            assert!(proof.verify());
        }
    }

    #[tokio::test]
    async fn tampered_proof_fails() {
        let store = Arc::new(MemoryStore::new());
        let index = MerkleIndex::new(store.clone(), WindowSpec::new(100, 10));
        let cursor = commit_range(&store, 100, 100, 109).await;
        index.build_ready_windows(&cursor).await.unwrap();

        let mut proof = index.get_proof(NaturalKey::new(104, 0, 1)).await.unwrap();
        proof.leaf_hash.0[5] ^= 0x01;
        assert!(!proof.verify());
    }

    #[tokio::test]
    async fn empty_window_has_zero_root() {
        let store = Arc::new(MemoryStore::new());
        let index = MerkleIndex::new(store.clone(), WindowSpec::new(101, 1));
        let cursor = commit_range(&store, 101, 101, 101).await;
        let built = index.build_ready_windows(&cursor).await.unwrap();
        assert_eq!(built[0].root, NodeHash::ZERO);
        assert!(built[0].is_empty());
    }

    #[tokio::test]
    async fn proof_misses_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let index = MerkleIndex::new(store.clone(), WindowSpec::new(100, 10));
        let cursor = commit_range(&store, 100, 100, 105).await;
        index.build_ready_windows(&cursor).await.unwrap();

        assert!(matches!(
            index.get_proof(NaturalKey::new(104, 0, 0)).await,
            Err(IndexerError::NotFound(_))
        ));
        assert!(matches!(
            index.get_proof(NaturalKey::new(50, 0, 0)).await,
            Err(IndexerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_detects_changed_root() {
        let store = Arc::new(MemoryStore::new());
        let spec = WindowSpec::new(100, 10);
        let index = MerkleIndex::new(store.clone(), spec);
        let cursor = commit_range(&store, 100, 100, 109).await;

        let mut forged = MerkleWindow::build(&spec, 0, &[]);
        forged.root = NodeHash([7u8; 32]);
        store.save_window(&forged).await.unwrap();

        assert!(matches!(
            index.audit_window(0).await,
            Err(IndexerError::ConsistencyViolation(_))
        ));
        assert!(index.build_ready_windows(&cursor).await.unwrap().is_empty());
    }
}
