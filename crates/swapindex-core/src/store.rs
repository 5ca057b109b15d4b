//! Idempotent persistence of swaps, the scan cursor and merkle windows.
//!
//! A height is committed together with its swaps and the advanced cursor in
//! one atomic step. Committing the same height twice with the same swaps is
//! a no-op; committing different on-chain content for an existing key is a
//! [`IndexerError::ConsistencyViolation`].
//!
//! Each backend keeps a commit watermark, the highest height ever committed.
//! It survives [`SwapStore::reset_cursor`], so a re-scan of a height that was
//! committed empty cannot add swaps under an already sealed window.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::cursor::ScanCursor;
use crate::error::IndexerError;
use crate::types::{NaturalKey, SwapEvent};
use crate::window::MerkleWindow;

/// What a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Swaps written for the first time.
    pub inserted: usize,
    /// Swaps that were already stored identically.
    pub unchanged: usize,
    /// Existing swaps whose null derived fields were filled.
    pub filled: usize,
}

/// Storage of swaps and the scan cursor.
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Atomically upsert `events` (all at `height`) and move the cursor.
    async fn commit_height(
        &self,
        height: u64,
        events: &[SwapEvent],
        new_cursor: &ScanCursor,
    ) -> Result<CommitOutcome, IndexerError>;

    /// Stored cursor, or a fresh one positioned before `start_height`.
    async fn read_cursor(&self, start_height: u64) -> Result<ScanCursor, IndexerError>;

    /// Swaps with `start <= height <= end`, ordered by natural key.
    async fn read_events_in_range(&self, start: u64, end: u64)
        -> Result<Vec<SwapEvent>, IndexerError>;

    async fn read_event(&self, key: NaturalKey) -> Result<Option<SwapEvent>, IndexerError>;

    /// Administrative overwrite of the cursor. Stored swaps are kept.
    async fn reset_cursor(&self, cursor: &ScanCursor) -> Result<(), IndexerError>;

    /// Up to `limit` swaps without a USD value whose key is greater than
    /// `after`, ordered by natural key.
    async fn unpriced_events(
        &self,
        after: Option<NaturalKey>,
        limit: usize,
    ) -> Result<Vec<SwapEvent>, IndexerError>;

    /// Sets the USD value of `key` if it is still null. Returns whether a
    /// write happened.
    async fn fill_usd_value(&self, key: NaturalKey, value: &BigDecimal)
        -> Result<bool, IndexerError>;
}

/// Append-only storage of sealed merkle windows.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Insert if absent. An existing window with another root is a
    /// consistency violation; the same root is a no-op.
    async fn save_window(&self, window: &MerkleWindow) -> Result<(), IndexerError>;

    async fn load_window(&self, window_id: u64) -> Result<Option<MerkleWindow>, IndexerError>;

    async fn latest_window(&self) -> Result<Option<MerkleWindow>, IndexerError>;
}

/// A backend providing both stores.
pub trait IndexStore: SwapStore + WindowStore {}

impl<T: SwapStore + WindowStore + ?Sized> IndexStore for T {}

// ─── Commit rules shared by all backends ─────────────────────────────────────

/// Checks a commit request against the stored cursor.
pub fn validate_commit(
    height: u64,
    events: &[SwapEvent],
    new_cursor: &ScanCursor,
    stored: &ScanCursor,
) -> Result<(), IndexerError> {
    if new_cursor.last_completed_height != height {
        return Err(IndexerError::ConsistencyViolation(format!(
            "commit of height {height} carries cursor {}",
            new_cursor.last_completed_height
        )));
    }
    if height < stored.start_height {
        return Err(IndexerError::ConsistencyViolation(format!(
            "height {height} precedes start height {}",
            stored.start_height
        )));
    }
    if height > stored.next_height() {
        return Err(IndexerError::ConsistencyViolation(format!(
            "commit of height {height} would leave a gap after {}",
            stored.last_completed_height
        )));
    }
    let mut seen = BTreeSet::new();
    for ev in events {
        if ev.height != height {
            return Err(IndexerError::ConsistencyViolation(format!(
                "swap {} committed under height {height}",
                ev.key()
            )));
        }
        if !seen.insert(ev.key()) {
            return Err(IndexerError::ConsistencyViolation(format!(
                "swap {} appears twice in one commit",
                ev.key()
            )));
        }
    }
    Ok(())
}

/// Whether `height` was committed before, given the backend's watermark.
pub fn was_committed(height: u64, committed_through: Option<u64>) -> bool {
    committed_through.is_some_and(|w| height <= w)
}

/// Checks that re-committed swaps of a height match what is stored.
///
/// For a height committed before, the incoming set must have exactly the
/// same keys and on-chain content, including when nothing is stored.
pub fn check_recommit(
    height: u64,
    recommit: bool,
    existing: &[SwapEvent],
    incoming: &[SwapEvent],
) -> Result<(), IndexerError> {
    if !recommit && existing.is_empty() {
        return Ok(());
    }
    let stored: BTreeMap<NaturalKey, &SwapEvent> = existing.iter().map(|e| (e.key(), e)).collect();
    let fresh: BTreeMap<NaturalKey, &SwapEvent> = incoming.iter().map(|e| (e.key(), e)).collect();
    if stored.len() != fresh.len() || !stored.keys().eq(fresh.keys()) {
        return Err(IndexerError::ConsistencyViolation(format!(
            "height {height} re-scanned with {} swaps but {} are stored",
            fresh.len(),
            stored.len()
        )));
    }
    for (key, old) in &stored {
        let new = fresh[key];
        if !old.same_raw_content(new) {
            return Err(IndexerError::ConsistencyViolation(format!(
                "swap {key} changed content on re-scan"
            )));
        }
    }
    Ok(())
}

/// The cursor to persist after a successful commit: never moves backwards.
pub fn merged_cursor(stored: &ScanCursor, new_cursor: &ScanCursor) -> ScanCursor {
    if new_cursor.last_completed_height >= stored.last_completed_height {
        ScanCursor {
            start_height: stored.start_height,
            ..*new_cursor
        }
    } else {
        ScanCursor {
            updated_at: new_cursor.updated_at,
            ..*stored
        }
    }
}

// ─── In-memory store ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    cursor: Option<ScanCursor>,
    committed_through: Option<u64>,
    events: BTreeMap<NaturalKey, SwapEvent>,
    windows: BTreeMap<u64, MerkleWindow>,
}

/// In-memory store for tests and ephemeral runs. One lock guards every
/// commit, so commits are atomic and linearized.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored swaps.
    pub fn event_count(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn commit_height(
        &self,
        height: u64,
        events: &[SwapEvent],
        new_cursor: &ScanCursor,
    ) -> Result<CommitOutcome, IndexerError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .cursor
            .unwrap_or_else(|| ScanCursor::genesis(new_cursor.start_height));
        validate_commit(height, events, new_cursor, &stored)?;

        let lo = NaturalKey::new(height, 0, 0);
        let hi = NaturalKey::new(height, u32::MAX, u32::MAX);
        let existing: Vec<SwapEvent> = state.events.range(lo..=hi).map(|(_, e)| e.clone()).collect();
        check_recommit(height, was_committed(height, state.committed_through), &existing, events)?;

        let mut outcome = CommitOutcome::default();
        for ev in events {
            match state.events.get_mut(&ev.key()) {
                None => {
                    state.events.insert(ev.key(), ev.clone());
                    outcome.inserted += 1;
                }
                Some(old) => {
                    let mut filled = false;
                    if old.usd_value.is_none() && ev.usd_value.is_some() {
                        old.usd_value = ev.usd_value.clone();
                        filled = true;
                    }
                    if old.block_time.is_none() && ev.block_time.is_some() {
                        old.block_time = ev.block_time;
                        filled = true;
                    }
                    if filled {
                        outcome.filled += 1;
                    } else {
                        outcome.unchanged += 1;
                    }
                }
            }
        }
        state.cursor = Some(merged_cursor(&stored, new_cursor));
        state.committed_through = Some(state.committed_through.map_or(height, |w| w.max(height)));
        Ok(outcome)
    }

    async fn read_cursor(&self, start_height: u64) -> Result<ScanCursor, IndexerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cursor
            .unwrap_or_else(|| ScanCursor::genesis(start_height)))
    }

    async fn read_events_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<SwapEvent>, IndexerError> {
        if start > end {
            return Ok(Vec::new());
        }
        let lo = NaturalKey::new(start, 0, 0);
        let hi = NaturalKey::new(end, u32::MAX, u32::MAX);
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .range(lo..=hi)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn read_event(&self, key: NaturalKey) -> Result<Option<SwapEvent>, IndexerError> {
        Ok(self.state.lock().unwrap().events.get(&key).cloned())
    }

    async fn reset_cursor(&self, cursor: &ScanCursor) -> Result<(), IndexerError> {
        self.state.lock().unwrap().cursor = Some(*cursor);
        Ok(())
    }

    async fn unpriced_events(
        &self,
        after: Option<NaturalKey>,
        limit: usize,
    ) -> Result<Vec<SwapEvent>, IndexerError> {
        let state = self.state.lock().unwrap();
        let from = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(state
            .events
            .range((from, Bound::Unbounded))
            .map(|(_, e)| e)
            .filter(|e| e.usd_value.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fill_usd_value(
        &self,
        key: NaturalKey,
        value: &BigDecimal,
    ) -> Result<bool, IndexerError> {
        let mut state = self.state.lock().unwrap();
        match state.events.get_mut(&key) {
            Some(ev) if ev.usd_value.is_none() => {
                ev.usd_value = Some(value.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(IndexerError::NotFound(format!("swap {key}"))),
        }
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn save_window(&self, window: &MerkleWindow) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.windows.get(&window.window_id) {
            if existing.root != window.root {
                return Err(IndexerError::ConsistencyViolation(format!(
                    "window {} already sealed with root {}, rebuild gave {}",
                    window.window_id, existing.root, window.root
                )));
            }
            return Ok(());
        }
        state.windows.insert(window.window_id, window.clone());
        Ok(())
    }

    async fn load_window(&self, window_id: u64) -> Result<Option<MerkleWindow>, IndexerError> {
        Ok(self.state.lock().unwrap().windows.get(&window_id).cloned())
    }

    async fn latest_window(&self) -> Result<Option<MerkleWindow>, IndexerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .windows
            .values()
            .next_back()
            .cloned())
    }
}
