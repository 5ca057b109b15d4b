//! The chain scanner: drives the index forward one height at a time.
//!
//! For every height after the cursor, in strictly increasing order:
//!
//! ```text
//! Idle → Fetching(h) → Extracting(h) → Pricing(h) → Committing(h) → Idle(h+1)
//! ```
//!
//! The cursor only moves inside the atomic commit, so a crash at any point
//! resumes at the first uncommitted height. Once the confirmed tip is
//! reached the scanner re-reads it; in follow mode it then polls every
//! `poll_interval_ms` until shut down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::cursor::{confirmed_tip, ScanCursor};
use crate::error::IndexerError;
use crate::extractor;
use crate::fetcher::{BlockFetcher, FetchError};
use crate::indexer::{IndexerConfig, ResumeFrom, ScanMode, ScannerState};
use crate::policy::{FetchPacer, RetryPolicy};
use crate::price::{PriceOracle, PriceResolution};
use crate::store::IndexStore;
use crate::types::{BlockResults, SwapEvent};
use crate::window::MerkleIndex;

/// Summary of a scanner run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Cursor position when the run started.
    pub resumed_after: u64,
    /// Cursor position when the run ended.
    pub last_completed_height: u64,
    pub heights_processed: u64,
    pub events_committed: u64,
    /// Swaps committed with a null USD value.
    pub events_unpriced: u64,
    pub windows_built: u64,
}

/// Sequential scanner over a [`BlockFetcher`].
pub struct ChainScanner {
    config: IndexerConfig,
    fetcher: Arc<dyn BlockFetcher>,
    oracle: Arc<PriceOracle>,
    store: Arc<dyn IndexStore>,
    index: MerkleIndex,
    fetch_retry: RetryPolicy,
    commit_retry: RetryPolicy,
    pacer: FetchPacer,
    state: ScannerState,
    shutdown: watch::Receiver<bool>,
}

impl ChainScanner {
    pub fn new(
        config: IndexerConfig,
        fetcher: Arc<dyn BlockFetcher>,
        oracle: Arc<PriceOracle>,
        store: Arc<dyn IndexStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let index = MerkleIndex::new(Arc::clone(&store), config.window_spec());
        Ok(Self {
            fetch_retry: RetryPolicy::new(config.fetch_retry()),
            commit_retry: RetryPolicy::new(config.commit_retry()),
            pacer: FetchPacer::new(config.min_fetch_interval()),
            state: ScannerState::Idle {
                next_height: config.start_height,
            },
            config,
            fetcher,
            oracle,
            store,
            index,
            shutdown,
        })
    }

    pub fn state(&self) -> ScannerState {
        self.state.clone()
    }

    pub fn merkle_index(&self) -> &MerkleIndex {
        &self.index
    }

    /// Run until the bounded range is complete, shutdown is signalled, or a
    /// fatal error occurs. Fatal errors leave the cursor at the last
    /// committed height.
    pub async fn run(&mut self, resume: ResumeFrom) -> Result<ScanReport, IndexerError> {
        let mut report = ScanReport::default();
        match self.scan(resume, &mut report).await {
            Ok(()) => {
                self.set_state(ScannerState::Stopped);
                tracing::info!(
                    last_completed = report.last_completed_height,
                    heights = report.heights_processed,
                    events = report.events_committed,
                    unpriced = report.events_unpriced,
                    windows = report.windows_built,
                    "scanner stopped"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(ScannerState::Halted(e.to_string()));
                tracing::error!(
                    error = %e,
                    last_completed = report.last_completed_height,
                    "scanner halted"
                );
                Err(e)
            }
        }
    }

    async fn scan(&mut self, resume: ResumeFrom, report: &mut ScanReport) -> Result<(), IndexerError> {
        let mut cursor = self.resolve_cursor(resume).await?;
        report.resumed_after = cursor.last_completed_height;
        report.last_completed_height = cursor.last_completed_height;

        // Windows left unsealed by a crash between commit and build.
        report.windows_built += self.index.build_ready_windows(&cursor).await?.len() as u64;

        tracing::info!(
            chain = %self.config.chain,
            indexer = %self.config.id,
            next_height = cursor.next_height(),
            mode = ?self.config.mode,
            "scanner starting"
        );

        let mut tip = 0u64;
        let mut caught_up = false;
        loop {
            if self.shutdown_requested() {
                tracing::info!("shutdown requested");
                return Ok(());
            }
            if let ScanMode::BoundedRange { end_height } = self.config.mode {
                if cursor.last_completed_height >= end_height {
                    tracing::info!(end_height, "bounded range complete");
                    return Ok(());
                }
            }

            let next = cursor.next_height();
            if next > tip {
                tip = self.confirmed_tip().await?;
                if next > tip {
                    if !caught_up {
                        caught_up = true;
                        tracing::info!(at = cursor.last_completed_height, tip, "caught up with chain tip");
                    }
                    self.set_state(ScannerState::Following);
                    if self.sleep_or_shutdown(self.config.poll_interval()).await {
                        tracing::info!("shutdown requested");
                        return Ok(());
                    }
                    continue;
                }
            }

            cursor = self.process_height(next, &cursor, report).await?;
        }
    }

    async fn resolve_cursor(&self, resume: ResumeFrom) -> Result<ScanCursor, IndexerError> {
        let stored = self.store.read_cursor(self.config.start_height).await?;
        match resume {
            ResumeFrom::Persisted => {
                if stored.has_progress() {
                    tracing::info!(
                        last_completed = stored.last_completed_height,
                        "resuming from persisted cursor"
                    );
                }
                Ok(stored)
            }
            ResumeFrom::Override(height) => {
                if height < stored.start_height {
                    return Err(IndexerError::Config(format!(
                        "resume height {height} precedes start height {}",
                        stored.start_height
                    )));
                }
                if height > stored.next_height() {
                    return Err(IndexerError::Config(format!(
                        "resume height {height} would skip heights after {}",
                        stored.last_completed_height
                    )));
                }
                if height < stored.next_height() {
                    tracing::warn!(
                        from = height,
                        committed_up_to = stored.last_completed_height,
                        "re-scanning committed heights"
                    );
                }
                Ok(ScanCursor {
                    last_completed_height: height - 1,
                    ..stored
                })
            }
        }
    }

    async fn process_height(
        &mut self,
        height: u64,
        cursor: &ScanCursor,
        report: &mut ScanReport,
    ) -> Result<ScanCursor, IndexerError> {
        self.set_state(ScannerState::Fetching(height));
        let block = self.fetch_block(height).await?;

        self.set_state(ScannerState::Extracting(height));
        let mut events = extractor::extract(height, &block)?;

        self.set_state(ScannerState::Pricing(height));
        let unpriced = self.price_events(&block, &mut events).await;

        self.set_state(ScannerState::Committing(height));
        let new_cursor = cursor.advanced_to(height);
        let outcome = self.commit(height, &events, &new_cursor).await?;
        let windows = self.index.build_ready_windows(&new_cursor).await?;

        report.heights_processed += 1;
        report.events_committed += events.len() as u64;
        report.events_unpriced += unpriced;
        report.windows_built += windows.len() as u64;
        report.last_completed_height = height;

        if events.is_empty() {
            tracing::debug!(height, "height committed, no swaps");
        } else {
            tracing::info!(
                height,
                swaps = events.len(),
                unpriced,
                inserted = outcome.inserted,
                unchanged = outcome.unchanged,
                "height committed"
            );
        }
        self.set_state(ScannerState::Idle {
            next_height: height + 1,
        });
        Ok(new_cursor)
    }

    async fn price_events(&self, block: &BlockResults, events: &mut [SwapEvent]) -> u64 {
        let mut unpriced = 0;
        for ev in events.iter_mut() {
            match self
                .oracle
                .usd_value(&ev.token_in, ev.height, block.timestamp)
                .await
            {
                PriceResolution::Resolved(v) => ev.usd_value = Some(v),
                PriceResolution::Unresolved(reason) => {
                    tracing::debug!(key = %ev.key(), denom = %ev.token_in.denom, reason = %reason, "swap left unpriced");
                    unpriced += 1;
                }
            }
        }
        unpriced
    }

    // ─── Upstream calls ──────────────────────────────────────────────────────

    async fn fetch_block(&self, height: u64) -> Result<BlockResults, IndexerError> {
        let fetcher = Arc::clone(&self.fetcher);
        let block = self
            .retry_fetch(height, || {
                let fetcher = Arc::clone(&fetcher);
                async move { fetcher.fetch_block_results(height).await }
            })
            .await
            .map_err(|(err, attempts)| match err {
                FetchError::Permanent(reason) => IndexerError::PermanentFetch { height, reason },
                FetchError::Transient(reason) => IndexerError::FetchExhausted {
                    height,
                    attempts,
                    reason,
                },
            })?;
        if block.height != height {
            return Err(IndexerError::PermanentFetch {
                height,
                reason: format!("node returned results for height {}", block.height),
            });
        }
        Ok(block)
    }

    async fn confirmed_tip(&self) -> Result<u64, IndexerError> {
        let fetcher = Arc::clone(&self.fetcher);
        let tip = self
            .retry_fetch(0, || {
                let fetcher = Arc::clone(&fetcher);
                async move { fetcher.latest_height().await }
            })
            .await
            .map_err(|(err, attempts)| IndexerError::TipUnavailable {
                attempts,
                reason: err.reason().to_string(),
            })?;
        Ok(confirmed_tip(tip, self.config.confirmation_depth))
    }

    /// Paces and retries `op` on transient errors. On failure returns the
    /// last error and the number of attempts made.
    async fn retry_fetch<T, F, Fut>(&self, height: u64, mut op: F) -> Result<T, (FetchError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut failures = 0u32;
        loop {
            self.pacer.pace().await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e @ FetchError::Permanent(_)) => return Err((e, failures + 1)),
                Err(e) => {
                    failures += 1;
                    match self.fetch_retry.delay_after(failures) {
                        Some(delay) => {
                            tracing::warn!(
                                height,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "transient fetch error, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err((e, failures)),
                    }
                }
            }
        }
    }

    async fn commit(
        &self,
        height: u64,
        events: &[SwapEvent],
        new_cursor: &ScanCursor,
    ) -> Result<crate::store::CommitOutcome, IndexerError> {
        let mut failures = 0u32;
        loop {
            match self.store.commit_height(height, events, new_cursor).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    match self.commit_retry.delay_after(failures) {
                        Some(delay) => {
                            tracing::warn!(height, attempt = failures, error = %e, "commit failed, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    fn set_state(&mut self, state: ScannerState) {
        if self.state != state {
            tracing::trace!(from = %self.state, to = %state, "scanner state");
            self.state = state;
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleeps for `duration`; returns `true` if shutdown was signalled.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown.changed() => match changed {
                Ok(()) => *self.shutdown.borrow(),
                // Sender gone: nobody can ask us to stop any more.
                Err(_) => {
                    tokio::time::sleep(duration).await;
                    false
                }
            },
        }
    }
}
