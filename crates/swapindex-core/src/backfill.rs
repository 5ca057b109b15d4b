//! Fills USD values of swaps committed while their price was unavailable.

use crate::error::IndexerError;
use crate::price::{PriceOracle, PriceResolution};
use crate::store::SwapStore;

/// Counts of one backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub examined: usize,
    pub filled: usize,
    pub still_unpriced: usize,
}

/// Walks every swap with a null USD value, `batch` at a time in natural key
/// order, and fills each one whose price now resolves. Swaps that stay
/// unresolved are stepped over, so they never block later ones. Existing
/// values are never overwritten. Leaves stay valid since the USD value is not
/// part of the merkle leaf.
pub async fn backfill_usd<S: SwapStore + ?Sized>(
    store: &S,
    oracle: &PriceOracle,
    batch: usize,
) -> Result<BackfillReport, IndexerError> {
    let batch = batch.max(1);
    let mut report = BackfillReport::default();
    let mut after = None;
    loop {
        let page = store.unpriced_events(after, batch).await?;
        let short = page.len() < batch;
        for ev in &page {
            report.examined += 1;
            match oracle.usd_value(&ev.token_in, ev.height, ev.block_time).await {
                PriceResolution::Resolved(value) => {
                    if store.fill_usd_value(ev.key(), &value).await? {
                        report.filled += 1;
                    }
                }
                PriceResolution::Unresolved(reason) => {
                    tracing::debug!(key = %ev.key(), reason = %reason, "still unpriced");
                    report.still_unpriced += 1;
                }
            }
        }
        match page.last() {
            Some(last) if !short => after = Some(last.key()),
            _ => break,
        }
    }
    tracing::info!(
        examined = report.examined,
        filled = report.filled,
        still_unpriced = report.still_unpriced,
        "usd backfill pass complete"
    );
    Ok(report)
}
