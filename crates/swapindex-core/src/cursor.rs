//! Scan cursor: the persisted "everything up to here is committed" marker.

use serde::{Deserialize, Serialize};

/// The scanner's durable position on chain.
///
/// Every height in `start_height..=last_completed_height` has been committed
/// together with its swaps (possibly none). A fresh cursor sits at
/// `start_height - 1`, so the first processed height is `start_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// First height this index covers.
    pub start_height: u64,
    /// Highest height whose commit has completed.
    pub last_completed_height: u64,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

impl ScanCursor {
    /// Cursor for an index that has not committed anything yet.
    pub fn genesis(start_height: u64) -> Self {
        Self {
            start_height,
            last_completed_height: start_height.saturating_sub(1),
            updated_at: 0,
        }
    }

    /// Cursor positioned right after `height` was committed.
    pub fn at(start_height: u64, height: u64) -> Self {
        Self {
            start_height,
            last_completed_height: height,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The cursor that results from committing `height`.
    pub fn advanced_to(&self, height: u64) -> Self {
        Self::at(self.start_height, height)
    }

    /// Next height to process.
    pub fn next_height(&self) -> u64 {
        self.last_completed_height + 1
    }

    /// `true` once at least one height has been committed.
    pub fn has_progress(&self) -> bool {
        self.last_completed_height >= self.start_height
    }

    /// `true` if `height` lies inside the committed range.
    pub fn covers(&self, height: u64) -> bool {
        height >= self.start_height && height <= self.last_completed_height
    }
}

/// Highest height that may be processed given the current tip and the
/// number of confirmations to wait for.
pub fn confirmed_tip(tip: u64, confirmation_depth: u64) -> u64 {
    tip.saturating_sub(confirmation_depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_cursor() {
        let c = ScanCursor::genesis(17777000);
        assert_eq!(c.last_completed_height, 17776999);
        assert_eq!(c.next_height(), 17777000);
        assert!(!c.has_progress());
        assert!(!c.covers(17777000));
    }

    #[test]
    fn advance_and_cover() {
        let c = ScanCursor::genesis(100).advanced_to(100).advanced_to(101);
        assert_eq!(c.next_height(), 102);
        assert!(c.has_progress());
        assert!(c.covers(100) && c.covers(101));
        assert!(!c.covers(99) && !c.covers(102));
        assert!(c.updated_at > 0);
    }

    #[test]
    fn confirmation_depth() {
        assert_eq!(confirmed_tip(112, 12), 100);
        assert_eq!(confirmed_tip(5, 12), 0);
        assert_eq!(confirmed_tip(50, 0), 50);
    }
}
