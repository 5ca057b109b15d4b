//! Minimum spacing between successive upstream calls.
//!
//! Public archive endpoints throttle aggressively, so every fetch (tip
//! queries included) goes through one pacer that keeps calls at least
//! `min_interval` apart.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct FetchPacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl FetchPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Reserves the next call slot and returns how long to wait for it.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = self.next_slot.lock().unwrap();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }

    /// Waits until the next call may go out.
    pub async fn pace(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced() {
        let pacer = FetchPacer::new(Duration::from_millis(500));
        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_millis(1));
        pacer.pace().await;
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_towards_interval() {
        let pacer = FetchPacer::new(Duration::from_millis(500));
        pacer.pace().await;
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(pacer.reserve(), Duration::ZERO);
    }

    #[test]
    fn zero_interval_never_waits() {
        let pacer = FetchPacer::new(Duration::ZERO);
        assert_eq!(pacer.reserve(), Duration::ZERO);
        assert_eq!(pacer.reserve(), Duration::ZERO);
    }
}
