//! Clock backed by the tokio timer.
//!
//! Reads `base_ms + elapsed`. Under a paused runtime the elapsed part only
//! moves when the loop sleeps, which makes scenario runs deterministic.

use std::time::Duration;

use tgate_core::Clock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    base_ms: u64,
}

impl TokioClock {
    /// Clock reading `base_ms` right now.
    pub fn new(base_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            base_ms,
        }
    }

    /// Clock anchored at the current wall-clock epoch time.
    pub fn wall() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self::new(u64::try_from(now).unwrap_or(0))
    }

    /// Sleep until the clock reads `at_ms`. Returns at once if it already does.
    pub async fn sleep_until(&self, at_ms: u64) {
        let offset = at_ms.saturating_sub(self.base_ms);
        tokio::time::sleep_until(self.origin + Duration::from_millis(offset)).await;
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_ms.saturating_add(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paused_clock_moves_only_when_sleeping() {
        let clock = TokioClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.sleep_until(6_000).await;
        assert_eq!(clock.now_ms(), 6_000);
        clock.sleep_until(2_000).await;
        assert_eq!(clock.now_ms(), 6_000);
    }
}
