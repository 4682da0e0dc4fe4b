use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Fixed wall-clock budget for a whole run, divided across the sources that
/// have not started yet.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    total: Duration,
    started: Instant,
    min_slice: Duration,
    max_slice: Duration,
}

impl TimeBudget {
    pub fn new(total: Duration, min_slice: Duration, max_slice: Duration) -> Self {
        Self {
            total,
            started: Instant::now(),
            min_slice,
            max_slice: max_slice.max(min_slice),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    /// Time for the next group of workers when `pending_groups` groups
    /// (including this one) are still to run. `None` once less than the
    /// minimum slice is left.
    pub fn slice_for(&self, pending_groups: usize) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining < self.min_slice {
            return None;
        }
        let share = remaining / pending_groups.max(1) as u32;
        Some(share.clamp(self.min_slice, self.max_slice).min(remaining))
    }

    pub fn log_status(&self) {
        info!(
            elapsed_secs = self.elapsed().as_secs(),
            remaining_secs = self.remaining().as_secs(),
            total_secs = self.total.as_secs(),
            "Time budget status"
        );
    }
}
