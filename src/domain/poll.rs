//! Receipt poll schedule.
//!
//! Delay grows with the number of indefinite answers: 5s for the first six,
//! 15s up to eighteen, 30s afterwards. A record past the wall-clock budget
//! or the attempt cap is failed regardless of the schedule.

use std::time::Duration;

use tokio::time::Instant;

/// Backoff schedule and timeout budget for the receipt poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub fast_interval: Duration,
    pub medium_interval: Duration,
    pub slow_interval: Duration,
    /// Attempts polled at `fast_interval`.
    pub fast_attempts: u32,
    /// Attempts (cumulative) polled before switching to `slow_interval`.
    pub medium_attempts: u32,
    /// Wall-clock budget for a single transaction.
    pub timeout: Duration,
    /// Hard cap on indefinite answers.
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(5),
            medium_interval: Duration::from_secs(15),
            slow_interval: Duration::from_secs(30),
            fast_attempts: 6,
            medium_attempts: 18,
            timeout: Duration::from_secs(600),
            max_attempts: 60,
        }
    }
}

impl PollSchedule {
    /// Delay before the next poll after `attempts` indefinite answers.
    pub const fn delay(&self, attempts: u32) -> Duration {
        if attempts < self.fast_attempts {
            self.fast_interval
        } else if attempts < self.medium_attempts {
            self.medium_interval
        } else {
            self.slow_interval
        }
    }

    /// Whether a record has exhausted its budget.
    pub fn is_expired(&self, attempts: u32, age: Duration) -> bool {
        attempts >= self.max_attempts || age >= self.timeout
    }
}

/// Ephemeral per-transaction poll state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollMeta {
    pub started_at: Instant,
    pub attempts: u32,
    pub next_poll_at: Instant,
}

impl PollMeta {
    /// Meta for a record first seen at `now`. The first poll is one fast
    /// interval out.
    pub fn new(now: Instant, schedule: &PollSchedule) -> Self {
        Self {
            started_at: now,
            attempts: 0,
            next_poll_at: now + schedule.delay(0),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_poll_at
    }

    /// Record an indefinite answer and reschedule.
    pub fn record_miss(&mut self, now: Instant, schedule: &PollSchedule) {
        self.attempts += 1;
        self.next_poll_at = now + schedule.delay(self.attempts);
    }
}
