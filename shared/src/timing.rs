//! Fixed-rate scheduling for simulate/publish loops

use std::time::{Duration, Instant};

/// Upper bound on simulation steps replayed after a stall
pub const MAX_CATCH_UP_STEPS: u32 = 8;

/// Period of a `hz` schedule; rates below 1 Hz are treated as 1 Hz
pub fn period_from_hz(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1.0))
}

/// Deadline tracker for one periodic activity
///
/// Simulation uses [`FixedRate::due_steps`] so missed ticks are replayed (up
/// to [`MAX_CATCH_UP_STEPS`]); publishing uses [`FixedRate::poll`] so missed
/// cycles are skipped and only the newest state goes out.
#[derive(Debug, Clone)]
pub struct FixedRate {
    period: Duration,
    next: Instant,
}

impl FixedRate {
    /// Schedule whose first slot is due at `start`
    pub fn new(hz: f64, start: Instant) -> Self {
        Self {
            period: period_from_hz(hz),
            next: start,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Forgets any backlog and restarts the schedule at `now`
    pub fn reset(&mut self, now: Instant) {
        self.next = now;
    }

    /// Number of fixed steps due at `now`
    pub fn due_steps(&mut self, now: Instant) -> u32 {
        let mut steps = 0;
        while now >= self.next {
            self.next += self.period;
            steps += 1;
            if steps == MAX_CATCH_UP_STEPS {
                if now >= self.next {
                    self.next = now + self.period;
                }
                break;
            }
        }
        steps
    }

    /// True at most once per period; missed cycles collapse into one
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }

    /// Time left until the next deadline
    pub fn until_next(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }
}
