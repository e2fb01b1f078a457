use embassy_time::{Duration, Instant};

/// Periodic trigger polled from the main loop.
///
/// The next deadline is taken relative to the `check` call that fired, so a
/// late check pushes every following deadline back by the same amount.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    duration: Duration,
    deadline: Instant,
}

impl IntervalTimer {
    /// First fires one full `duration` after `now`.
    pub fn new(duration: Duration, now: Instant) -> Self {
        Self {
            duration,
            deadline: now + duration,
        }
    }

    /// First fires on the very first check.
    pub fn immediate(duration: Duration, now: Instant) -> Self {
        Self {
            duration,
            deadline: now,
        }
    }

    /// Returns true once the deadline has passed and re-arms the timer.
    pub fn check(&mut self, now: Instant) -> bool {
        if now < self.deadline {
            return false;
        }
        self.deadline = now + self.duration;
        true
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}
