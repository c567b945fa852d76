use std::time::Duration;

/// Process-wide wait imposed after provider rate limiting.
///
/// Each rate-limit signal doubles the wait, starting from `floor`, with no
/// ceiling. A fully successful cycle resets it to zero.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    wait: Duration,
}

impl Backoff {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            wait: Duration::ZERO,
        }
    }

    /// Record a rate-limit signal and return the new wait.
    pub fn on_rate_limit(&mut self) -> Duration {
        self.wait = self.floor.max(self.wait.saturating_mul(2));
        self.wait
    }

    pub fn reset(&mut self) {
        self.wait = Duration::ZERO;
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn wait_minutes(&self) -> u64 {
        self.wait.as_secs() / 60
    }
}
