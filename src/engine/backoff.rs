use std::time::Duration;

/// Capped exponential backoff, `floor * 2^level` up to `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap: cap.max(floor),
        }
    }

    /// Delay before the retry at the given level, starting from zero.
    pub fn delay(&self, level: u32) -> Duration {
        self.floor
            .saturating_mul(2u32.saturating_pow(level))
            .min(self.cap)
    }
}
