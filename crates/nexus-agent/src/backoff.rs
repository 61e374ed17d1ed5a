//! Exponential backoff for hub reconnection

use std::time::Duration;

/// Initial reconnect delay
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Maximum reconnect delay
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay multiplier per failed attempt
pub const MULTIPLIER: f64 = 2.0;

/// Jitter factor applied to each delay
pub const JITTER: f64 = 0.25;

/// Exponential backoff with jitter.
///
/// Attempts are unbounded; the agent keeps dialling until the hub comes
/// back.
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a backoff with the standard reconnect parameters
    pub fn new() -> Self {
        Self::with_params(INITIAL_DELAY, MAX_DELAY, MULTIPLIER, JITTER)
    }

    /// Create a backoff with custom parameters
    pub fn with_params(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;

        // Advance first; the jitter below only decorates this attempt.
        self.current = Duration::from_secs_f64(
            (base.as_secs_f64() * self.multiplier).min(self.max.as_secs_f64()),
        );

        jittered(base, self.jitter)
    }

    /// Reset to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Stretch a delay by a random fraction of itself, up to `factor`.
///
/// Jitter only ever lengthens the wait; reconnect storms after a hub
/// restart spread out instead of synchronising on the minimum.
fn jittered(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    base + base.mul_f64(factor * rand::random::<f64>())
}
