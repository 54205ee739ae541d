//! Fault injection policies.
//!
//! Every listener owns a [`Faults`] value built from its configuration.
//! The engines consult it at fixed points:
//! - `delay`: slept before each unit of work (a read, a datagram reply)
//! - `drop_rate`: probability of discarding a datagram without replying
//! - `close_after`: a connection is held open this long, then closed unserved
//!
//! A zero duration or a zero rate disables the corresponding fault.

use rand::Rng;
use std::time::Duration;

/// Fault parameters for a single listener.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Faults {
    delay: Duration,
    drop_rate: f64,
    close_after: Duration,
}

impl Faults {
    /// No faults at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sleep this long before each unit of work.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Discard work with this probability. Values outside [0, 1] are clamped.
    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    /// Close connections after this long without serving them.
    pub fn with_close_after(mut self, close_after: Duration) -> Self {
        self.close_after = close_after;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    /// The close-after deadline, if one is configured.
    pub fn close_after(&self) -> Option<Duration> {
        (!self.close_after.is_zero()).then_some(self.close_after)
    }

    /// Apply the configured per-operation delay.
    pub async fn apply_delay(&self) {
        pause(self.delay).await;
    }

    /// Decide whether to drop the current unit of work.
    pub fn should_drop(&self) -> bool {
        self.should_drop_with(&mut rand::thread_rng())
    }

    /// Same as [`Faults::should_drop`] with an explicit random source.
    pub fn should_drop_with<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        if self.drop_rate <= 0.0 {
            false
        } else if self.drop_rate >= 1.0 {
            true
        } else {
            rng.gen_bool(self.drop_rate)
        }
    }
}

/// Sleep for `duration`, returning immediately when it is zero.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
