//! Millisecond clocks.
//!
//! Everything in the sync layer reads time through [`TimeSource`], so tests
//! can drive a session with a [`ManualClock`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic milliseconds since an arbitrary origin.
pub trait TimeSource {
    /// Current time in milliseconds.
    fn now_ms(&self) -> f64;

    /// Current time in whole milliseconds, as carried on the wire.
    fn now_millis(&self) -> u64 {
        whole_millis(self.now_ms())
    }
}

/// Truncates to whole milliseconds. Negative and NaN clamp to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn whole_millis(ms: f64) -> u64 {
    if ms.is_nan() || ms <= 0.0 {
        0
    } else {
        ms as u64
    }
}

/// Wall clock backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Starts counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    /// Starts at `start_ms`.
    #[must_use]
    pub fn starting_at(start_ms: f64) -> Self {
        Self { now: Rc::new(Cell::new(start_ms)) }
    }

    /// Moves time forward.
    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }

    /// Jumps to `ms`.
    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::starting_at(10.0);
        let view = clock.clone();
        clock.advance(5.5);
        assert_eq!(view.now_ms(), 15.5);
        view.set(100.0);
        assert_eq!(clock.now_ms(), 100.0);
        assert_eq!(clock.now_millis(), 100);
    }

    #[test]
    fn test_whole_millis_truncates_and_clamps() {
        assert_eq!(whole_millis(16.999), 16);
        assert_eq!(whole_millis(0.4), 0);
        assert_eq!(whole_millis(-3.0), 0);
        assert_eq!(whole_millis(f64::NAN), 0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}
