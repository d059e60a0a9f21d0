//! # Tick Clock
//!
//! Fixed-timestep driver for the simulation.
//!
//! ## Design
//!
//! The clock must:
//! - Fire fixed updates at a constant rate regardless of frame rate
//! - Count ticks with a strictly increasing 64-bit counter
//! - Cap catch-up after a long stall instead of spiraling
//!
//! ```text
//! frame:   |----16.7ms----|--------40ms--------|--5ms--|
//! ticks:   ^1             ^2       ^3     (acc) ^4      (acc)
//! ```

use std::time::{Duration, Instant};

use tracing::warn;

/// Simulation step counter.
pub type Tick = u64;

/// Fixed-timestep clock.
///
/// Feed it the current time once per frame with [`TickClock::advance`], then
/// run one fixed update per due tick between [`TickClock::begin_tick`] and
/// [`TickClock::end_tick`].
#[derive(Debug)]
pub struct TickClock {
    /// Target tick duration in milliseconds.
    interval_ms: f64,
    /// Most ticks run for one frame.
    max_catch_up: u32,
    /// Time of the previous `advance`.
    last_ms: Option<f64>,
    /// Time owed to the simulation.
    accumulator_ms: f64,
    /// Ticks run so far.
    tick: Tick,
    /// Frame time statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest fixed update observed.
    pub min_tick_us: u64,
    /// Longest fixed update observed.
    pub max_tick_us: u64,
    /// Rolling average fixed update time.
    pub avg_tick_us: u64,
    /// Fixed updates that took longer than the interval.
    pub late_ticks: u64,
    /// Fixed updates measured.
    pub total_ticks: u64,
    /// Ticks dropped by the catch-up cap.
    pub skipped_ticks: u64,
}

impl TickStats {
    fn fresh(interval_ms: f64) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: millis_to_micros(interval_ms),
            late_ticks: 0,
            total_ticks: 0,
            skipped_ticks: 0,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_to_micros(ms: f64) -> u64 {
    (ms * 1000.0) as u64
}

impl TickClock {
    /// Creates a clock ticking `tick_rate` times per second.
    ///
    /// A zero rate is treated as one tick per second.
    #[must_use]
    pub fn new(tick_rate: u32, max_catch_up: u32) -> Self {
        let interval_ms = 1000.0 / f64::from(tick_rate.max(1));
        Self {
            interval_ms,
            max_catch_up: max_catch_up.max(1),
            last_ms: None,
            accumulator_ms: 0.0,
            tick: 0,
            stats: TickStats::fresh(interval_ms),
        }
    }

    /// Accounts for time up to `now_ms` and returns how many ticks are due.
    ///
    /// The first call only records the starting point. If more than the
    /// catch-up cap is owed, the excess is discarded and counted.
    pub fn advance(&mut self, now_ms: f64) -> u32 {
        let Some(last) = self.last_ms.replace(now_ms) else {
            return 0;
        };
        self.accumulator_ms += (now_ms - last).max(0.0);

        let mut due = 0;
        while self.accumulator_ms >= self.interval_ms && due < self.max_catch_up {
            self.accumulator_ms -= self.interval_ms;
            due += 1;
        }
        if self.accumulator_ms >= self.interval_ms {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let skipped = (self.accumulator_ms / self.interval_ms) as u64;
            self.accumulator_ms -= skipped as f64 * self.interval_ms;
            self.stats.skipped_ticks += skipped;
            warn!(skipped, cap = self.max_catch_up, "tick clock fell behind, dropping ticks");
        }
        due
    }

    /// Starts the next fixed update.
    ///
    /// Returns the new tick number and a start time for [`TickClock::end_tick`].
    pub fn begin_tick(&mut self) -> (Tick, Instant) {
        self.tick += 1;
        (self.tick, Instant::now())
    }

    /// Records how long the fixed update took.
    pub fn end_tick(&mut self, start: Instant) {
        self.record(start.elapsed());
    }

    fn record(&mut self, duration: Duration) {
        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration_us > millis_to_micros(self.interval_ms) {
            self.stats.late_ticks += 1;
        }
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Tick interval in milliseconds.
    #[must_use]
    pub const fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Tick interval in seconds, as the physics step.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dt(&self) -> f32 {
        (self.interval_ms / 1000.0) as f32
    }

    /// Fraction of the next tick already elapsed, in `[0, 1)`.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.accumulator_ms / self.interval_ms
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.interval_ms);
    }
}
