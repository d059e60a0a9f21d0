//! Fixed-delay FIFO used to simulate network latency.
//!
//! Every item is held for the same duration, so release order equals push
//! order as long as `now` never goes backwards.

use std::collections::VecDeque;

/// Holds items for a fixed number of milliseconds.
#[derive(Debug)]
pub struct DelayLine<T> {
    delay_ms: f64,
    queue: VecDeque<(f64, T)>,
}

impl<T> DelayLine<T> {
    /// Creates a line with the given delay. Negative delays are clamped to zero.
    #[must_use]
    pub fn new(delay_ms: f64) -> Self {
        Self { delay_ms: delay_ms.max(0.0), queue: VecDeque::new() }
    }

    /// Configured delay.
    #[must_use]
    pub const fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    /// Enqueues `item` at time `now_ms`.
    pub fn push(&mut self, now_ms: f64, item: T) {
        // Clamp so a clock hiccup cannot let a later item overtake an earlier one.
        let due = self
            .queue
            .back()
            .map_or(now_ms + self.delay_ms, |(last, _)| (now_ms + self.delay_ms).max(*last));
        self.queue.push_back((due, item));
    }

    /// Removes and returns every item due at `now_ms`, oldest first.
    pub fn release(&mut self, now_ms: f64) -> Vec<T> {
        let mut out = Vec::new();
        while self.queue.front().is_some_and(|(due, _)| *due <= now_ms) {
            if let Some((_, item)) = self.queue.pop_front() {
                out.push(item);
            }
        }
        out
    }

    /// Items still held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
