//! Snapshot interpolation buffer.
//!
//! ```text
//! receipt order:   [s0] [s1] [s2] [s3]
//!                         │    │
//! render time:            ▼  r = now - tick_interval
//!                  s0 retired (s1.t <= r), blend s1 → s2
//! ```
//!
//! Snapshots are consumed strictly in receipt order; the host tick is not
//! consulted. Nothing is extrapolated: if `r` is outside the two oldest
//! snapshots the caller keeps its last pose.

use std::collections::VecDeque;

use kinesis_core::Pose;

use crate::config::RotationBlend;

/// A pose stamped with its local receipt time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedSnapshot {
    /// Pose as sent by the host.
    pub pose: Pose,
    /// Local time of arrival in milliseconds.
    pub received_at: f64,
}

/// Oldest-first buffer of received poses.
#[derive(Clone, Debug, Default)]
pub struct InterpolationBuffer {
    entries: VecDeque<TimedSnapshot>,
    blend: RotationBlend,
}

impl InterpolationBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new(blend: RotationBlend) -> Self {
        Self { entries: VecDeque::new(), blend }
    }

    /// Appends a snapshot.
    pub fn push(&mut self, pose: Pose, received_at: f64) {
        self.entries.push_back(TimedSnapshot { pose, received_at });
    }

    /// Drops every snapshot whose successor is already at or before
    /// `render_ms`.
    ///
    /// Returns how many were dropped.
    pub fn prune(&mut self, render_ms: f64) -> usize {
        let mut dropped = 0;
        while self.entries.len() >= 2 && self.entries[1].received_at <= render_ms {
            self.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Prunes, then interpolates the pose at `render_ms`.
    ///
    /// `None` when fewer than two snapshots remain or `render_ms` falls
    /// outside the oldest pair.
    pub fn sample(&mut self, render_ms: f64) -> Option<Pose> {
        self.prune(render_ms);
        let (from, to) = (self.entries.front()?, self.entries.get(1)?);
        if render_ms < from.received_at || render_ms > to.received_at {
            return None;
        }

        let span = to.received_at - from.received_at;
        #[allow(clippy::cast_possible_truncation)]
        let t = if span > 0.0 { ((render_ms - from.received_at) / span) as f32 } else { 1.0 };

        let rotation = match self.blend {
            RotationBlend::Snap => to.pose.rotation,
            RotationBlend::Lerp => from.pose.rotation.lerp_shortest(to.pose.rotation, t),
        };
        Some(Pose::new(from.pose.position.lerp(to.pose.position, t), rotation))
    }

    /// Snapshots held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
