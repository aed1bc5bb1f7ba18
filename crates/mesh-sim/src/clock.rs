//! Time sources and the pitch-scaled play clock
//!
//! The registry reads wall time from a [`TimeSource`] so the scheduler can
//! run against a monotonic clock in production and a manually stepped clock
//! in tests. Each simulator owns a [`PlayClock`] that maps wall time to a
//! position within its track.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic wall time in milliseconds
pub trait TimeSource: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> f64;
}

/// Wall time measured from the moment the source was created
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced time source for deterministic scheduling
///
/// Stores whole microseconds so it can be shared without a lock.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, ms: f64) {
        self.micros.store((ms.max(0.0) * 1000.0).round() as u64, Ordering::Relaxed);
    }

    /// Move time forward
    pub fn advance_ms(&self, ms: f64) {
        let delta = (ms.max(0.0) * 1000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::Relaxed);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Virtual playhead clock
///
/// Position is `origin + (now - anchor) * pitch` while running and `origin`
/// while stopped. Every change of speed or position re-anchors, so the
/// position stays continuous across pitch changes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayClock {
    /// Track position at the anchor
    origin: f64,
    /// Wall time of the last re-anchor
    anchor: f64,
    pitch: f64,
    running: bool,
}

impl PlayClock {
    /// Create a stopped clock at track position 0
    pub fn new(pitch: f64) -> Self {
        Self {
            origin: 0.0,
            anchor: 0.0,
            pitch,
            running: false,
        }
    }

    /// Track position at wall time `now`
    pub fn position(&self, now: f64) -> f64 {
        if self.running {
            self.origin + (now - self.anchor).max(0.0) * self.pitch
        } else {
            self.origin
        }
    }

    /// Start advancing from the current position
    pub fn start(&mut self, now: f64) {
        if !self.running {
            self.anchor = now;
            self.running = true;
        }
    }

    /// Freeze at the current position
    pub fn stop(&mut self, now: f64) {
        if self.running {
            self.origin = self.position(now);
            self.anchor = now;
            self.running = false;
        }
    }

    /// Change speed without moving the playhead
    pub fn set_pitch(&mut self, pitch: f64, now: f64) {
        self.origin = self.position(now);
        self.anchor = now;
        self.pitch = pitch;
    }

    /// Move the playhead, keeping the running state
    pub fn jump(&mut self, position: f64, now: f64) {
        self.origin = position;
        self.anchor = now;
    }
}
