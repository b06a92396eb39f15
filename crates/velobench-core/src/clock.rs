//! Monotonic timing anchor
//!
//! All latency arithmetic runs on nanosecond offsets from one shared
//! monotonic origin. Wall-clock timestamps (for artifacts) are taken
//! separately from the real-time clock and never mixed into latency math.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct MonoClock {
    origin: Instant,
}

impl MonoClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the run origin.
    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// The instant corresponding to a nanosecond offset from the origin.
    pub fn instant_at(&self, offset_ns: u64) -> Instant {
        self.origin + Duration::from_nanos(offset_ns)
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1e6
}

pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / 1e9
}

pub fn secs_to_ns(secs: f64) -> u64 {
    (secs * 1e9) as u64
}

pub fn ms_to_ns(ms: u64) -> u64 {
    ms * 1_000_000
}
