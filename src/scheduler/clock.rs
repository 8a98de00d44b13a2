//! Reference clocks
//!
//! All scheduler time is floating-point milliseconds from a monotonic origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of "now" for the scheduler.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Real clock backed by `Instant`, so system clock adjustments never show up
/// as drift.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_bits: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now_ms: f64) {
        self.now_bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms.max(0.0));
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }
}
