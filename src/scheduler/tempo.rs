//! Tempo source and beat interval derivation

use crate::error::{Result, SchedulerError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MS_PER_MINUTE: f64 = 60_000.0;

/// Read-only view of the current tempo. The scheduler never writes to it.
pub trait TempoSource {
    fn bpm(&self) -> f64;
}

/// Tempo value shared between its owner and a scheduler. Clones point at the
/// same value and may be written from any thread.
#[derive(Debug, Clone)]
pub struct SharedTempo {
    bits: Arc<AtomicU64>,
}

impl SharedTempo {
    pub fn new(bpm: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(bpm.to_bits())),
        }
    }

    /// Store a new tempo. Returns whether the value actually changed.
    pub fn set_bpm(&self, bpm: f64) -> bool {
        let previous = f64::from_bits(self.bits.swap(bpm.to_bits(), Ordering::SeqCst));
        previous.to_bits() != bpm.to_bits()
    }
}

impl TempoSource for SharedTempo {
    fn bpm(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Milliseconds between beats at `bpm`. Rejects anything that would not give
/// a positive, finite interval.
pub fn interval_ms(bpm: f64) -> Result<f64> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(SchedulerError::InvalidTempo { bpm });
    }
    let interval = MS_PER_MINUTE / bpm;
    if !interval.is_finite() || interval <= 0.0 {
        return Err(SchedulerError::InvalidTempo { bpm });
    }
    Ok(interval)
}
