//! Drift-correction policy
//!
//! Decides how long to wait before the next wake-up, given how far the
//! current fire landed from the ideal beat grid.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};

const GRID_EPSILON_MS: f64 = 1e-6;

/// Tunable constants for the rescheduling rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftPolicy {
    /// Largest phase offset (ms) still treated as ordinary jitter. Anything
    /// past it skips ahead a full extra interval.
    pub slack_ms: f64,
    /// Delay (ms) armed after a tempo change, replacing the stale wake-up.
    pub tempo_change_delay_ms: f64,
}

impl DriftPolicy {
    pub const DEFAULT_SLACK_MS: f64 = 100.0;
    pub const DEFAULT_TEMPO_CHANGE_DELAY_MS: f64 = 1000.0;

    pub fn new(slack_ms: f64, tempo_change_delay_ms: f64) -> Result<Self> {
        let policy = Self {
            slack_ms,
            tempo_change_delay_ms,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.slack_ms.is_finite() || self.slack_ms < 0.0 {
            return Err(SchedulerError::invalid_policy(format!(
                "slack must be a finite, non-negative number of ms (got {})",
                self.slack_ms
            )));
        }
        if !self.tempo_change_delay_ms.is_finite() || self.tempo_change_delay_ms <= 0.0 {
            return Err(SchedulerError::invalid_policy(format!(
                "tempo change delay must be a finite, positive number of ms (got {})",
                self.tempo_change_delay_ms
            )));
        }
        Ok(())
    }

    /// Offset of `elapsed_ms` from the last ideal beat boundary.
    pub fn phase(elapsed_ms: f64, interval_ms: f64) -> f64 {
        let phase = elapsed_ms.max(0.0).rem_euclid(interval_ms);
        // Rounding can land an on-grid fire a hair before the boundary.
        if interval_ms - phase < GRID_EPSILON_MS {
            0.0
        } else {
            phase
        }
    }

    /// Delay until the next fire. Snaps back onto the beat grid; when the
    /// phase is past the slack it skips one extra interval instead of
    /// firing two ticks back to back.
    pub fn next_delay(&self, elapsed_ms: f64, interval_ms: f64) -> f64 {
        let phase = Self::phase(elapsed_ms, interval_ms);
        let to_boundary = interval_ms - phase;
        if phase > self.slack_ms {
            to_boundary + interval_ms
        } else {
            to_boundary
        }
    }
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            slack_ms: Self::DEFAULT_SLACK_MS,
            tempo_change_delay_ms: Self::DEFAULT_TEMPO_CHANGE_DELAY_MS,
        }
    }
}
