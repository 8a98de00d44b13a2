//! One-shot timer primitives
//!
//! A timer only remembers when each armed wake-up is due. Whoever drives the
//! timer (the engine thread or a simulation) asks it for due wake-ups and
//! hands them back to the scheduler.

/// Handle for one armed wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// "Call me back after `delay_ms`", with a cancellable handle.
pub trait Timer {
    fn arm(&mut self, now_ms: f64, delay_ms: f64) -> TimerId;

    /// Remove a pending wake-up. Returns false if it already fired or was
    /// never armed.
    fn cancel(&mut self, id: TimerId) -> bool;
}

/// Deadline store for a real event loop.
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    next_id: u64,
    pending: Vec<(TimerId, f64)>,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest pending deadline in clock milliseconds.
    pub fn next_deadline(&self) -> Option<f64> {
        self.earliest().map(|(_, due)| due)
    }

    /// Remove and return the earliest wake-up if it is due at `now_ms`.
    pub fn take_due(&mut self, now_ms: f64) -> Option<TimerId> {
        let (id, due) = self.earliest()?;
        if due > now_ms {
            return None;
        }
        self.pending.retain(|(pending, _)| *pending != id);
        Some(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn earliest(&self) -> Option<(TimerId, f64)> {
        self.pending
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }
}

impl Timer for DeadlineTimer {
    fn arm(&mut self, now_ms: f64, delay_ms: f64) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.push((id, now_ms + delay_ms));
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(pending, _)| *pending != id);
        self.pending.len() != before
    }
}

/// Lateness to add to the n-th armed wake-up (0-based), in ms.
pub type Jitter = Box<dyn FnMut(u64) -> f64 + Send>;

/// Timer for simulated time. Records every requested delay and can make
/// wake-ups arrive late, the way a throttled event loop would.
#[derive(Default)]
pub struct ManualTimer {
    deadlines: DeadlineTimer,
    jitter: Option<Jitter>,
    armed: u64,
    delays: Vec<f64>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jitter(jitter: Jitter) -> Self {
        Self {
            jitter: Some(jitter),
            ..Self::default()
        }
    }

    /// Earliest pending wake-up and the time it will actually fire.
    pub fn next_due(&self) -> Option<(TimerId, f64)> {
        self.deadlines.earliest()
    }

    pub fn take_due(&mut self, now_ms: f64) -> Option<TimerId> {
        self.deadlines.take_due(now_ms)
    }

    pub fn pending_count(&self) -> usize {
        self.deadlines.pending_count()
    }

    /// Delays the scheduler asked for, in arm order, without jitter.
    pub fn requested_delays(&self) -> &[f64] {
        &self.delays
    }

    pub fn last_requested_delay(&self) -> Option<f64> {
        self.delays.last().copied()
    }
}

impl Timer for ManualTimer {
    fn arm(&mut self, now_ms: f64, delay_ms: f64) -> TimerId {
        let lateness = match self.jitter.as_mut() {
            Some(jitter) => jitter(self.armed).max(0.0),
            None => 0.0,
        };
        self.armed += 1;
        self.delays.push(delay_ms);
        self.deadlines.arm(now_ms, delay_ms + lateness)
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.deadlines.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_due_respects_deadline() {
        let mut timer = DeadlineTimer::new();
        let id = timer.arm(0.0, 500.0);
        assert_eq!(timer.next_deadline(), Some(500.0));
        assert_eq!(timer.take_due(499.9), None);
        assert_eq!(timer.take_due(500.0), Some(id));
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn cancelled_wake_up_never_comes_due() {
        let mut timer = DeadlineTimer::new();
        let id = timer.arm(0.0, 10.0);
        assert!(timer.cancel(id));
        assert!(!timer.cancel(id));
        assert_eq!(timer.take_due(1_000.0), None);
    }

    #[test]
    fn earliest_deadline_comes_first() {
        let mut timer = DeadlineTimer::new();
        let late = timer.arm(0.0, 300.0);
        let early = timer.arm(0.0, 100.0);
        assert_eq!(timer.take_due(1_000.0), Some(early));
        assert_eq!(timer.take_due(1_000.0), Some(late));
    }

    #[test]
    fn ids_are_unique() {
        let mut timer = DeadlineTimer::new();
        let a = timer.arm(0.0, 1.0);
        let b = timer.arm(0.0, 1.0);
        assert_ne!(a, b);
    }

    #[test]
    fn manual_timer_applies_jitter_but_records_request() {
        let mut timer = ManualTimer::with_jitter(Box::new(|n: u64| if n == 0 { 30.0 } else { -5.0 }));
        let first = timer.arm(0.0, 1000.0);
        assert_eq!(timer.next_due(), Some((first, 1030.0)));
        timer.cancel(first);

        let second = timer.arm(0.0, 1000.0);
        // Negative lateness is clamped; wake-ups never arrive early
        assert_eq!(timer.next_due(), Some((second, 1000.0)));
        assert_eq!(timer.requested_delays(), &[1000.0, 1000.0]);
    }
}
