//! Drift-corrected beat scheduler
//!
//! Emits one tick per beat on top of a coarse one-shot timer. Every fire
//! measures where it landed against the beat grid anchored at the start
//! instant and picks the next delay to snap back onto that grid.

use crate::error::Result;
use crate::scheduler::clock::Clock;
use crate::scheduler::policy::DriftPolicy;
use crate::scheduler::subscribers::{SubscriptionId, TickCallback, TickEvent, TickSubscribers};
use crate::scheduler::tempo::{self, TempoSource};
use crate::scheduler::timer::{Timer, TimerId};

/// Read-only snapshot for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStatus {
    pub active: bool,
    pub bpm: f64,
    /// `None` when the current tempo is invalid.
    pub interval_ms: Option<f64>,
    pub beat: u64,
}

pub struct BeatScheduler<C, T, S> {
    clock: C,
    timer: T,
    tempo: S,
    policy: DriftPolicy,
    subscribers: TickSubscribers,
    active: bool,
    reference_ms: f64,
    pending: Option<TimerId>,
    beat: u64,
    observed_bpm: f64,
}

impl<C: Clock, T: Timer, S: TempoSource> BeatScheduler<C, T, S> {
    pub fn new(clock: C, timer: T, tempo: S) -> Self {
        let observed_bpm = tempo.bpm();
        Self {
            clock,
            timer,
            tempo,
            policy: DriftPolicy::default(),
            subscribers: TickSubscribers::new(),
            active: false,
            reference_ms: 0.0,
            pending: None,
            beat: 0,
            observed_bpm,
        }
    }

    pub fn with_policy(mut self, policy: DriftPolicy) -> Result<Self> {
        self.set_policy(policy)?;
        Ok(self)
    }

    /// Takes effect from the next reschedule.
    pub fn set_policy(&mut self, policy: DriftPolicy) -> Result<()> {
        policy.validate()?;
        self.policy = policy;
        Ok(())
    }

    /// Begin ticking: emits beat zero right away, then arms the next wake-up.
    /// A second call while active does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            tracing::debug!("start ignored, scheduler already active");
            return Ok(());
        }

        let bpm = self.tempo.bpm();
        let interval = tempo::interval_ms(bpm).inspect_err(|e| {
            tracing::warn!(bpm, "refusing to start: {}", e);
        })?;

        self.observed_bpm = bpm;
        self.active = true;
        self.beat = 0;
        self.reference_ms = self.clock.now_ms();
        tracing::info!(bpm, interval_ms = interval, "scheduler started");

        self.fire(interval)
    }

    /// Cancel the pending wake-up and go inactive. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.cancel_pending();
        self.active = false;
        tracing::info!(beats = self.beat, "scheduler stopped");
    }

    pub fn on_tick(&mut self, callback: impl FnMut(&TickEvent) + Send + 'static) -> SubscriptionId {
        self.subscribers.add(Box::new(callback))
    }

    pub fn on_tick_with_id(&mut self, id: SubscriptionId, callback: TickCallback) {
        self.subscribers.add_with_id(id, callback);
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Timer-fire entry point. Wake-ups other than the one currently pending
    /// were cancelled and are ignored.
    pub fn wake(&mut self, id: TimerId) -> Result<()> {
        if !self.active || self.pending != Some(id) {
            tracing::trace!(timer = id.get(), "ignoring stale wake-up");
            return Ok(());
        }
        self.pending = None;

        let interval = self.current_interval()?;
        self.fire(interval)
    }

    /// Tempo-change notification. While active, a real change replaces the
    /// pending wake-up with one after the policy's settle delay. The beat grid
    /// stays anchored at the original start instant.
    pub fn tempo_changed(&mut self) -> Result<()> {
        let bpm = self.tempo.bpm();
        if bpm.to_bits() == self.observed_bpm.to_bits() {
            return Ok(());
        }
        if !self.active {
            self.observed_bpm = bpm;
            return Ok(());
        }

        self.current_interval()?;
        self.observed_bpm = bpm;
        let delay = self.policy.tempo_change_delay_ms;
        tracing::debug!(bpm, delay_ms = delay, "tempo changed, re-arming");
        self.arm(delay);
        Ok(())
    }

    /// Current beat interval, read fresh from the tempo source.
    pub fn interval_ms(&self) -> Result<f64> {
        tempo::interval_ms(self.tempo.bpm())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Ticks emitted in the current (or last) session.
    pub fn beat(&self) -> u64 {
        self.beat
    }

    pub fn reference_ms(&self) -> f64 {
        self.reference_ms
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active: self.active,
            bpm: self.tempo.bpm(),
            interval_ms: self.interval_ms().ok(),
            beat: self.beat,
        }
    }

    pub fn policy(&self) -> &DriftPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn tempo(&self) -> &S {
        &self.tempo
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Re-read the tempo; an invalid one halts the scheduler.
    fn current_interval(&mut self) -> Result<f64> {
        let bpm = self.tempo.bpm();
        tempo::interval_ms(bpm).inspect_err(|e| {
            tracing::warn!(bpm, "halting scheduler: {}", e);
            self.halt();
        })
    }

    fn fire(&mut self, interval: f64) -> Result<()> {
        let event = TickEvent {
            beat: self.beat,
            at_ms: self.clock.now_ms(),
            interval_ms: interval,
        };
        self.beat += 1;
        self.subscribers.emit(&event);

        // Subscribers may have moved the tempo; reschedule against the fresh one.
        let interval = self.current_interval()?;
        self.observed_bpm = self.tempo.bpm();
        let elapsed = self.clock.now_ms() - self.reference_ms;
        let delay = self.policy.next_delay(elapsed, interval);
        tracing::debug!(
            beat = event.beat,
            elapsed_ms = elapsed,
            phase_ms = DriftPolicy::phase(elapsed, interval),
            delay_ms = delay,
            "tick"
        );
        self.arm(delay);
        Ok(())
    }

    /// Replace whatever is pending with a single wake-up after `delay_ms`.
    fn arm(&mut self, delay_ms: f64) {
        self.cancel_pending();
        let now = self.clock.now_ms();
        self.pending = Some(self.timer.arm(now, delay_ms));
    }

    fn cancel_pending(&mut self) {
        if let Some(id) = self.pending.take() {
            self.timer.cancel(id);
        }
    }

    fn halt(&mut self) {
        self.cancel_pending();
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::scheduler::clock::VirtualClock;
    use crate::scheduler::tempo::SharedTempo;
    use crate::scheduler::timer::ManualTimer;
    use std::sync::{Arc, Mutex};

    type TestScheduler = BeatScheduler<VirtualClock, ManualTimer, SharedTempo>;

    fn scheduler(bpm: f64) -> (TestScheduler, VirtualClock, SharedTempo) {
        let clock = VirtualClock::new();
        let tempo = SharedTempo::new(bpm);
        let scheduler = BeatScheduler::new(clock.clone(), ManualTimer::new(), tempo.clone());
        (scheduler, clock, tempo)
    }

    fn tick_log(scheduler: &mut TestScheduler) -> Arc<Mutex<Vec<TickEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        scheduler.on_tick(move |e| sink.lock().unwrap().push(*e));
        log
    }

    /// Fire the pending wake-up at `at_ms`, however late that is.
    fn fire_at(scheduler: &mut TestScheduler, clock: &VirtualClock, at_ms: f64) {
        let id = scheduler.pending().expect("a wake-up should be pending");
        clock.set(at_ms);
        assert!(scheduler.timer_mut().cancel(id));
        scheduler.wake(id).unwrap();
    }

    #[test]
    fn new_scheduler_is_inactive() {
        let (scheduler, _, _) = scheduler(60.0);
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.pending(), None);
        assert_eq!(scheduler.interval_ms().unwrap(), 1000.0);
    }

    #[test]
    fn start_emits_beat_zero_before_arming() {
        let (mut scheduler, clock, _) = scheduler(60.0);
        clock.set(500.0);
        let log = tick_log(&mut scheduler);

        scheduler.start().unwrap();

        let ticks = log.lock().unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].beat, 0);
        assert_eq!(ticks[0].at_ms, 500.0);
        assert_eq!(scheduler.reference_ms(), 500.0);
        assert_eq!(scheduler.timer().requested_delays(), &[1000.0]);
        assert_eq!(scheduler.timer().pending_count(), 1);
    }

    #[test]
    fn double_start_emits_one_tick() {
        let (mut scheduler, _, _) = scheduler(60.0);
        let log = tick_log(&mut scheduler);

        scheduler.start().unwrap();
        scheduler.start().unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(scheduler.timer().requested_delays().len(), 1);
    }

    #[test]
    fn stop_cancels_the_underlying_wake_up() {
        let (mut scheduler, _, _) = scheduler(60.0);
        scheduler.start().unwrap();
        let pending = scheduler.pending().unwrap();

        scheduler.stop();
        scheduler.stop();

        assert!(!scheduler.is_active());
        assert_eq!(scheduler.timer().pending_count(), 0);
        // A wake that somehow still arrives is ignored
        scheduler.wake(pending).unwrap();
        assert_eq!(scheduler.beat(), 1);
    }

    #[test]
    fn late_fire_within_slack_snaps_to_grid() {
        let (mut scheduler, clock, _) = scheduler(60.0);
        scheduler.start().unwrap();

        fire_at(&mut scheduler, &clock, 1040.0);

        assert_eq!(scheduler.timer().last_requested_delay(), Some(960.0));
    }

    #[test]
    fn overrun_past_slack_skips_an_interval() {
        let (mut scheduler, clock, _) = scheduler(60.0);
        let log = tick_log(&mut scheduler);
        scheduler.start().unwrap();

        fire_at(&mut scheduler, &clock, 1150.0);

        assert_eq!(scheduler.timer().last_requested_delay(), Some(1850.0));
        let (_, due) = scheduler.timer().next_due().unwrap();
        assert_eq!(due, 3000.0);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn at_most_one_wake_up_is_pending() {
        let (mut scheduler, clock, tempo) = scheduler(60.0);
        scheduler.start().unwrap();
        for at in [1000.0, 2010.0, 3005.0] {
            fire_at(&mut scheduler, &clock, at);
            assert_eq!(scheduler.timer().pending_count(), 1);
        }
        tempo.set_bpm(90.0);
        scheduler.tempo_changed().unwrap();
        assert_eq!(scheduler.timer().pending_count(), 1);
    }

    #[test]
    fn stale_wake_up_is_ignored() {
        let (mut scheduler, clock, tempo) = scheduler(60.0);
        let log = tick_log(&mut scheduler);
        scheduler.start().unwrap();
        let stale = scheduler.pending().unwrap();

        clock.set(200.0);
        tempo.set_bpm(120.0);
        scheduler.tempo_changed().unwrap();
        assert_ne!(scheduler.pending(), Some(stale));

        scheduler.wake(stale).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn tempo_change_rearms_with_settle_delay() {
        let (mut scheduler, clock, tempo) = scheduler(60.0);
        scheduler.start().unwrap();

        clock.set(300.0);
        tempo.set_bpm(120.0);
        scheduler.tempo_changed().unwrap();

        assert_eq!(scheduler.timer().last_requested_delay(), Some(1000.0));
        assert_eq!(scheduler.timer().next_due().unwrap().1, 1300.0);
        assert_eq!(scheduler.reference_ms(), 0.0);
        assert_eq!(scheduler.interval_ms().unwrap(), 500.0);
    }

    #[test]
    fn unchanged_tempo_notification_is_a_no_op() {
        let (mut scheduler, _, _) = scheduler(60.0);
        scheduler.start().unwrap();
        let pending = scheduler.pending();

        scheduler.tempo_changed().unwrap();

        assert_eq!(scheduler.pending(), pending);
        assert_eq!(scheduler.timer().requested_delays().len(), 1);
    }

    #[test]
    fn tempo_change_while_inactive_arms_nothing() {
        let (mut scheduler, _, tempo) = scheduler(60.0);
        tempo.set_bpm(100.0);
        scheduler.tempo_changed().unwrap();
        assert_eq!(scheduler.timer().pending_count(), 0);
        assert_eq!(scheduler.status().bpm, 100.0);
    }

    #[test]
    fn start_rejects_invalid_tempo() {
        for bpm in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let (mut scheduler, _, _) = scheduler(bpm);
            let log = tick_log(&mut scheduler);

            let result = scheduler.start();

            assert!(matches!(result, Err(SchedulerError::InvalidTempo { .. })));
            assert!(!scheduler.is_active());
            assert!(log.lock().unwrap().is_empty());
            assert_eq!(scheduler.timer().pending_count(), 0);
        }
    }

    #[test]
    fn invalid_tempo_change_halts() {
        let (mut scheduler, _, tempo) = scheduler(60.0);
        scheduler.start().unwrap();

        tempo.set_bpm(0.0);
        assert!(scheduler.tempo_changed().is_err());

        assert!(!scheduler.is_active());
        assert_eq!(scheduler.timer().pending_count(), 0);
        assert_eq!(scheduler.status().interval_ms, None);
    }

    #[test]
    fn invalid_tempo_at_fire_halts_without_ticking() {
        let (mut scheduler, clock, tempo) = scheduler(60.0);
        let log = tick_log(&mut scheduler);
        scheduler.start().unwrap();
        let id = scheduler.pending().unwrap();

        // Owner writes a bad value without notifying
        tempo.set_bpm(f64::NAN);
        clock.set(1000.0);
        scheduler.timer_mut().cancel(id);

        assert!(scheduler.wake(id).is_err());
        assert!(!scheduler.is_active());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn restart_takes_a_new_reference() {
        let (mut scheduler, clock, _) = scheduler(60.0);
        let log = tick_log(&mut scheduler);
        scheduler.start().unwrap();
        fire_at(&mut scheduler, &clock, 1000.0);
        scheduler.stop();

        clock.set(5_250.0);
        scheduler.start().unwrap();

        assert_eq!(scheduler.reference_ms(), 5_250.0);
        let ticks = log.lock().unwrap();
        assert_eq!(ticks.last().unwrap().beat, 0);
        assert_eq!(ticks.len(), 3);
    }

    #[test]
    fn unsubscribed_callback_stops_receiving() {
        let (mut scheduler, clock, _) = scheduler(60.0);
        let log = tick_log(&mut scheduler);
        let other = Arc::new(Mutex::new(0u32));
        let counter = other.clone();
        let id = scheduler.on_tick(move |_| *counter.lock().unwrap() += 1);

        scheduler.start().unwrap();
        assert!(scheduler.unsubscribe(id));
        assert!(!scheduler.unsubscribe(id));
        fire_at(&mut scheduler, &clock, 1000.0);

        assert_eq!(*other.lock().unwrap(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(scheduler.subscriber_count(), 1);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let (scheduler, _, _) = scheduler(60.0);
        let policy = DriftPolicy {
            slack_ms: 100.0,
            tempo_change_delay_ms: -1.0,
        };
        assert!(scheduler.with_policy(policy).is_err());
    }
}
