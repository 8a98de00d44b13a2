//! Virtual-time driver
//!
//! Runs a scheduler against a [`VirtualClock`] and a [`ManualTimer`], firing
//! wake-ups as simulated time passes. Jitter injected into the timer makes
//! wake-ups arrive late the way a throttled event loop would.

use crate::error::Result;
use crate::scheduler::beat::BeatScheduler;
use crate::scheduler::clock::{Clock, VirtualClock};
use crate::scheduler::policy::DriftPolicy;
use crate::scheduler::subscribers::TickEvent;
use crate::scheduler::tempo::SharedTempo;
use crate::scheduler::timer::{Jitter, ManualTimer};
use std::sync::{Arc, Mutex};

pub type SimScheduler = BeatScheduler<VirtualClock, ManualTimer, SharedTempo>;

pub struct Simulation {
    clock: VirtualClock,
    tempo: SharedTempo,
    scheduler: SimScheduler,
    ticks: Arc<Mutex<Vec<TickEvent>>>,
}

impl Simulation {
    pub fn new(bpm: f64) -> Self {
        Self::build(bpm, ManualTimer::new())
    }

    pub fn with_jitter(bpm: f64, jitter: Jitter) -> Self {
        Self::build(bpm, ManualTimer::with_jitter(jitter))
    }

    fn build(bpm: f64, timer: ManualTimer) -> Self {
        let clock = VirtualClock::new();
        let tempo = SharedTempo::new(bpm);
        let mut scheduler = BeatScheduler::new(clock.clone(), timer, tempo.clone());

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        scheduler.on_tick(move |event| {
            if let Ok(mut ticks) = sink.lock() {
                ticks.push(*event);
            }
        });

        Self {
            clock,
            tempo,
            scheduler,
            ticks,
        }
    }

    pub fn with_policy(mut self, policy: DriftPolicy) -> Result<Self> {
        self.scheduler.set_policy(policy)?;
        Ok(self)
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn scheduler(&self) -> &SimScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SimScheduler {
        &mut self.scheduler
    }

    pub fn start(&mut self) -> Result<()> {
        self.scheduler.start()
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Change the tempo and notify the scheduler, as a host would.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.tempo.set_bpm(bpm);
        self.scheduler.tempo_changed()
    }

    /// Fire every wake-up due up to `target_ms`, then leave the clock there.
    pub fn advance_to(&mut self, target_ms: f64) -> Result<()> {
        while let Some((_, due)) = self.scheduler.timer().next_due() {
            if due > target_ms {
                break;
            }
            self.clock.set(due.max(self.clock.now_ms()));
            let Some(id) = self.scheduler.timer_mut().take_due(due) else {
                break;
            };
            self.scheduler.wake(id)?;
        }
        if target_ms > self.clock.now_ms() {
            self.clock.set(target_ms);
        }
        Ok(())
    }

    pub fn advance_by(&mut self, delta_ms: f64) -> Result<()> {
        self.advance_to(self.clock.now_ms() + delta_ms)
    }

    /// Advance until `count` more ticks have been emitted, or no wake-up is
    /// left pending.
    pub fn run_beats(&mut self, count: usize) -> Result<()> {
        let target = self.tick_count() + count;
        while self.tick_count() < target {
            let Some((_, due)) = self.scheduler.timer().next_due() else {
                break;
            };
            self.advance_to(due)?;
        }
        Ok(())
    }

    pub fn ticks(&self) -> Vec<TickEvent> {
        self.ticks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn tick_times(&self) -> Vec<f64> {
        self.ticks().iter().map(|t| t.at_ms).collect()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.lock().map(|t| t.len()).unwrap_or(0)
    }
}

/// Deterministic lateness in `[0, max_ms]` that varies from beat to beat.
pub fn scatter_jitter(max_ms: f64) -> Jitter {
    Box::new(move |n: u64| {
        let step = (n.wrapping_mul(37).wrapping_add(11)) % 101;
        max_ms * step as f64 / 100.0
    })
}
