//! Real-time metronome engine
//!
//! Owns one scheduler on a dedicated thread, driven by the monotonic clock
//! and a deadline timer. Other threads control it over a command channel and
//! observe ticks and state changes on an event channel.

use crate::error::{Result, SchedulerError};
use crate::scheduler::beat::{BeatScheduler, SchedulerStatus};
use crate::scheduler::clock::{Clock, MonotonicClock};
use crate::scheduler::policy::DriftPolicy;
use crate::scheduler::subscribers::{SubscriptionId, TickCallback, TickEvent};
use crate::scheduler::tempo::SharedTempo;
use crate::scheduler::timer::DeadlineTimer;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

type EngineScheduler = BeatScheduler<MonotonicClock, DeadlineTimer, SharedTempo>;

/// Longest single sleep of the engine loop.
const MAX_WAIT: Duration = Duration::from_secs(60);

pub enum EngineCommand {
    Start,
    Stop,
    SetBpm(f64),
    SetPolicy(DriftPolicy),
    Subscribe(SubscriptionId, TickCallback),
    Unsubscribe(SubscriptionId),
    Shutdown,
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Stop => write!(f, "Stop"),
            Self::SetBpm(bpm) => write!(f, "SetBpm({})", bpm),
            Self::SetPolicy(policy) => write!(f, "SetPolicy({:?})", policy),
            Self::Subscribe(id, _) => write!(f, "Subscribe({})", id),
            Self::Unsubscribe(id) => write!(f, "Unsubscribe({})", id),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(TickEvent),
    StateChanged(SchedulerStatus),
    Error(String),
}

pub struct MetronomeEngine {
    cmd_tx: Sender<EngineCommand>,
    event_rx: Receiver<EngineEvent>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MetronomeEngine {
    pub fn new(bpm: f64, policy: DriftPolicy) -> Self {
        let (cmd_tx, cmd_rx) = bounded::<EngineCommand>(64);
        let (event_tx, event_rx) = bounded::<EngineEvent>(256);

        let thread_handle = thread::spawn(move || {
            engine_loop(bpm, policy, cmd_rx, event_tx);
        });

        Self {
            cmd_tx,
            event_rx,
            thread_handle: Some(thread_handle),
        }
    }

    pub fn send_command(&self, cmd: EngineCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|e| SchedulerError::EngineUnavailable(format!("failed to send {:?}", e.0)))
    }

    pub fn try_recv_event(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn event_receiver(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    pub fn start(&self) -> Result<()> {
        self.send_command(EngineCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(EngineCommand::Stop)
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        self.send_command(EngineCommand::SetBpm(bpm))
    }

    pub fn set_policy(&self, policy: DriftPolicy) -> Result<()> {
        self.send_command(EngineCommand::SetPolicy(policy))
    }

    /// Register a callback run on the engine thread for every tick. The id is
    /// minted here, so it is usable before the engine has seen the command.
    pub fn subscribe(
        &self,
        callback: impl FnMut(&TickEvent) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let id = Uuid::new_v4();
        self.send_command(EngineCommand::Subscribe(id, Box::new(callback)))?;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.send_command(EngineCommand::Unsubscribe(id))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send_command(EngineCommand::Shutdown)
    }
}

impl Drop for MetronomeEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn engine_loop(
    bpm: f64,
    policy: DriftPolicy,
    cmd_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) {
    let tempo = SharedTempo::new(bpm);
    let mut scheduler = BeatScheduler::new(MonotonicClock::new(), DeadlineTimer::new(), tempo.clone());
    if let Err(e) = scheduler.set_policy(policy) {
        report(&event_tx, &e);
    }

    // Ticks are dropped rather than stalling the beat when nobody drains events
    let tick_tx = event_tx.clone();
    scheduler.on_tick(move |event| {
        if tick_tx.try_send(EngineEvent::Tick(*event)).is_err() {
            tracing::trace!(beat = event.beat, "event channel full, tick not forwarded");
        }
    });

    publish_status(&event_tx, &scheduler);
    tracing::debug!(bpm, "engine thread started");

    loop {
        // Queued commands go first, so a stop or tempo change that arrived
        // before the deadline always beats the wake-up.
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    if !handle_command(cmd, &mut scheduler, &tempo, &event_tx) {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let now = scheduler.clock().now_ms();
        if let Some(id) = scheduler.timer_mut().take_due(now) {
            if let Err(e) = scheduler.wake(id) {
                report(&event_tx, &e);
                publish_status(&event_tx, &scheduler);
            }
            continue;
        }

        let next = match scheduler.timer().next_deadline() {
            Some(deadline) => cmd_rx.recv_timeout(wait_until(deadline, now)),
            None => cmd_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(cmd) => {
                if !handle_command(cmd, &mut scheduler, &tempo, &event_tx) {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Deadline reached, fire on the next pass
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Time to sleep before `deadline_ms`, capped at [`MAX_WAIT`]. A deadline too
/// far out for `Duration` (a vanishingly slow tempo) just waits the cap and
/// re-checks.
fn wait_until(deadline_ms: f64, now_ms: f64) -> Duration {
    Duration::try_from_secs_f64(((deadline_ms - now_ms) / 1000.0).max(0.0))
        .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
}

/// Returns false when the engine should exit.
fn handle_command(
    cmd: EngineCommand,
    scheduler: &mut EngineScheduler,
    tempo: &SharedTempo,
    event_tx: &Sender<EngineEvent>,
) -> bool {
    tracing::trace!(?cmd, "engine command");
    match cmd {
        EngineCommand::Start => {
            if let Err(e) = scheduler.start() {
                report(event_tx, &e);
            }
            publish_status(event_tx, scheduler);
        }
        EngineCommand::Stop => {
            scheduler.stop();
            publish_status(event_tx, scheduler);
        }
        EngineCommand::SetBpm(bpm) => {
            tempo.set_bpm(bpm);
            if let Err(e) = scheduler.tempo_changed() {
                report(event_tx, &e);
            }
            publish_status(event_tx, scheduler);
        }
        EngineCommand::SetPolicy(policy) => {
            if let Err(e) = scheduler.set_policy(policy) {
                report(event_tx, &e);
            }
        }
        EngineCommand::Subscribe(id, callback) => {
            scheduler.on_tick_with_id(id, callback);
        }
        EngineCommand::Unsubscribe(id) => {
            scheduler.unsubscribe(id);
        }
        EngineCommand::Shutdown => {
            scheduler.stop();
            tracing::debug!("engine shutting down");
            return false;
        }
    }
    true
}

fn publish_status(event_tx: &Sender<EngineEvent>, scheduler: &EngineScheduler) {
    let _ = event_tx.try_send(EngineEvent::StateChanged(scheduler.status()));
}

fn report(event_tx: &Sender<EngineEvent>, error: &SchedulerError) {
    tracing::warn!("{}", error);
    let _ = event_tx.try_send(EngineEvent::Error(error.to_string()));
}
