//! Drift-correcting beat scheduler for multi-metronome applications.
//!
//! [`BeatScheduler`] turns a tempo that may change at any time into one tick
//! per beat on top of a coarse one-shot timer. [`MetronomeEngine`] runs it on
//! a thread against the real clock; [`Simulation`] runs it in virtual time.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod types;

pub use error::{Result, SchedulerError};
pub use scheduler::beat::{BeatScheduler, SchedulerStatus};
pub use scheduler::clock::{Clock, MonotonicClock, VirtualClock};
pub use scheduler::engine::{EngineCommand, EngineEvent, MetronomeEngine};
pub use scheduler::policy::DriftPolicy;
pub use scheduler::sim::Simulation;
pub use scheduler::subscribers::{SubscriptionId, TickEvent};
pub use scheduler::tempo::{interval_ms, SharedTempo, TempoSource};
pub use scheduler::timer::{DeadlineTimer, ManualTimer, Timer, TimerId};
pub use types::{AppConfig, AppMode, Metronome, MetronomeConfiguration, Settings, TimeSignature};
