use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::scheduler::policy::DriftPolicy;

/// Musical time signature stored as `[beatsPerMeasure, beatUnit]`, e.g. `[3, 4]` for 3/4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeSignature(pub u32, pub u32);

impl Default for TimeSignature {
    fn default() -> Self {
        Self(4, 4)
    }
}

/// Where a beat falls inside its measure, both 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatPosition {
    pub measure: u64,
    pub beat_in_measure: u32,
}

impl TimeSignature {
    pub fn beats_per_measure(&self) -> u32 {
        self.0
    }

    pub fn beat_unit(&self) -> u32 {
        self.1
    }

    /// Map a session beat index onto measure and beat. A zero-beat measure
    /// counts every beat as its own measure.
    pub fn position(&self, beat: u64) -> BeatPosition {
        let per_measure = u64::from(self.beats_per_measure().max(1));
        BeatPosition {
            measure: beat / per_measure,
            beat_in_measure: (beat % per_measure) as u32,
        }
    }

    pub fn is_downbeat(&self, beat: u64) -> bool {
        self.position(beat).beat_in_measure == 0
    }
}

/// Visual style of a metronome. Only consumed by the display layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum MetronomeStyle {
    Rectangle {
        /// Hex color, e.g. `"#FFFF00"`.
        #[serde(rename = "colorBackground")]
        color_background: String,
    },
}

impl Default for MetronomeStyle {
    fn default() -> Self {
        Self::Rectangle {
            color_background: "#5522aa".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetronomeConfiguration {
    pub title: String,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub style: MetronomeStyle,
    #[serde(default)]
    pub start_automatically: bool,
}

impl Default for MetronomeConfiguration {
    fn default() -> Self {
        Self {
            title: String::new(),
            bpm: 60.0,
            time_signature: TimeSignature::default(),
            style: MetronomeStyle::default(),
            start_automatically: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MetronomeState {
    pub paused: bool,
    pub visible_in_main_view: bool,
    pub playback_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_bpm_setting_hint_for_bpm: Option<f64>,
}

impl Default for MetronomeState {
    fn default() -> Self {
        Self {
            paused: false,
            visible_in_main_view: true,
            playback_rate: 1.0,
            show_bpm_setting_hint_for_bpm: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metronome {
    pub configuration: MetronomeConfiguration,
    #[serde(default)]
    pub state: MetronomeState,
}

impl Metronome {
    pub fn new(title: impl Into<String>, bpm: f64) -> Self {
        Self {
            configuration: MetronomeConfiguration {
                title: title.into(),
                bpm,
                ..MetronomeConfiguration::default()
            },
            state: MetronomeState::default(),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.configuration.bpm
    }

    pub fn display_title(&self) -> &str {
        if self.configuration.title.is_empty() {
            "Untitled"
        } else {
            &self.configuration.title
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Edit,
    Perform,
}

/// Application-wide settings, passed explicitly to whatever needs them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub debug_mode: bool,
    pub app_mode: AppMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub metronomes: Vec<Metronome>,
    pub policy: DriftPolicy,
    pub settings: Settings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            metronomes: vec![Metronome::new("", 60.0)],
            policy: DriftPolicy::default(),
            settings: Settings::default(),
        }
    }
}

impl AppConfig {
    /// Pick the metronome to run: an explicit index wins, otherwise the
    /// first unpaused one flagged to start automatically, otherwise the
    /// first unpaused one.
    pub fn select(&self, index: Option<usize>) -> Option<&Metronome> {
        match index {
            Some(i) => self.metronomes.get(i),
            None => {
                let unpaused = || self.metronomes.iter().filter(|m| !m.state.paused);
                unpaused()
                    .find(|m| m.configuration.start_automatically)
                    .or_else(|| unpaused().next())
            }
        }
    }

    /// Like [`select`](Self::select), but refuses a paused metronome.
    pub fn runnable(&self, index: Option<usize>) -> Result<&Metronome> {
        let metronome = self
            .select(index)
            .ok_or_else(|| SchedulerError::msg("no runnable metronome configured"))?;
        if metronome.state.paused {
            return Err(SchedulerError::msg(format!(
                "metronome \"{}\" is paused",
                metronome.display_title()
            )));
        }
        Ok(metronome)
    }
}
