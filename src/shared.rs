// Vocabulary shared by the engine, the session layer and the TUI.
//
// Play-mode keys (resolved by tui/input.rs):
//   Space         //  TogglePlay
//   arrows, hjkl  //  CursorLeft / CursorRight / CursorUp / CursorDown
//   Enter         //  ToggleStep at the cursor (not while the instrumental plays)
//   + - / [ ]     //  NudgeBpm(+-1) / NudgeBpm(+-10)
//   i             //  SwitchSource (sequencer <-> instrumental, if an asset was given)
//   r             //  Render (ignored while a render is in flight)
//   R             //  Retry whatever the error banner offers
//   x             //  DismissBanner
//   s             //  Save
//   Esc, q        //  Quit
//
// The session owns every bit of state; the TUI only draws the DisplayState it
// gets each frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const STEPS_PER_PATTERN: usize = 16;
pub const NUM_INSTRUMENTS: usize = 4;
pub const STEPS_PER_BEAT: u32 = 4;
pub const BEATS_PER_MEASURE: u32 = 4;
pub const RENDER_MEASURES: u32 = 16; // fixed offline render length

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: u32 = 120;

pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        DEFAULT_BPM as f64
    }
}

/// The four drum roles a beat pattern can address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Kick,
    Snare,
    Hihat,
    Clap,
}

impl Instrument {
    pub const ALL: [Instrument; NUM_INSTRUMENTS] = [
        Instrument::Kick,
        Instrument::Snare,
        Instrument::Hihat,
        Instrument::Clap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Instrument::Kick => "kick",
            Instrument::Snare => "snare",
            Instrument::Hihat => "hihat",
            Instrument::Clap => "clap",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Instrument::Kick => "KICK",
            Instrument::Snare => "SNARE",
            Instrument::Hihat => "HIHAT",
            Instrument::Clap => "CLAP",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown instrument '{0}' (expected kick, snare, hihat or clap)")]
pub struct UnknownInstrument(pub String);

impl FromStr for Instrument {
    type Err = UnknownInstrument;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kick" => Ok(Instrument::Kick),
            "snare" => Ok(Instrument::Snare),
            "hihat" | "hi-hat" | "hat" => Ok(Instrument::Hihat),
            "clap" => Ok(Instrument::Clap),
            other => Err(UnknownInstrument(other.to_string())),
        }
    }
}

/// Ephemeral transport view. Never persisted; the project only keeps the bpm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackState {
    pub running: bool,
    pub current_step: Option<u8>,
    pub bpm: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            running: false,
            current_step: None,
            bpm: DEFAULT_BPM as f64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    None,
    Sequencer,
    Instrumental,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    TogglePlay,
    CursorLeft,
    CursorRight,
    CursorUp,
    CursorDown,
    ToggleStep,
    NudgeBpm(i32),
    SwitchSource,
    Render,
    Retry,
    DismissBanner,
    Save,
    Quit,
}

/// Operations the error banner can offer to run again with the same inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryAction {
    Render,
    Play,
    Save,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Banner {
    pub message: String,
    pub retry: Option<RetryAction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedState {
    Off,
    OnMedium, // step is set
    OnHigh,   // step is set and under the playhead
    Blink,    // cursor
}

#[derive(Clone, Debug)]
pub struct DisplayState {
    pub leds: [[LedState; STEPS_PER_PATTERN]; NUM_INSTRUMENTS],
    pub playing_step: Option<u8>,
    pub cursor: (usize, usize), // (instrument row, step)
    pub playing: bool,
    pub ready: bool,
    pub source: SourceKind,
    pub bpm: f64,
    pub project_name: String,
    pub song_title: String,
    pub busy: bool, // a render is in flight
    pub banner: Option<Banner>,
    pub status_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_names_round_trip() {
        for inst in Instrument::ALL {
            assert_eq!(inst.as_str().parse::<Instrument>().unwrap(), inst);
        }
        assert_eq!("Hi-Hat".parse::<Instrument>().unwrap(), Instrument::Hihat);
        assert!("cowbell".parse::<Instrument>().is_err());
    }

    #[test]
    fn bpm_is_clamped() {
        assert_eq!(clamp_bpm(10.0), MIN_BPM);
        assert_eq!(clamp_bpm(999.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), DEFAULT_BPM as f64);
        assert_eq!(clamp_bpm(128.0), 128.0);
    }
}
