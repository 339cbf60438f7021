//! Step sequencer: fires drum voices from a beat pattern on transport steps.
//!
//! Lifecycle: `load` arms it, `start`/`stop` flip between running and
//! armed, `dispose` tears it down for good. "Idle" (nothing loaded) is the
//! engine's `AudioSource::None`, not a state of this type.

use tracing::{debug, warn};

use super::frame::StereoFrame;
use super::voice::VoiceBank;
use crate::pipeline::pattern::{BeatPattern, PatternError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Armed,
    Running,
    Disposed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SequencerError {
    #[error("cannot start playback, {0}")]
    InvalidPattern(PatternError),
    #[error("sequencer has been disposed")]
    Disposed,
}

pub struct Sequencer {
    state: SequencerState,
    pattern: BeatPattern,
    error: Option<PatternError>,
    bank: VoiceBank,
}

impl Sequencer {
    /// Arm a sequencer from stored pattern text. A pattern that does not
    /// parse still arms, but silent and unable to start.
    pub fn load(raw: &str, bank: VoiceBank) -> Self {
        let (pattern, error) = BeatPattern::parse_or_empty(raw);
        if let Some(e) = &error {
            warn!(error = %e, "beat pattern rejected, sequencer stays silent");
        }
        Self {
            state: SequencerState::Armed,
            pattern,
            error,
            bank,
        }
    }

    pub fn with_pattern(pattern: BeatPattern, bank: VoiceBank) -> Self {
        Self {
            state: SequencerState::Armed,
            pattern,
            error: None,
            bank,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn pattern(&self) -> &BeatPattern {
        &self.pattern
    }

    pub fn error(&self) -> Option<&PatternError> {
        self.error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.error.is_none() && self.state != SequencerState::Disposed
    }

    pub fn start(&mut self) -> Result<(), SequencerError> {
        match self.state {
            SequencerState::Disposed => Err(SequencerError::Disposed),
            _ => {
                if let Some(e) = &self.error {
                    return Err(SequencerError::InvalidPattern(e.clone()));
                }
                self.state = SequencerState::Running;
                Ok(())
            }
        }
    }

    /// Back to armed. Ringing hits are cut so nothing sounds while stopped.
    pub fn stop(&mut self) {
        if self.state == SequencerState::Running {
            self.state = SequencerState::Armed;
            self.bank.release_all();
        }
    }

    /// Stop and release every voice. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.state == SequencerState::Disposed {
            return;
        }
        self.state = SequencerState::Disposed;
        self.bank.release_all();
        debug!("sequencer disposed");
    }

    /// Swap the pattern in place (step edits). Voices and run state stay.
    pub fn set_pattern(&mut self, pattern: BeatPattern) -> Result<(), SequencerError> {
        if self.state == SequencerState::Disposed {
            return Err(SequencerError::Disposed);
        }
        self.pattern = pattern;
        self.error = None;
        Ok(())
    }

    /// Trigger every instrument set on `step`, scheduled at frame `at`.
    /// Returns how many voices fired.
    pub fn fire_step(&mut self, step: u8, at: u64) -> usize {
        if self.state != SequencerState::Running {
            return 0;
        }
        let mut fired = 0;
        for inst in self.pattern.instruments_at(step) {
            self.bank.trigger(inst, at);
            fired += 1;
        }
        fired
    }

    pub fn render_into(&mut self, start: u64, out: &mut [StereoFrame]) {
        if self.state == SequencerState::Disposed {
            return;
        }
        self.bank.render_into(start, out);
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Instrument;

    const BASIC: &str = r#"{"kick":[0,8],"snare":[4,12]}"#;

    #[test]
    fn load_arms() {
        let seq = Sequencer::load(BASIC, VoiceBank::new(44100));
        assert_eq!(seq.state(), SequencerState::Armed);
        assert!(seq.is_ready());
        assert!(seq.pattern().is_active(Instrument::Kick, 8));
    }

    #[test]
    fn start_stop_cycle() {
        let mut seq = Sequencer::load(BASIC, VoiceBank::new(44100));
        seq.start().unwrap();
        assert_eq!(seq.state(), SequencerState::Running);
        seq.stop();
        assert_eq!(seq.state(), SequencerState::Armed);
        seq.start().unwrap();
        assert_eq!(seq.state(), SequencerState::Running);
    }

    #[test]
    fn malformed_pattern_cannot_start() {
        let mut seq = Sequencer::load("```json\n{\"kick\": [0, 8\n```", VoiceBank::new(44100));
        assert!(!seq.is_ready());
        assert!(matches!(seq.start(), Err(SequencerError::InvalidPattern(_))));
        assert_eq!(seq.state(), SequencerState::Armed);
        assert_eq!(seq.fire_step(0, 0), 0);
    }

    #[test]
    fn fires_only_when_running() {
        let mut seq = Sequencer::load(BASIC, VoiceBank::new(44100));
        assert_eq!(seq.fire_step(0, 0), 0);
        seq.start().unwrap();
        assert_eq!(seq.fire_step(0, 0), 1);
        assert_eq!(seq.fire_step(1, 100), 0);
        assert_eq!(seq.fire_step(4, 200), 1);
    }

    #[test]
    fn dispose_is_final() {
        let mut seq = Sequencer::load(BASIC, VoiceBank::new(44100));
        seq.start().unwrap();
        seq.fire_step(0, 0);
        seq.dispose();
        seq.dispose();
        assert_eq!(seq.state(), SequencerState::Disposed);
        assert_eq!(seq.start(), Err(SequencerError::Disposed));
        assert_eq!(seq.fire_step(0, 10), 0);

        let mut buf = vec![StereoFrame::zero(); 256];
        seq.render_into(0, &mut buf);
        assert!(buf.iter().all(|f| f.peak() == 0.0));
    }

    #[test]
    fn edit_clears_parse_error() {
        let mut seq = Sequencer::load("nope", VoiceBank::new(44100));
        assert!(seq.error().is_some());
        let p = BeatPattern::new().with_steps(Instrument::Clap, &[3]).unwrap();
        seq.set_pattern(p).unwrap();
        assert!(seq.is_ready());
        seq.start().unwrap();
        assert_eq!(seq.fire_step(3, 0), 1);
    }
}
