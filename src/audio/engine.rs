use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::frame::{silence, StereoFrame};
use super::instrumental::{InstrumentalError, InstrumentalPlayer};
use super::sample_buffer::SampleBuffer;
use super::sequencer::{Sequencer, SequencerError};
use super::transport::Transport;
use super::voice::VoiceBank;
use crate::audio_api::{AudioCommand, EngineEvent};
use crate::pipeline::pattern::BeatPattern;
use crate::shared::{PlaybackState, SourceKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("nothing to play, load a beat pattern or an instrumental first")]
    NoSource,
    #[error("step edits need the sequencer as the active source")]
    NotSequencer,
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Instrumental(#[from] InstrumentalError),
}

/// Whatever currently feeds the output. One variant at a time, so the
/// sequencer and the instrumental can never both be connected.
pub enum AudioSource {
    None,
    Sequencer(Sequencer),
    Instrumental(InstrumentalPlayer),
}

impl AudioSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AudioSource::None => SourceKind::None,
            AudioSource::Sequencer(_) => SourceKind::Sequencer,
            AudioSource::Instrumental(_) => SourceKind::Instrumental,
        }
    }

    /// The signal the play control keys off: a parsed pattern for the
    /// sequencer, a loaded asset for the instrumental.
    pub fn is_ready(&self) -> bool {
        match self {
            AudioSource::None => false,
            AudioSource::Sequencer(s) => s.is_ready(),
            AudioSource::Instrumental(p) => p.is_ready(),
        }
    }

    fn start(&mut self) -> Result<(), EngineError> {
        match self {
            AudioSource::None => Err(EngineError::NoSource),
            AudioSource::Sequencer(s) => Ok(s.start()?),
            AudioSource::Instrumental(p) => {
                if p.is_ready() {
                    Ok(())
                } else {
                    Err(EngineError::NoSource)
                }
            }
        }
    }

    fn stop(&mut self) {
        if let AudioSource::Sequencer(s) = self {
            s.stop();
        }
    }

    fn dispose(&mut self) {
        match self {
            AudioSource::None => {}
            AudioSource::Sequencer(s) => s.dispose(),
            AudioSource::Instrumental(p) => p.release(),
        }
    }

    fn fire_step(&mut self, step: u8, at: u64) -> usize {
        match self {
            AudioSource::Sequencer(s) => s.fire_step(step, at),
            _ => 0,
        }
    }

    fn render_into(&mut self, start: u64, out: &mut [StereoFrame]) {
        match self {
            AudioSource::None => {}
            AudioSource::Sequencer(s) => s.render_into(start, out),
            AudioSource::Instrumental(p) => p.render_into(start, out),
        }
    }
}

/// Owns the transport and the active source. Runs inside the output stream
/// callback for live playback and on its own for offline renders.
pub struct Engine {
    sample_rate: u32,
    transport: Transport,
    source: AudioSource,
    master_gain: f32,
    events: Option<Sender<EngineEvent>>,
    triggers: u64,
}

impl Engine {
    pub fn new(sample_rate: u32, bpm: f64) -> Self {
        Self {
            sample_rate,
            transport: Transport::new(sample_rate, bpm),
            source: AudioSource::None,
            master_gain: 0.8,
            events: None,
            triggers: 0,
        }
    }

    pub fn with_events(mut self, tx: Sender<EngineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn source(&self) -> &AudioSource {
        &self.source
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn is_ready(&self) -> bool {
        self.source.is_ready()
    }

    /// Voice triggers fired since the engine was built.
    pub fn trigger_count(&self) -> u64 {
        self.triggers
    }

    pub fn playback(&self) -> PlaybackState {
        PlaybackState {
            running: self.transport.is_running(),
            current_step: self.transport.current_step(),
            bpm: self.transport.bpm(),
        }
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        let result = match cmd {
            AudioCommand::LoadPattern { raw } => {
                self.load_pattern(&raw);
                Ok(())
            }
            AudioCommand::EditPattern(pattern) => self.edit_pattern(pattern),
            AudioCommand::LoadInstrumental { buffer } => self.load_instrumental(buffer),
            AudioCommand::ClearSource => {
                self.clear_source();
                Ok(())
            }
            AudioCommand::Play => self.play(),
            AudioCommand::Stop => {
                self.stop();
                Ok(())
            }
            AudioCommand::TogglePlay => self.toggle_play(),
            AudioCommand::SetBpm(bpm) => {
                self.set_bpm(bpm);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "engine command failed");
            self.emit(EngineEvent::Error(e.to_string()));
        }
    }

    /// Stop the clock and dispose the current source. Runs before any new
    /// source is installed.
    fn teardown(&mut self) {
        let was_running = self.transport.is_running();
        self.transport.stop();
        let mut old = std::mem::replace(&mut self.source, AudioSource::None);
        old.dispose();
        drop(old);
        if was_running {
            self.emit(EngineEvent::Transport { running: false });
        }
    }

    pub fn set_source(&mut self, source: AudioSource) {
        self.teardown();
        self.source = source;
        debug!(kind = ?self.source.kind(), ready = self.source.is_ready(), "audio source installed");
        self.emit(EngineEvent::Source {
            kind: self.source.kind(),
            ready: self.source.is_ready(),
        });
    }

    /// New sequencer with fresh synthesized voices. A bad pattern still
    /// installs a (silent) sequencer and reports one error.
    pub fn load_pattern(&mut self, raw: &str) {
        self.teardown();
        let bank = VoiceBank::new(self.sample_rate);
        self.install_sequencer(Sequencer::load(raw, bank));
    }

    /// Same as `load_pattern` with caller-supplied voices.
    pub fn load_pattern_with_voices(&mut self, raw: &str, bank: VoiceBank) {
        self.teardown();
        self.install_sequencer(Sequencer::load(raw, bank));
    }

    fn install_sequencer(&mut self, seq: Sequencer) {
        let error = seq.error().map(|e| e.to_string());
        self.set_source(AudioSource::Sequencer(seq));
        if let Some(message) = error {
            self.emit(EngineEvent::Error(message));
        }
    }

    pub fn load_instrumental(&mut self, buffer: SampleBuffer) -> Result<(), EngineError> {
        let player = InstrumentalPlayer::new(buffer)?;
        self.set_source(AudioSource::Instrumental(player));
        Ok(())
    }

    pub fn clear_source(&mut self) {
        self.set_source(AudioSource::None);
    }

    pub fn edit_pattern(&mut self, pattern: BeatPattern) -> Result<(), EngineError> {
        match &mut self.source {
            AudioSource::Sequencer(seq) => {
                seq.set_pattern(pattern)?;
                let ready = seq.is_ready();
                self.emit(EngineEvent::Source {
                    kind: SourceKind::Sequencer,
                    ready,
                });
                Ok(())
            }
            _ => Err(EngineError::NotSequencer),
        }
    }

    pub fn play(&mut self) -> Result<(), EngineError> {
        if self.transport.is_running() {
            return Ok(());
        }
        self.source.start()?;
        self.transport.start();
        info!(bpm = self.transport.bpm(), kind = ?self.source.kind(), "transport started");
        self.emit(EngineEvent::Transport { running: true });
        Ok(())
    }

    pub fn stop(&mut self) {
        self.source.stop();
        if self.transport.is_running() {
            self.transport.stop();
            info!("transport stopped");
            self.emit(EngineEvent::Transport { running: false });
        }
    }

    pub fn toggle_play(&mut self) -> Result<(), EngineError> {
        if self.transport.is_running() {
            self.stop();
            Ok(())
        } else {
            self.play()
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    /// Fill `out` with the next block. The block is split at step
    /// boundaries so every hit starts on its exact frame; the step event for
    /// the UI goes out right where the voices are triggered.
    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        silence(out);
        let mut offset = 0;
        loop {
            let remaining = out.len() - offset;
            if remaining == 0 {
                break;
            }
            let due = self.transport.frames_until_step(remaining);
            let span = due.unwrap_or(remaining);
            if span > 0 {
                if self.transport.is_running() {
                    let start = self.transport.position();
                    self.source.render_into(start, &mut out[offset..offset + span]);
                }
                self.transport.advance(span);
                offset += span;
            }
            if due.is_some() {
                let at = self.transport.position();
                let step = self.transport.fire_step();
                self.triggers += self.source.fire_step(step, at) as u64;
                self.emit(EngineEvent::Step(step));
            }
        }

        let gain = self.master_gain;
        for f in out.iter_mut() {
            f.left = (f.left * gain).tanh();
            f.right = (f.right * gain).tanh();
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.source.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(engine: Engine) -> (Engine, crossbeam_channel::Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (engine.with_events(tx), rx)
    }

    fn render(engine: &mut Engine, frames: usize) -> Vec<StereoFrame> {
        let mut buf = vec![StereoFrame::zero(); frames];
        for chunk in buf.chunks_mut(512) {
            engine.render_block(chunk);
        }
        buf
    }

    #[test]
    fn play_without_source_reports_error() {
        let (mut engine, rx) = events(Engine::new(44100, 120.0));
        engine.handle_cmd(AudioCommand::Play);
        assert!(!engine.transport().is_running());
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![EngineEvent::Error(EngineError::NoSource.to_string())]);
    }

    #[test]
    fn stopped_engine_is_silent() {
        let mut engine = Engine::new(44100, 120.0);
        engine.load_pattern(r#"{"kick":[0,4,8,12]}"#);
        let out = render(&mut engine, 44100);
        assert!(out.iter().all(|f| f.peak() == 0.0));
    }

    #[test]
    fn running_pattern_makes_sound() {
        let mut engine = Engine::new(44100, 120.0);
        engine.load_pattern(r#"{"kick":[0,4,8,12]}"#);
        engine.play().unwrap();
        let out = render(&mut engine, 44100);
        assert!(out.iter().any(|f| f.peak() > 0.1));
        assert!(out.iter().all(|f| f.peak() < 1.0));
        // 44100 frames at 5512.5 per step: steps 0..=7, kick on 0 and 4
        assert_eq!(engine.trigger_count(), 2);
    }

    #[test]
    fn malformed_pattern_is_silent_with_one_error() {
        let (mut engine, rx) = events(Engine::new(44100, 120.0));
        engine.handle_cmd(AudioCommand::LoadPattern {
            raw: "{\"kick\": [0, 8".to_string(),
        });
        engine.handle_cmd(AudioCommand::Play);
        let out = render(&mut engine, 22050);
        assert!(out.iter().all(|f| f.peak() == 0.0));
        assert!(!engine.transport().is_running());
        assert_eq!(engine.source_kind(), SourceKind::Sequencer);
        assert!(!engine.is_ready());

        let errors = rx
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::Error(_)))
            .count();
        // one from the load, one from the refused play
        assert_eq!(errors, 2);
    }

    #[test]
    fn step_events_follow_the_transport() {
        let (mut engine, rx) = events(Engine::new(48000, 120.0));
        engine.load_pattern(r#"{"hihat":[0,2,4,6,8,10,12,14]}"#);
        engine.play().unwrap();
        render(&mut engine, 6000 * 16);
        let steps: Vec<u8> = rx
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::Step(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(steps, (0..16).collect::<Vec<u8>>());
        assert_eq!(engine.trigger_count(), 8);
    }

    #[test]
    fn edits_need_a_sequencer() {
        let mut engine = Engine::new(44100, 120.0);
        assert_eq!(
            engine.edit_pattern(BeatPattern::new()),
            Err(EngineError::NotSequencer)
        );
        engine.load_pattern("broken");
        assert!(!engine.is_ready());
        engine.edit_pattern(BeatPattern::new()).unwrap();
        assert!(engine.is_ready());
    }

    #[test]
    fn instrumental_plays_only_while_running() {
        let mut engine = Engine::new(44100, 120.0);
        let buffer = SampleBuffer::from_frames(vec![StereoFrame::mono(0.25); 1000], 44100);
        engine.load_instrumental(buffer).unwrap();
        assert!(engine.is_ready());
        assert!(render(&mut engine, 512).iter().all(|f| f.peak() == 0.0));
        engine.play().unwrap();
        assert!(render(&mut engine, 2048).iter().all(|f| f.peak() > 0.1));
        engine.stop();
        assert!(render(&mut engine, 512).iter().all(|f| f.peak() == 0.0));
    }

    #[test]
    fn switching_source_stops_the_transport() {
        let mut engine = Engine::new(44100, 120.0);
        engine.load_pattern(r#"{"kick":[0]}"#);
        engine.play().unwrap();
        render(&mut engine, 1024);
        engine.clear_source();
        assert!(!engine.transport().is_running());
        assert_eq!(engine.source_kind(), SourceKind::None);
    }
}
