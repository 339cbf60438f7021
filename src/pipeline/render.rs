// Offline render: the same engine the live output uses, driven block by block
// into memory instead of a device callback, then encoded as FLAC.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::pattern::{BeatPattern, PatternError};
use crate::audio::{AudioSource, Engine, EngineError, SampleBuffer, Sequencer, StereoFrame, VoiceBank};
use crate::shared::{clamp_bpm, BEATS_PER_MEASURE, RENDER_MEASURES};

const BLOCK: usize = 1024;
const FLAC_BLOCK: usize = 4096;
const FLAC_LEVEL: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot render, {0}")]
    InvalidPattern(#[from] PatternError),
    #[error("cannot render an empty instrumental")]
    EmptyInstrumental,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("FLAC encoding failed: {0}")]
    Encode(String),
    #[error("could not write render: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct RenderedAudio {
    pub frames: Vec<StereoFrame>,
    pub sample_rate: u32,
}

impl RenderedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }

    /// 16-bit stereo FLAC, fed to the encoder in fixed-size interleaved
    /// blocks.
    pub fn encode_flac(&self) -> Result<Vec<u8>, RenderError> {
        use flac_bound::{FlacEncoder, WriteWrapper};

        let mut output = Vec::new();
        let config = FlacEncoder::new()
            .ok_or_else(|| RenderError::Encode("encoder init failed".to_string()))?
            .channels(2)
            .sample_rate(self.sample_rate)
            .bits_per_sample(16)
            .compression_level(FLAC_LEVEL);

        let mut wrapper = WriteWrapper(&mut output);
        let mut encoder = config
            .init_write(&mut wrapper)
            .map_err(|e| RenderError::Encode(format!("init write failed: {e:?}")))?;

        let mut block = Vec::with_capacity(FLAC_BLOCK * 2);
        for chunk in self.frames.chunks(FLAC_BLOCK) {
            block.clear();
            for f in chunk {
                block.push(to_i16(f.left) as i32);
                block.push(to_i16(f.right) as i32);
            }
            encoder
                .process_interleaved(&block, chunk.len() as u32)
                .map_err(|e| RenderError::Encode(format!("process failed: {e:?}")))?;
        }
        encoder
            .finish()
            .map_err(|e| RenderError::Encode(format!("finish failed: {e:?}")))?;

        Ok(output)
    }

    /// Encode and write `<dir>/<file_name>`. Nothing appears at the target
    /// path unless the whole file made it to disk.
    pub fn write_to(&self, dir: &Path, file_name: &str) -> Result<PathBuf, RenderError> {
        let bytes = self.encode_flac()?;
        let path = write_atomic(dir, file_name, &bytes)?;
        info!(path = %path.display(), secs = self.duration_secs(), "render written");
        Ok(path)
    }
}

fn to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Write through a temp file in `dir`, renamed into place on success.
pub fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}

/// Length of a pattern render: a fixed number of 4/4 measures.
pub fn render_duration_secs(bpm: f64) -> f64 {
    (RENDER_MEASURES * BEATS_PER_MEASURE) as f64 * 60.0 / clamp_bpm(bpm)
}

pub fn render_frames(bpm: f64, sample_rate: u32) -> usize {
    (render_duration_secs(bpm) * sample_rate as f64).round() as usize
}

/// Render a pattern on a fresh engine with fresh voices.
pub fn render_pattern(pattern: &BeatPattern, bpm: f64, sample_rate: u32) -> Result<RenderedAudio, RenderError> {
    let mut engine = Engine::new(sample_rate, bpm);
    let bank = VoiceBank::new(sample_rate);
    engine.set_source(AudioSource::Sequencer(Sequencer::with_pattern(pattern.clone(), bank)));
    let total = render_frames(bpm, sample_rate);
    debug!(frames = total, bpm, "rendering pattern");
    run(&mut engine, total, sample_rate)
}

/// Parse stored pattern text first; a bad pattern refuses to render instead
/// of producing silence.
pub fn render_pattern_text(raw: &str, bpm: f64, sample_rate: u32) -> Result<RenderedAudio, RenderError> {
    let pattern = BeatPattern::parse(raw)?;
    render_pattern(&pattern, bpm, sample_rate)
}

/// One pass over the asset, at the asset's own rate.
pub fn render_instrumental(buffer: &SampleBuffer, bpm: f64) -> Result<RenderedAudio, RenderError> {
    if buffer.is_empty() {
        return Err(RenderError::EmptyInstrumental);
    }
    let sample_rate = buffer.sample_rate;
    let mut engine = Engine::new(sample_rate, bpm);
    engine.load_instrumental(buffer.clone())?;
    debug!(frames = buffer.len(), "rendering instrumental");
    run(&mut engine, buffer.len(), sample_rate)
}

fn run(engine: &mut Engine, total: usize, sample_rate: u32) -> Result<RenderedAudio, RenderError> {
    engine.play()?;
    let mut frames = vec![StereoFrame::zero(); total];
    for chunk in frames.chunks_mut(BLOCK) {
        engine.render_block(chunk);
    }
    engine.stop();
    Ok(RenderedAudio { frames, sample_rate })
}
