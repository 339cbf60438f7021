//! Looped backing track that stands in for the sequencer.
//!
//! Playback position is derived from the shared transport, so stopping the
//! transport rewinds the track and the tempo readout keeps ticking along
//! with it.

use tracing::debug;

use super::frame::StereoFrame;
use super::sample_buffer::SampleBuffer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentalError {
    #[error("instrumental asset is empty")]
    EmptyAsset,
}

pub struct InstrumentalPlayer {
    buffer: SampleBuffer,
    gain: f32,
    released: bool,
}

impl InstrumentalPlayer {
    pub fn new(buffer: SampleBuffer) -> Result<Self, InstrumentalError> {
        if buffer.is_empty() {
            return Err(InstrumentalError::EmptyAsset);
        }
        debug!(frames = buffer.len(), "instrumental loaded");
        Ok(Self {
            buffer,
            gain: 1.0,
            released: false,
        })
    }

    /// Ready as soon as the asset is loaded, which construction guarantees.
    pub fn is_ready(&self) -> bool {
        !self.released
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Mix frames `start..start + out.len()` of the looped track into `out`.
    pub fn render_into(&mut self, start: u64, out: &mut [StereoFrame]) {
        if self.released {
            return;
        }
        let len = self.buffer.len() as u64;
        for (i, frame) in out.iter_mut().enumerate() {
            let idx = ((start + i as u64) % len) as usize;
            frame.add(self.buffer.data[idx], self.gain);
        }
    }

    pub fn release(&mut self) {
        self.released = true;
    }
}
