use std::path::Path;

use super::frame::StereoFrame;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("could not read WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported channel count {0} (mono or stereo only)")]
    UnsupportedChannels(u16),
    #[error("audio asset contains no frames")]
    Empty,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBuffer {
    pub data: Vec<StereoFrame>, // the audio data array
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn from_frames(data: Vec<StereoFrame>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    // Load a WAV file from disk, converted to stereo at `target_rate`
    pub fn load_wav(path: &Path, target_rate: u32) -> Result<Self, AssetError> {
        let reader = hound::WavReader::open(path)?;
        Self::from_reader(reader, target_rate)
    }

    pub fn from_wav_bytes(bytes: &[u8], target_rate: u32) -> Result<Self, AssetError> {
        let reader = hound::WavReader::new(std::io::Cursor::new(bytes))?;
        Self::from_reader(reader, target_rate)
    }

    fn from_reader<R: std::io::Read>(
        mut reader: hound::WavReader<R>,
        target_rate: u32,
    ) -> Result<Self, AssetError> {
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(AssetError::UnsupportedChannels(spec.channels));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader // float, just pass it through
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let frames: Vec<StereoFrame> = if spec.channels == 1 {
            samples.into_iter().map(StereoFrame::mono).collect()
        } else {
            samples
                .chunks_exact(2)
                .map(|c| StereoFrame {
                    left: c[0],
                    right: c[1],
                })
                .collect()
        };
        if frames.is_empty() {
            return Err(AssetError::Empty);
        }

        let data = if spec.sample_rate != target_rate {
            resample_linear(&frames, spec.sample_rate, target_rate)
        } else {
            frames
        };
        Ok(Self {
            data,
            sample_rate: target_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.sample_rate as f64
    }
}

// Plain linear interpolation. Good enough for backing tracks.
fn resample_linear(frames: &[StereoFrame], source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate {
        return frames.to_vec();
    }
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (frames.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        if idx >= frames.len().saturating_sub(1) {
            out.push(*frames.last().unwrap_or(&StereoFrame::zero()));
        } else {
            let a = frames[idx];
            let b = frames[idx + 1];
            out.push(StereoFrame {
                left: a.left * (1.0 - frac) + b.left * frac,
                right: a.right * (1.0 - frac) + b.right * frac,
            });
        }
    }
    out
}
