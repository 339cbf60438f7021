use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::audio_api::{AudioCommand, EngineEvent};

mod engine;
mod frame;
mod instrumental;
mod sample_buffer;
mod sequencer;
mod transport;
mod voice;

pub use engine::{AudioSource, Engine, EngineError};
pub use frame::StereoFrame;
pub use instrumental::{InstrumentalError, InstrumentalPlayer};
pub use sample_buffer::{AssetError, SampleBuffer};
pub use sequencer::{Sequencer, SequencerError, SequencerState};
pub use transport::{samples_per_step, Transport};
pub use voice::{DrumVoice, Voice, VoiceBank};

/// Live output. Dropping the handle closes the stream, which drops the
/// engine and with it the active source.
pub struct AudioHandle {
    tx: Sender<AudioCommand>,
    event_rx: Receiver<EngineEvent>,
    sample_rate: u32,
    _output_stream: cpal::Stream,
}

impl AudioHandle {
    pub fn send(&self, cmd: AudioCommand) {
        if self.tx.try_send(cmd).is_err() {
            warn!("audio command queue full, command dropped");
        }
    }

    pub fn poll_events(&self) -> Vec<EngineEvent> {
        self.event_rx.try_iter().collect()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

pub fn start_audio(bpm: f64) -> anyhow::Result<AudioHandle> {
    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(1024);
    let (event_tx, event_rx) = crossbeam_channel::bounded::<EngineEvent>(1024);

    let host = cpal::default_host();
    let device = host.default_output_device().context("no default output device")?;
    let config = device.default_output_config().context("no default output config")?;

    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;

    match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let engine = Engine::new(sample_rate, bpm).with_events(event_tx);
            let output_stream = build_output_stream_f32(&device, &config.into(), rx, engine, channels)?;
            output_stream.play().context("failed to play output stream")?;
            info!(sample_rate, channels, "audio output started");

            Ok(AudioHandle {
                tx,
                event_rx,
                sample_rate,
                _output_stream: output_stream,
            })
        }
        other => anyhow::bail!("unsupported sample format {other:?} (only f32 supported for now)"),
    }
}

// ── Output stream ─────────────────────────────────────────────────

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<AudioCommand>,
    mut engine: Engine,
    channels: usize,
) -> anyhow::Result<cpal::Stream> {
    // sized once up front; only grows if the host hands us a bigger block
    let mut scratch = vec![StereoFrame::zero(); 4096];

    let err_fn = |err| error!("audio output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _info| {
            while let Ok(cmd) = rx.try_recv() {
                engine.handle_cmd(cmd);
            }

            let n_frames = data.len() / channels.max(1);
            if scratch.len() < n_frames {
                scratch.resize(n_frames, StereoFrame::zero());
            }
            let frames = &mut scratch[..n_frames];
            engine.render_block(frames);

            for (out, f) in data.chunks_exact_mut(channels.max(1)).zip(frames.iter()) {
                match out {
                    [mono] => *mono = (f.left + f.right) * 0.5,
                    [l, r, rest @ ..] => {
                        *l = f.left;
                        *r = f.right;
                        rest.fill(0.0);
                    }
                    [] => {}
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
