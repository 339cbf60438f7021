use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::frame::StereoFrame;
use crate::shared::{Instrument, NUM_INSTRUMENTS};

/// A sound generator the sequencer can schedule.
///
/// Times are absolute transport frames. `render_into` adds into `out`, it
/// never overwrites, so several voices can share one buffer.
pub trait Voice: Send {
    /// Schedule a hit at `at`. Voices are monophonic: a new hit replaces
    /// whatever was sounding.
    fn trigger(&mut self, at: u64);

    /// Mix frames `start..start + out.len()` into `out`.
    fn render_into(&mut self, start: u64, out: &mut [StereoFrame]);

    /// Silence the voice and drop any pending hit.
    fn release(&mut self);

    fn is_sounding(&self) -> bool;
}

// The hit shapes below are classic analog-drum recipes: a swept sine for the
// kick, tone plus noise for the snare, filtered noise for the hat and a few
// noise bursts for the clap.
pub struct DrumVoice {
    instrument: Instrument,
    sample_rate: f32,
    gain: f32,
    hit_at: Option<u64>,
    phase: f32,
    rng: StdRng,
    hp_prev_in: f32,
    hp_prev_out: f32,
    hp_coeff: f32,
}

impl DrumVoice {
    pub fn new(instrument: Instrument, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f32;
        // one-pole high pass around 7 kHz for the hat
        let rc = 1.0 / (TAU * 7000.0);
        let dt = 1.0 / sample_rate;
        Self {
            instrument,
            sample_rate,
            gain: default_gain(instrument),
            hit_at: None,
            phase: 0.0,
            rng: StdRng::seed_from_u64(noise_seed(instrument)),
            hp_prev_in: 0.0,
            hp_prev_out: 0.0,
            hp_coeff: rc / (rc + dt),
        }
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    fn length_frames(&self) -> u64 {
        let seconds = match self.instrument {
            Instrument::Kick => 0.5,
            Instrument::Snare => 0.25,
            Instrument::Hihat => 0.08,
            Instrument::Clap => 0.3,
        };
        (seconds * self.sample_rate) as u64
    }

    fn noise(&mut self) -> f32 {
        self.rng.gen_range(-1.0f32..1.0)
    }

    fn highpass(&mut self, x: f32) -> f32 {
        let y = self.hp_coeff * (self.hp_prev_out + x - self.hp_prev_in);
        self.hp_prev_in = x;
        self.hp_prev_out = y;
        y
    }

    fn sample_at(&mut self, age: f32) -> f32 {
        match self.instrument {
            Instrument::Kick => {
                let freq = 50.0 + 100.0 * (-age / 0.04).exp();
                self.phase += TAU * freq / self.sample_rate;
                if self.phase >= TAU {
                    self.phase -= TAU;
                }
                self.phase.sin() * (-age / 0.15).exp()
            }
            Instrument::Snare => {
                let noise = self.noise();
                let body = (TAU * 180.0 * age).sin();
                noise * (-age / 0.06).exp() * 0.7 + body * (-age / 0.03).exp() * 0.5
            }
            Instrument::Hihat => {
                let noise = self.noise();
                self.highpass(noise) * (-age / 0.015).exp()
            }
            Instrument::Clap => {
                let noise = self.noise();
                let bursts = [0.0f32, 0.012, 0.024]
                    .iter()
                    .filter(|&&b| age >= b)
                    .map(|&b| (-(age - b) / 0.008).exp())
                    .fold(0.0f32, f32::max);
                let tail = if age >= 0.03 {
                    (-(age - 0.03) / 0.08).exp()
                } else {
                    0.0
                };
                noise * bursts.max(tail) * 0.8
            }
        }
    }
}

impl Voice for DrumVoice {
    fn trigger(&mut self, at: u64) {
        self.hit_at = Some(at);
        self.phase = 0.0;
        // reseed so every hit (and every render) sounds the same
        self.rng = StdRng::seed_from_u64(noise_seed(self.instrument));
        self.hp_prev_in = 0.0;
        self.hp_prev_out = 0.0;
    }

    fn render_into(&mut self, start: u64, out: &mut [StereoFrame]) {
        let Some(hit) = self.hit_at else {
            return;
        };
        let len = self.length_frames();
        for (i, frame) in out.iter_mut().enumerate() {
            let now = start + i as u64;
            if now < hit {
                continue;
            }
            let age = now - hit;
            if age >= len {
                self.hit_at = None;
                break;
            }
            let s = self.sample_at(age as f32 / self.sample_rate);
            frame.add(StereoFrame::mono(s), self.gain);
        }
    }

    fn release(&mut self) {
        self.hit_at = None;
    }

    fn is_sounding(&self) -> bool {
        self.hit_at.is_some()
    }
}

fn default_gain(instrument: Instrument) -> f32 {
    match instrument {
        Instrument::Kick => 0.9,
        Instrument::Snare => 0.6,
        Instrument::Hihat => 0.35,
        Instrument::Clap => 0.5,
    }
}

fn noise_seed(instrument: Instrument) -> u64 {
    0x5eed_0000 + instrument.index() as u64
}

/// One voice per instrument. Build a fresh bank for every new beat source;
/// dropping it silences everything it owns.
pub struct VoiceBank {
    voices: [Box<dyn Voice>; NUM_INSTRUMENTS],
}

impl VoiceBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            voices: Instrument::ALL
                .map(|inst| Box::new(DrumVoice::new(inst, sample_rate)) as Box<dyn Voice>),
        }
    }

    /// Voices indexed in `Instrument::ALL` order.
    pub fn with_voices(voices: [Box<dyn Voice>; NUM_INSTRUMENTS]) -> Self {
        Self { voices }
    }

    pub fn trigger(&mut self, instrument: Instrument, at: u64) {
        self.voices[instrument.index()].trigger(at);
    }

    pub fn render_into(&mut self, start: u64, out: &mut [StereoFrame]) {
        for voice in self.voices.iter_mut() {
            voice.render_into(start, out);
        }
    }

    pub fn release_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.release();
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.voices.iter().any(|v| v.is_sounding())
    }
}

impl Drop for VoiceBank {
    fn drop(&mut self) {
        self.release_all();
    }
}
