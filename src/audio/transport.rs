//! The shared musical clock.
//!
//! A `Transport` is an owned value: the realtime engine holds one, every
//! offline render builds its own, and tests can create as many as they like.
//! Steps are sixteenth notes; boundaries are tracked with a fractional
//! frame counter so a long render lands exactly where the tempo says.

use crate::shared::{clamp_bpm, STEPS_PER_BEAT, STEPS_PER_PATTERN};

#[derive(Debug, Clone)]
pub struct Transport {
    sample_rate: f64,
    bpm: f64,
    running: bool,
    /// Absolute frames elapsed since the last start from step 0.
    position: u64,
    /// Step that fires at the next boundary.
    next_step: u8,
    /// Frames left until that boundary (may dip slightly below zero after
    /// `advance` rounds up to whole frames).
    frames_until_step: f64,
    current_step: Option<u8>,
}

impl Transport {
    pub fn new(sample_rate: u32, bpm: f64) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            bpm: clamp_bpm(bpm),
            running: false,
            position: 0,
            next_step: 0,
            frames_until_step: 0.0,
            current_step: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate as u32
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Last step that fired, for playhead display.
    pub fn current_step(&self) -> Option<u8> {
        self.current_step
    }

    pub fn samples_per_step(&self) -> f64 {
        samples_per_step(self.sample_rate, self.bpm)
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop and rewind to step 0.
    pub fn stop(&mut self) {
        self.running = false;
        self.position = 0;
        self.next_step = 0;
        self.frames_until_step = 0.0;
        self.current_step = None;
    }

    /// Takes effect immediately. The step position is kept and the distance
    /// to the next boundary is rescaled to the new step length.
    pub fn set_bpm(&mut self, bpm: f64) {
        let bpm = clamp_bpm(bpm);
        if bpm == self.bpm {
            return;
        }
        let old = self.samples_per_step();
        self.bpm = bpm;
        if old > 0.0 && self.frames_until_step > 0.0 {
            self.frames_until_step *= self.samples_per_step() / old;
        }
    }

    /// Offset of the next step boundary if it falls within the next `max`
    /// frames. `Some(0)` means a step is due right now.
    pub fn frames_until_step(&self, max: usize) -> Option<usize> {
        if !self.running || max == 0 {
            return None;
        }
        let k = self.frames_until_step.max(0.0).ceil() as usize;
        (k < max).then_some(k)
    }

    pub fn advance(&mut self, frames: usize) {
        if !self.running {
            return;
        }
        self.position += frames as u64;
        self.frames_until_step -= frames as f64;
    }

    /// Consume the due boundary and return the step that fires on it.
    pub fn fire_step(&mut self) -> u8 {
        let step = self.next_step;
        self.current_step = Some(step);
        self.next_step = ((step as usize + 1) % STEPS_PER_PATTERN) as u8;
        self.frames_until_step += self.samples_per_step();
        step
    }
}

pub fn samples_per_step(sample_rate: f64, bpm: f64) -> f64 {
    sample_rate * 60.0 / (bpm * STEPS_PER_BEAT as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Drive the transport the way the engine does and collect (frame, step).
    fn run(t: &mut Transport, total: usize, block: usize) -> Vec<(u64, u8)> {
        let mut fired = Vec::new();
        let mut done = 0;
        while done < total {
            let len = block.min(total - done);
            let mut offset = 0;
            while offset < len {
                match t.frames_until_step(len - offset) {
                    Some(k) => {
                        t.advance(k);
                        offset += k;
                        fired.push((t.position(), t.fire_step()));
                    }
                    None => {
                        t.advance(len - offset);
                        offset = len;
                    }
                }
            }
            done += len;
        }
        fired
    }

    #[test]
    fn stopped_transport_never_fires() {
        let mut t = Transport::new(48000, 120.0);
        assert_eq!(t.frames_until_step(512), None);
        assert!(run(&mut t, 48000, 512).is_empty());
        assert_eq!(t.position(), 0);
    }

    #[test]
    fn steps_land_on_the_grid() {
        // 48000 * 60 / (120 * 4) = 6000 frames per step
        let mut t = Transport::new(48000, 120.0);
        t.start();
        let fired = run(&mut t, 6000 * 20, 512);
        assert_eq!(fired.len(), 20);
        for (i, (frame, step)) in fired.iter().enumerate() {
            assert_eq!(*frame, i as u64 * 6000);
            assert_eq!(*step as usize, i % 16);
        }
    }

    #[test]
    fn fractional_step_length_does_not_drift() {
        // 44100 * 60 / 480 = 5512.5 frames per step
        let mut t = Transport::new(44100, 120.0);
        t.start();
        let fired = run(&mut t, 44100 * 60, 333);
        let last = fired.last().unwrap();
        let expected = (fired.len() - 1) as f64 * 5512.5;
        assert!((last.0 as f64 - expected).abs() <= 1.0);
    }

    #[test]
    fn bpm_change_keeps_step_position() {
        let mut t = Transport::new(48000, 120.0);
        t.start();
        run(&mut t, 6000 * 5 + 100, 256); // steps 0..=5 fired
        assert_eq!(t.current_step(), Some(5));
        t.set_bpm(60.0);
        assert_eq!(t.current_step(), Some(5));
        let next = run(&mut t, 12000 * 2, 256);
        assert_eq!(next[0].1, 6);
        assert_eq!(next[1].1, 7);
        assert_eq!(next[1].0 - next[0].0, 12000);
    }

    #[test]
    fn stop_rewinds() {
        let mut t = Transport::new(48000, 120.0);
        t.start();
        run(&mut t, 20000, 512);
        t.stop();
        assert_eq!(t.current_step(), None);
        assert_eq!(t.position(), 0);
        t.start();
        assert_eq!(t.frames_until_step(1), Some(0));
        assert_eq!(t.fire_step(), 0);
    }

    #[test]
    fn bpm_is_clamped() {
        let mut t = Transport::new(48000, 5.0);
        assert_eq!(t.bpm(), crate::shared::MIN_BPM);
        t.set_bpm(10_000.0);
        assert_eq!(t.bpm(), crate::shared::MAX_BPM);
    }
}
