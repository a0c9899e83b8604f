//! Glottal pulse train: square oscillator → rising-edge impulse generator.
//!
//! Runs on the sample-rate domain. Nothing here allocates or locks; the
//! oscillator frequency is read from a [`SharedFrequency`] written by the
//! control domain.

use std::sync::atomic::{AtomicU32, Ordering};

/// Single-writer / single-reader f0 cell.
///
/// The `f32` bit pattern lives in one `AtomicU32`, so a reader never
/// observes a half-written value.
#[derive(Debug)]
pub struct SharedFrequency(AtomicU32);

impl SharedFrequency {
    pub fn new(hz: f32) -> Self {
        Self(AtomicU32::new(hz.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, hz: f32) {
        self.0.store(hz.to_bits(), Ordering::Release);
    }
}

impl Default for SharedFrequency {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Edge-detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeState {
    #[default]
    Low,
    High,
}

/// Turns a square/gate signal into one-sample unit impulses on each
/// non-positive → positive transition.
#[derive(Debug, Clone, Default)]
pub struct PulseGenerator {
    state: EdgeState,
}

impl PulseGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a single sample.
    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> f32 {
        let high = sample > 0.0;
        let out = if self.state == EdgeState::Low && high {
            1.0
        } else {
            0.0
        };
        self.state = if high { EdgeState::High } else { EdgeState::Low };
        out
    }

    /// Process a block. `output` must be at least as long as `input`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.next_sample(*x);
        }
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = EdgeState::Low;
    }
}

/// Phase-accumulating square wave in `{-1, +1}`.
///
/// The first half of each cycle is positive, so a freshly reset oscillator
/// with a positive frequency produces a rising edge on its first sample.
#[derive(Debug, Clone)]
pub struct SquareOscillator {
    sample_rate: f32,
    /// Phase in cycles, `[0, 1)`.
    phase: f32,
}

impl SquareOscillator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            phase: 0.0,
        }
    }

    /// Advance one sample at `frequency` Hz. Non-positive or non-finite
    /// frequencies hold the oscillator low.
    #[inline]
    pub fn next_sample(&mut self, frequency: f32) -> f32 {
        if !frequency.is_finite() || frequency <= 0.0 {
            return -1.0;
        }
        let out = if self.phase < 0.5 { 1.0 } else { -1.0 };
        self.phase += frequency / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        out
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_on_rising_edges() {
        let mut pg = PulseGenerator::new();
        let input = [-1.0, 1.0, 1.0, -1.0, 1.0];
        let mut output = [9.0f32; 5];
        pg.process(&input, &mut output);
        assert_eq!(output, [0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn zero_counts_as_non_positive() {
        let mut pg = PulseGenerator::new();
        let input = [0.0, 0.5, 0.0, 0.0, 0.25, 0.25];
        let mut output = [0.0f32; 6];
        pg.process(&input, &mut output);
        assert_eq!(output, [0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn state_persists_across_blocks() {
        let mut pg = PulseGenerator::new();
        let mut out = [0.0f32; 2];
        pg.process(&[-1.0, 1.0], &mut out);
        assert_eq!(out, [0.0, 1.0]);
        // Still high from the previous block: no new edge.
        pg.process(&[1.0, 1.0], &mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(pg.state(), EdgeState::High);
    }

    #[test]
    fn reset_returns_to_low() {
        let mut pg = PulseGenerator::new();
        pg.next_sample(1.0);
        pg.reset();
        assert_eq!(pg.state(), EdgeState::Low);
        assert_eq!(pg.next_sample(1.0), 1.0);
    }

    #[test]
    fn oscillator_pulse_spacing_tracks_frequency() {
        let mut osc = SquareOscillator::new(8000);
        let mut pg = PulseGenerator::new();
        let edges: Vec<usize> = (0..1000)
            .filter(|_| pg.next_sample(osc.next_sample(125.0)) > 0.0)
            .collect();
        assert_eq!(edges.len(), 16);
        for pair in edges.windows(2) {
            assert_eq!(pair[1] - pair[0], 64);
        }
    }

    #[test]
    fn oscillator_is_silent_without_pitch() {
        let mut osc = SquareOscillator::new(8000);
        assert!((0..100).all(|_| osc.next_sample(0.0) < 0.0));
        assert!((0..100).all(|_| osc.next_sample(f32::NAN) < 0.0));
    }

    #[test]
    fn shared_frequency_round_trips_bits() {
        let f = SharedFrequency::new(0.0);
        f.store(123.456);
        assert_eq!(f.load(), 123.456);
    }
}
