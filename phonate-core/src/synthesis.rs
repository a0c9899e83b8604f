//! Spectral-envelope → one-period impulse response.
//!
//! ## Algorithm
//!
//! 1. Half-spectrum log magnitude: `ln(P·(1 − ap) + ε) / 2` for bins `0..=N/2`.
//! 2. Mirror into a real, symmetric length-`N` sequence.
//! 3. Forward FFT → complex cepstrum; fold to the causal (minimum-phase) half.
//! 4. Forward FFT again, then `exp(x / N)` per bin → minimum-phase spectrum.
//! 5. Linear phase rotation for a fractional-sample time shift.
//! 6. Inverse FFT via conjugate symmetry, fftshift by `N/2`.
//! 7. Scale by `√(fs / f0) / N` to normalise energy per pitch period.
//!
//! Both forward and inverse transforms are planned once per `Synthesizer`;
//! the heavy buffers are reused across calls.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::{debug, error};

use crate::error::{Result, VocoderError};
use crate::frame::{bin_count, validate_pitch, ImpulseResponse, PowerSpectrum};

/// Floor added before every logarithm so silent bins never reach `ln(0)`.
pub const SAFE_GUARD_MINIMUM: f64 = 1e-12;

/// Strategy for the aperiodic (noise) share of each bin.
///
/// Ratios must lie in `[0, 1]`; the synthesizer clamps whatever is written.
/// Only the periodic path is synthesized, so a non-zero ratio simply removes
/// that share of power from the voiced excitation.
pub trait AperiodicityModel: Send + 'static {
    /// Fill `ratio` (length `N/2 + 1`) for the given linear spectrum and f0.
    fn aperiodic_ratio(&mut self, spectrum: &[f64], f0: f64, ratio: &mut [f64]);
}

/// Purely periodic excitation: every bin's aperiodic ratio is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroAperiodicity;

impl AperiodicityModel for ZeroAperiodicity {
    fn aperiodic_ratio(&mut self, _spectrum: &[f64], _f0: f64, ratio: &mut [f64]) {
        ratio.fill(0.0);
    }
}

/// Reusable minimum-phase synthesizer for one `(fft_size, sample_rate)` pair.
pub struct Synthesizer {
    fft_size: usize,
    sample_rate: u32,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    aperiodicity: Box<dyn AperiodicityModel>,
    /// Working spectrum/cepstrum, length `fft_size`.
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    ratio: Vec<f64>,
}

impl Synthesizer {
    /// Plan transforms for `fft_size` with the zero-aperiodicity model.
    ///
    /// # Errors
    /// `InvalidInput` if `fft_size` is odd or smaller than 4, or the sample
    /// rate is zero.
    pub fn new(fft_size: usize, sample_rate: u32) -> Result<Self> {
        Self::with_aperiodicity(fft_size, sample_rate, Box::new(ZeroAperiodicity))
    }

    pub fn with_aperiodicity(
        fft_size: usize,
        sample_rate: u32,
        aperiodicity: Box<dyn AperiodicityModel>,
    ) -> Result<Self> {
        if fft_size < 4 || fft_size % 2 != 0 {
            return Err(VocoderError::InvalidInput(format!(
                "fft_size must be even and at least 4, got {fft_size}"
            )));
        }
        if sample_rate == 0 {
            return Err(VocoderError::InvalidInput("sample_rate must be non-zero".into()));
        }

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        debug!(fft_size, sample_rate, "synthesizer planned");

        Ok(Self {
            fft_size,
            sample_rate,
            forward,
            inverse,
            aperiodicity,
            buf: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            ratio: vec![0.0; bin_count(fft_size)],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Synthesize one pitch period from a linear power spectrum.
    ///
    /// # Errors
    /// - `SpectrumLength` if `spectrum` does not have `fft_size / 2 + 1` bins.
    /// - `InvalidInput` for f0 ≤ 0, non-finite f0/bins or a non-finite shift.
    pub fn synthesize(
        &mut self,
        spectrum: &PowerSpectrum,
        f0: f64,
        fractional_time_shift: f64,
    ) -> Result<ImpulseResponse> {
        let n = self.fft_size;
        let half = n / 2;

        if spectrum.len() != half + 1 {
            error!(
                expected = half + 1,
                actual = spectrum.len(),
                "spectrum length does not match fft size"
            );
            return Err(VocoderError::SpectrumLength {
                expected: half + 1,
                actual: spectrum.len(),
            });
        }
        if let Err(e) = validate_pitch(f0, self.sample_rate) {
            error!(f0, "rejecting frame with invalid f0");
            return Err(e);
        }
        if !fractional_time_shift.is_finite() {
            return Err(VocoderError::InvalidInput(
                "fractional time shift must be finite".into(),
            ));
        }
        if let Some(idx) = spectrum.as_slice().iter().position(|v| !v.is_finite()) {
            error!(bin = idx, "rejecting non-finite spectral power");
            return Err(VocoderError::InvalidInput(format!(
                "non-finite spectral power at bin {idx}"
            )));
        }

        self.aperiodicity
            .aperiodic_ratio(spectrum.as_slice(), f0, &mut self.ratio);

        // Log half-spectrum, mirrored into a real symmetric sequence.
        let mut negative_bins = 0usize;
        for (i, power) in spectrum.as_slice().iter().enumerate() {
            if *power < 0.0 {
                negative_bins += 1;
            }
            let ap = self.ratio[i].clamp(0.0, 1.0);
            let periodic = power.max(0.0) * (1.0 - ap);
            self.buf[i] = Complex::new((periodic + SAFE_GUARD_MINIMUM).ln() / 2.0, 0.0);
        }
        if negative_bins > 0 {
            debug!(negative_bins, "negative spectral bins floored to zero");
        }
        for i in half + 1..n {
            self.buf[i] = self.buf[n - i];
        }

        self.minimum_phase_spectrum();

        let coefficient = 2.0 * PI * fractional_time_shift * self.sample_rate as f64 / n as f64;
        self.apply_fractional_time_shift(coefficient);

        // Rebuild the full spectrum from the half spectrum, then inverse.
        for i in 1..half {
            self.buf[n - i] = self.buf[i].conj();
        }
        self.inverse
            .process_with_scratch(&mut self.buf, &mut self.scratch);

        let scale = (self.sample_rate as f64 / f0).sqrt() / n as f64;
        let samples = (0..n)
            .map(|i| (self.buf[(i + half) % n].re * scale) as f32)
            .collect();

        Ok(ImpulseResponse::new(samples))
    }

    /// In-place: `buf` holds the mirrored log spectrum on entry and the
    /// minimum-phase spectrum (bins `0..=N/2`) on exit.
    fn minimum_phase_spectrum(&mut self) {
        let n = self.fft_size;
        let half = n / 2;

        // The forward transform doubles as the inverse: the imaginary sign
        // flip is folded into the causal window below.
        self.forward
            .process_with_scratch(&mut self.buf, &mut self.scratch);

        self.buf[0].im = -self.buf[0].im;
        for c in &mut self.buf[1..half] {
            c.re *= 2.0;
            c.im *= -2.0;
        }
        self.buf[half].im = -self.buf[half].im;
        for c in &mut self.buf[half + 1..] {
            *c = Complex::new(0.0, 0.0);
        }

        self.forward
            .process_with_scratch(&mut self.buf, &mut self.scratch);

        let inv_n = 1.0 / n as f64;
        for c in &mut self.buf[..=half] {
            let magnitude = (c.re * inv_n).exp();
            let phase = c.im * inv_n;
            *c = Complex::new(magnitude * phase.cos(), magnitude * phase.sin());
        }
    }

    /// Rotate each half-spectrum bin by `-coefficient · i`.
    ///
    /// The sine is taken as `√(1 − cos²)`, which assumes the rotation stays
    /// within `[0, π]`.
    fn apply_fractional_time_shift(&mut self, coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        let half = self.fft_size / 2;
        for (i, c) in self.buf[..=half].iter_mut().enumerate() {
            let cos = (coefficient * i as f64).cos();
            let sin = (1.0 - cos * cos).max(0.0).sqrt();
            *c = Complex::new(c.re * cos + c.im * sin, c.im * cos - c.re * sin);
        }
    }
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("fft_size", &self.fft_size)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// One-shot convenience wrapper: plans, synthesizes and discards.
///
/// Prefer a long-lived [`Synthesizer`] on hot paths.
pub fn synthesize(
    spectrum: &PowerSpectrum,
    f0: f64,
    fft_size: usize,
    fractional_time_shift: f64,
    sample_rate: u32,
) -> Result<ImpulseResponse> {
    Synthesizer::new(fft_size, sample_rate)?.synthesize(spectrum, f0, fractional_time_shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FFT: usize = 1024;
    const FS: u32 = 8000;

    fn flat(value: f64) -> PowerSpectrum {
        PowerSpectrum(vec![value; bin_count(FFT)])
    }

    /// Smooth formant-ish envelope so tests are not only exercising the
    /// degenerate flat case.
    fn shaped() -> PowerSpectrum {
        PowerSpectrum(
            (0..bin_count(FFT))
                .map(|i| {
                    let x = i as f64 / 512.0;
                    1.0 + 8.0 * (-((x - 0.1) / 0.05).powi(2)).exp()
                        + 3.0 * (-((x - 0.35) / 0.08).powi(2)).exp()
                })
                .collect(),
        )
    }

    #[test]
    fn all_zero_spectrum_gives_finite_output() {
        let ir = synthesize(&flat(0.0), 100.0, FFT, 0.0, FS).unwrap();
        assert_eq!(ir.len(), FFT);
        assert!(ir.samples().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn epsilon_floor_spectrum_is_finite_for_many_f0() {
        for f0 in [50.0, 100.0, 220.0, 400.0] {
            let ir = synthesize(&flat(SAFE_GUARD_MINIMUM), f0, FFT, 0.0, FS).unwrap();
            assert_eq!(ir.len(), FFT);
            assert!(ir.samples().iter().all(|s| s.is_finite()), "f0={f0}");
        }
    }

    #[test]
    fn flat_spectrum_peaks_at_centre() {
        let ir = synthesize(&flat(1.0), 100.0, FFT, 0.0, FS).unwrap();
        assert_eq!(ir.len(), FFT);
        assert_eq!(ir.peak_index(), FFT / 2);
        // Unit spectrum collapses to a single impulse of height √(fs/f0).
        assert_relative_eq!(
            ir.samples()[FFT / 2],
            (FS as f32 / 100.0).sqrt(),
            epsilon = 1e-3
        );
    }

    #[test]
    fn doubling_power_scales_rms_by_sqrt_two() {
        let base = shaped();
        let doubled = PowerSpectrum(base.0.iter().map(|v| v * 2.0).collect());
        let a = synthesize(&base, 120.0, FFT, 0.0, FS).unwrap();
        let b = synthesize(&doubled, 120.0, FFT, 0.0, FS).unwrap();
        assert_relative_eq!(b.rms() / a.rms(), 2f32.sqrt(), epsilon = 1e-4);
    }

    #[test]
    fn lower_pitch_has_more_energy_per_period() {
        let a = synthesize(&shaped(), 200.0, FFT, 0.0, FS).unwrap();
        let b = synthesize(&shaped(), 100.0, FFT, 0.0, FS).unwrap();
        assert_relative_eq!(b.rms() / a.rms(), 2f32.sqrt(), epsilon = 1e-4);
    }

    #[test]
    fn rejects_non_positive_f0() {
        assert!(matches!(
            synthesize(&flat(1.0), 0.0, FFT, 0.0, FS),
            Err(VocoderError::InvalidInput(_))
        ));
        assert!(matches!(
            synthesize(&flat(1.0), -10.0, FFT, 0.0, FS),
            Err(VocoderError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_infinite_power_and_pitch_above_nyquist() {
        let mut spectrum = shaped();
        spectrum.0[100] = f64::INFINITY;
        assert!(matches!(
            synthesize(&spectrum, 100.0, FFT, 0.0, FS),
            Err(VocoderError::InvalidInput(_))
        ));
        assert!(matches!(
            synthesize(&shaped(), FS as f64 / 2.0, FFT, 0.0, FS),
            Err(VocoderError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_wrong_spectrum_length() {
        let short = PowerSpectrum(vec![1.0; 100]);
        assert!(matches!(
            synthesize(&short, 100.0, FFT, 0.0, FS),
            Err(VocoderError::SpectrumLength {
                expected: 513,
                actual: 100
            })
        ));
    }

    #[test]
    fn rejects_odd_fft_size() {
        assert!(Synthesizer::new(1023, FS).is_err());
        assert!(Synthesizer::new(2, FS).is_err());
    }

    #[test]
    fn negative_bins_are_floored_not_propagated() {
        let mut spectrum = shaped();
        spectrum.0[10] = -4.0;
        spectrum.0[11] = -0.5;
        let ir = synthesize(&spectrum, 100.0, FFT, 0.0, FS).unwrap();
        assert!(ir.samples().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn reused_synthesizer_is_deterministic() {
        let mut synth = Synthesizer::new(FFT, FS).unwrap();
        let a = synth.synthesize(&shaped(), 140.0, 0.0).unwrap();
        let _ = synth.synthesize(&flat(3.0), 90.0, 0.0).unwrap();
        let b = synth.synthesize(&shaped(), 140.0, 0.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fractional_shift_preserves_length_and_finiteness() {
        let mut synth = Synthesizer::new(FFT, FS).unwrap();
        let plain = synth.synthesize(&shaped(), 100.0, 0.0).unwrap();
        // Half a sample: rotation stays inside [0, π] for every bin.
        let shifted = synth.synthesize(&shaped(), 100.0, 0.5 / FS as f64).unwrap();
        assert_eq!(shifted.len(), FFT);
        assert!(shifted.samples().iter().all(|s| s.is_finite()));
        assert_ne!(plain, shifted);
    }

    struct ConstantRatio(f64);

    impl AperiodicityModel for ConstantRatio {
        fn aperiodic_ratio(&mut self, _spectrum: &[f64], _f0: f64, ratio: &mut [f64]) {
            ratio.fill(self.0);
        }
    }

    #[test]
    fn aperiodic_share_is_removed_from_periodic_power() {
        let mut periodic = Synthesizer::new(FFT, FS).unwrap();
        let mut mixed =
            Synthesizer::with_aperiodicity(FFT, FS, Box::new(ConstantRatio(0.75))).unwrap();
        let a = periodic.synthesize(&shaped(), 100.0, 0.0).unwrap();
        let b = mixed.synthesize(&shaped(), 100.0, 0.0).unwrap();
        // A quarter of the power remains, so half the amplitude.
        assert_relative_eq!(b.rms() / a.rms(), 0.5, epsilon = 1e-4);
    }
}
