//! Per-frame data passed from the predictor through the smoother to the
//! synthesizer, and the impulse response handed to the filter stage.

use crate::error::{Result, VocoderError};

/// Largest accepted log10 power. Anything above overflows once a window of
/// frames is summed in the linear domain.
pub const MAX_LOG10_POWER: f64 = 300.0;

/// Number of spectral bins for a given FFT size (`fft_size / 2 + 1`).
pub fn bin_count(fft_size: usize) -> usize {
    fft_size / 2 + 1
}

/// One prediction cycle's output.
///
/// `log_spectrum` holds base-10 log power values exactly as the predictor
/// emits them; the smoother converts to linear power before averaging.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub log_spectrum: Vec<f64>,
    /// Fundamental frequency in Hz.
    pub f0: f64,
}

impl Frame {
    pub fn new(log_spectrum: Vec<f64>, f0: f64) -> Self {
        Self { log_spectrum, f0 }
    }

    /// Check the caller contract: `bins` spectral values, all finite and at
    /// most [`MAX_LOG10_POWER`], and a positive finite f0.
    ///
    /// # Errors
    /// `SpectrumLength` on a length mismatch, `InvalidInput` otherwise.
    pub fn validate(&self, bins: usize) -> Result<()> {
        if self.log_spectrum.len() != bins {
            return Err(VocoderError::SpectrumLength {
                expected: bins,
                actual: self.log_spectrum.len(),
            });
        }
        validate_f0(self.f0)?;
        if let Some(idx) = self.log_spectrum.iter().position(|v| !v.is_finite()) {
            return Err(VocoderError::InvalidInput(format!(
                "non-finite spectral value at bin {idx}"
            )));
        }
        if let Some(idx) = self
            .log_spectrum
            .iter()
            .position(|v| *v > MAX_LOG10_POWER)
        {
            return Err(VocoderError::InvalidInput(format!(
                "spectral value {} at bin {idx} exceeds log10 power {MAX_LOG10_POWER}",
                self.log_spectrum[idx]
            )));
        }
        Ok(())
    }
}

/// Reject f0 values the synthesizer cannot normalise by.
pub fn validate_f0(f0: f64) -> Result<()> {
    if !f0.is_finite() || f0 <= 0.0 {
        return Err(VocoderError::InvalidInput(format!(
            "f0 must be a positive finite frequency, got {f0}"
        )));
    }
    Ok(())
}

/// [`validate_f0`], plus the pitch must stay below Nyquist so a pitch
/// period spans at least two samples.
pub fn validate_pitch(f0: f64, sample_rate: u32) -> Result<()> {
    validate_f0(f0)?;
    let nyquist = sample_rate as f64 / 2.0;
    if f0 >= nyquist {
        return Err(VocoderError::InvalidInput(format!(
            "f0 {f0} Hz must be below Nyquist ({nyquist} Hz)"
        )));
    }
    Ok(())
}

/// Linear-domain power spectrum, one value per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrum(pub Vec<f64>);

impl PowerSpectrum {
    /// Convert predictor log10 output to linear power (`10^x`).
    pub fn from_log10(log_spectrum: &[f64]) -> Self {
        Self(log_spectrum.iter().map(|x| 10f64.powf(*x)).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Smoother output: averaged linear spectrum and averaged f0.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedFrame {
    pub spectrum: PowerSpectrum,
    pub f0: f64,
}

/// One pitch period of synthesized filter response, already fftshifted so
/// the main pulse sits near the centre of the buffer.
///
/// Shared as `Arc<ImpulseResponse>` once installed; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    samples: Vec<f32>,
}

impl ImpulseResponse {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index of the largest absolute sample.
    pub fn peak_index(&self) -> usize {
        self.samples
            .iter()
            .enumerate()
            .fold((0, 0f32), |(best, max), (i, s)| {
                if s.abs() > max {
                    (i, s.abs())
                } else {
                    (best, max)
                }
            })
            .0
    }

    /// Root-mean-square of the response.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_wrong_length() {
        let frame = Frame::new(vec![0.0; 10], 100.0);
        match frame.validate(513) {
            Err(VocoderError::SpectrumLength { expected, actual }) => {
                assert_eq!(expected, 513);
                assert_eq!(actual, 10);
            }
            other => panic!("expected SpectrumLength, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_positive_f0() {
        for f0 in [0.0, -50.0, f64::NAN, f64::INFINITY] {
            let frame = Frame::new(vec![0.0; 5], f0);
            assert!(
                matches!(frame.validate(5), Err(VocoderError::InvalidInput(_))),
                "f0={f0} should be rejected"
            );
        }
    }

    #[test]
    fn validate_rejects_nan_bins() {
        let mut spectrum = vec![0.0; 5];
        spectrum[3] = f64::NAN;
        let frame = Frame::new(spectrum, 120.0);
        assert!(matches!(
            frame.validate(5),
            Err(VocoderError::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_rejects_overflowing_log_power() {
        let mut spectrum = vec![0.0; 5];
        spectrum[2] = 400.0;
        let frame = Frame::new(spectrum, 120.0);
        assert!(matches!(
            frame.validate(5),
            Err(VocoderError::InvalidInput(_))
        ));

        let mut spectrum = vec![0.0; 5];
        spectrum[2] = MAX_LOG10_POWER;
        assert!(Frame::new(spectrum, 120.0).validate(5).is_ok());
    }

    #[test]
    fn pitch_must_stay_below_nyquist() {
        assert!(validate_pitch(3_999.0, 8_000).is_ok());
        for f0 in [4_000.0, 1.0e9, 0.0, f64::NAN] {
            assert!(
                matches!(validate_pitch(f0, 8_000), Err(VocoderError::InvalidInput(_))),
                "f0={f0} should be rejected"
            );
        }
    }

    #[test]
    fn log10_conversion() {
        let spectrum = PowerSpectrum::from_log10(&[0.0, 1.0, -1.0]);
        assert!((spectrum.0[0] - 1.0).abs() < 1e-12);
        assert!((spectrum.0[1] - 10.0).abs() < 1e-12);
        assert!((spectrum.0[2] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn peak_and_rms() {
        let ir = ImpulseResponse::new(vec![0.0, -3.0, 1.0, 0.0]);
        assert_eq!(ir.peak_index(), 1);
        let expected = (10.0f32 / 4.0).sqrt();
        assert!((ir.rms() - expected).abs() < 1e-6);
    }
}
