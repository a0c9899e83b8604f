//! `StubPredictor`: deterministic placeholder backend.
//!
//! Emits a fixed three-formant /a/-like envelope and an f0 that follows the
//! image's mean brightness, so the full session chain can be exercised
//! end-to-end without model weights.

use tracing::debug;

use crate::error::Result;
use crate::frame::{bin_count, Frame};
use crate::predictor::{ImageFrame, Predictor, QuantizationParams};

/// (centre Hz, bandwidth Hz, linear power)
const FORMANTS: [(f64, f64, f64); 3] = [(700.0, 90.0, 1.0), (1220.0, 110.0, 0.5), (2600.0, 160.0, 0.2)];

/// Power floor between formants, in linear units.
const FLOOR: f64 = 1e-3;

pub struct StubPredictor {
    fft_size: usize,
    sample_rate: u32,
    base_f0: f64,
    /// Input/output quantization of the f0 path, as an int8 pitch model has.
    f0_quantization: Option<(QuantizationParams, QuantizationParams)>,
    ready: bool,
}

impl StubPredictor {
    pub fn new(fft_size: usize, sample_rate: u32) -> Self {
        Self::with_base_f0(fft_size, sample_rate, 120.0)
    }

    pub fn with_base_f0(fft_size: usize, sample_rate: u32, base_f0: f64) -> Self {
        Self {
            fft_size,
            sample_rate,
            base_f0,
            f0_quantization: None,
            ready: false,
        }
    }

    /// Route the f0 estimate through quantized input and output tensors.
    pub fn with_quantized_f0(mut self, input: QuantizationParams, output: QuantizationParams) -> Self {
        self.f0_quantization = Some((input, output));
        self
    }

    fn estimate_f0(&self, image: &ImageFrame) -> f64 {
        let Some((input, output)) = self.f0_quantization else {
            // Brighter image, higher pitch: ±20 % around the base.
            return self.base_f0 * (0.8 + 0.4 * image.mean_level() as f64);
        };
        let pixels = input.dequantize(&input.quantize(&image.normalized()));
        let level = if pixels.is_empty() {
            0.0
        } else {
            pixels.iter().sum::<f32>() / pixels.len() as f32
        };
        let raw = (self.base_f0 * (0.8 + 0.4 * level as f64)) as f32;
        output.dequantize(&output.quantize(&[raw]))[0] as f64
    }

    /// The envelope this stub always predicts, in log10 power.
    pub fn log_envelope(&self) -> Vec<f64> {
        let hz_per_bin = self.sample_rate as f64 / self.fft_size as f64;
        (0..bin_count(self.fft_size))
            .map(|i| {
                let f = i as f64 * hz_per_bin;
                let power: f64 = FORMANTS
                    .iter()
                    .map(|(centre, bw, gain)| gain * (-((f - centre) / bw).powi(2)).exp())
                    .sum();
                (power + FLOOR).log10()
            })
            .collect()
    }
}

impl Predictor for StubPredictor {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubPredictor::warm_up: no-op");
        self.ready = true;
        Ok(())
    }

    fn predict(&mut self, image: &ImageFrame) -> Result<Option<Frame>> {
        if !self.ready {
            return Ok(None);
        }
        Ok(Some(Frame::new(self.log_envelope(), self.estimate_f0(image))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_warmed_up() {
        let mut stub = StubPredictor::new(1024, 8000);
        let img = ImageFrame::filled(4, 4, 128);
        assert!(stub.predict(&img).unwrap().is_none());
        stub.warm_up().unwrap();
        assert!(stub.predict(&img).unwrap().is_some());
    }

    #[test]
    fn frame_has_expected_shape() {
        let mut stub = StubPredictor::new(1024, 8000);
        stub.warm_up().unwrap();
        let frame = stub.predict(&ImageFrame::filled(2, 2, 0)).unwrap().unwrap();
        assert_eq!(frame.log_spectrum.len(), 513);
        assert!(frame.validate(513).is_ok());
        assert!((frame.f0 - 96.0).abs() < 1e-9);
    }

    #[test]
    fn quantized_f0_snaps_to_output_grid() {
        let mut stub = StubPredictor::new(1024, 8000).with_quantized_f0(
            QuantizationParams::new(1.0 / 128.0, 0),
            QuantizationParams::new(4.0, 0),
        );
        stub.warm_up().unwrap();
        let frame = stub.predict(&ImageFrame::filled(2, 2, 0)).unwrap().unwrap();
        // 96 Hz lies on the 4 Hz grid.
        assert_eq!(frame.f0, 96.0);
        let frame = stub.predict(&ImageFrame::filled(2, 2, 255)).unwrap().unwrap();
        // Input 1.0 → 128 → 1.0; 120·1.2 = 144 → 36 steps → 144.
        assert_eq!(frame.f0, 144.0);
    }

    #[test]
    fn envelope_peaks_near_first_formant() {
        let stub = StubPredictor::new(1024, 8000);
        let env = stub.log_envelope();
        let peak = env
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        // 700 Hz at 7.8125 Hz per bin.
        assert!((88..=91).contains(&peak), "peak bin {peak}");
    }
}
