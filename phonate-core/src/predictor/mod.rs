//! Predictor abstraction: image in, spectral envelope + f0 out.
//!
//! The `Predictor` trait decouples the session from any specific backend
//! (stub, tflite, ONNX, …). `&mut self` on `predict` expresses that
//! backends may keep state; all calls are serialised through
//! `PredictorHandle`'s `parking_lot::Mutex`.

pub mod quant;
pub mod stub;

pub use quant::QuantizationParams;
pub use stub::StubPredictor;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, VocoderError};
use crate::frame::Frame;

/// Interleaved 8-bit RGB image handed to the predictor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major RGB.
    pub rgb: Vec<u8>,
}

impl ImageFrame {
    /// # Errors
    /// `InvalidInput` if `rgb` is not exactly `width * height * 3` bytes.
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(VocoderError::InvalidInput(format!(
                "image buffer has {} bytes, expected {expected} for {width}x{height} RGB",
                rgb.len()
            )));
        }
        Ok(Self { width, height, rgb })
    }

    /// Uniform grey image, handy for tests and demos.
    pub fn filled(width: u32, height: u32, level: u8) -> Self {
        Self {
            width,
            height,
            rgb: vec![level; width as usize * height as usize * 3],
        }
    }

    /// Pixel values scaled to `[0, 1]`, the range the models were trained on.
    pub fn normalized(&self) -> Vec<f32> {
        self.rgb.iter().map(|v| *v as f32 / 255.0).collect()
    }

    /// Mean of all channels in `[0, 1]`; 0 for an empty image.
    pub fn mean_level(&self) -> f32 {
        if self.rgb.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.rgb.iter().map(|v| *v as u64).sum();
        sum as f32 / (self.rgb.len() as f32 * 255.0)
    }
}

/// Contract for spectral-envelope / f0 predictors.
pub trait Predictor: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Predict one frame.
    ///
    /// `Ok(None)` means the predictor is not ready yet; the caller skips the
    /// cycle. The returned `Frame::log_spectrum` is in log10 power units.
    fn predict(&mut self, image: &ImageFrame) -> Result<Option<Frame>>;
}

/// Thread-safe reference-counted handle to any `Predictor` implementor.
#[derive(Clone)]
pub struct PredictorHandle(pub Arc<Mutex<dyn Predictor>>);

impl PredictorHandle {
    /// Wrap any `Predictor` in a `PredictorHandle`.
    pub fn new<P: Predictor>(predictor: P) -> Self {
        Self(Arc::new(Mutex::new(predictor)))
    }
}

impl std::fmt::Debug for PredictorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictorHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_frame_checks_buffer_size() {
        assert!(ImageFrame::new(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            ImageFrame::new(2, 2, vec![0; 11]),
            Err(VocoderError::InvalidInput(_))
        ));
    }

    #[test]
    fn normalized_and_mean_level() {
        let img = ImageFrame::new(1, 2, vec![0, 0, 0, 255, 255, 255]).unwrap();
        assert_eq!(img.normalized(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert!((img.mean_level() - 0.5).abs() < 1e-6);
        assert_eq!(ImageFrame::filled(0, 0, 9).mean_level(), 0.0);
    }
}
