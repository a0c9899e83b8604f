//! Synthesis-rate → device-rate conversion using a rubato `FastFixedIn`
//! resampler.
//!
//! ## Design
//!
//! The vocoder renders at a fixed 8 kHz while output devices usually run at
//! 44.1 or 48 kHz. `RateConverter` bridges that gap on the playback thread,
//! ahead of the device ring, where allocation is allowed.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = RateConverter::new(8_000, 48_000, 160)?;
//! let out = rc.process(&block); // Vec<f32> at 48 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, VocoderError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input chunk carried between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// `VocoderError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == device_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = device_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| VocoderError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            source_rate,
            device_rate,
            chunk_size,
            max_out,
            "output resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Process samples, returning converted output (may be empty while a
    /// chunk is still accumulating).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(8_000, 8_000, 160).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn upsample_8k_to_48k_length() {
        let mut rc = RateConverter::new(8_000, 48_000, 160).unwrap();
        assert!(!rc.is_passthrough());
        // One second of input. The first chunk comes out short by the
        // resampler's startup delay, so measure the total, not one chunk.
        let total: usize = (0..50).map(|_| rc.process(&[0.0f32; 160]).len()).sum();
        assert!(
            (total as isize - 48_000).unsigned_abs() <= 480,
            "output len={total}"
        );
    }

    #[test]
    fn partial_chunk_is_held_back() {
        let mut rc = RateConverter::new(8_000, 44_100, 160).unwrap();
        assert!(rc.process(&vec![0.0f32; 100]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 100]).is_empty());
    }
}
