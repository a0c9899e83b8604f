//! Offline rendition of the current voice.
//!
//! A pure read of the session's newest impulse response and f0: the
//! response is placed once per pitch period and overlap-added into a
//! fixed-length buffer. Nothing here touches live playback state.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, VocoderError};
use crate::frame::{validate_pitch, ImpulseResponse};

/// Upper bound on offline renders (10 minutes).
pub const MAX_EXPORT_SECS: f64 = 600.0;

/// Read-only view handed out by `VocoderSession::export_snapshot`.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub impulse_response: Arc<ImpulseResponse>,
    pub f0: f64,
    pub sample_rate: u32,
}

impl ExportSnapshot {
    pub fn render(&self, duration_secs: f64) -> Result<Vec<f32>> {
        render_offline(&self.impulse_response, self.f0, self.sample_rate, duration_secs)
    }
}

/// Repeat `ir` every `sample_rate / f0` samples for `duration_secs`.
///
/// The result is scaled down only if its peak exceeds 1.0.
///
/// # Errors
/// `InvalidInput` for f0 ≤ 0 or at or above Nyquist, a zero sample rate, or a duration outside
/// `(0, MAX_EXPORT_SECS]`.
pub fn render_offline(
    ir: &ImpulseResponse,
    f0: f64,
    sample_rate: u32,
    duration_secs: f64,
) -> Result<Vec<f32>> {
    if sample_rate == 0 {
        return Err(VocoderError::InvalidInput("sample_rate must be non-zero".into()));
    }
    validate_pitch(f0, sample_rate)?;
    if !duration_secs.is_finite() || duration_secs <= 0.0 || duration_secs > MAX_EXPORT_SECS {
        return Err(VocoderError::InvalidInput(format!(
            "export duration must be in (0, {MAX_EXPORT_SECS}] seconds, got {duration_secs}"
        )));
    }

    let total = (duration_secs * sample_rate as f64).round() as usize;
    let period = sample_rate as f64 / f0;
    let mut out = vec![0f32; total];

    let mut k = 0usize;
    loop {
        let start = (k as f64 * period).round() as usize;
        if start >= total {
            break;
        }
        for (y, h) in out[start..].iter_mut().zip(ir.samples()) {
            *y += h;
        }
        k += 1;
    }

    let peak = out.iter().fold(0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        debug!(peak, "normalising offline render");
        for s in out.iter_mut() {
            *s /= peak;
        }
    }

    Ok(out)
}

/// Write mono samples as 16-bit PCM WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| VocoderError::Wav(e.to_string()))?;
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| VocoderError::Wav(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| VocoderError::Wav(e.to_string()))?;

    info!(path = %path.display(), samples = samples.len(), sample_rate, "wav written");
    Ok(())
}
