//! Session configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filter::CrossfadeCurve;
use crate::frame::bin_count;
use crate::smoothing::SmoothingMode;

/// Configuration for `VocoderSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VocoderConfig {
    /// FFT length used by the synthesizer. Even, ≥ 4. Default: 1024.
    pub fft_size: usize,
    /// Fixed synthesis sample rate (Hz). Default: 8000.
    pub sample_rate: u32,
    /// Spectral smoothing window capacity. Default: 2.
    pub spectral_window: usize,
    /// f0 smoothing window capacity. Default: 50.
    pub f0_window: usize,
    /// Continuous (sliding) or single-shot (truncating) smoothing.
    pub smoothing_mode: SmoothingMode,
    /// Crossfade progress added per tick. Default: 0.01.
    pub crossfade_step: f32,
    /// Tick length in milliseconds. The renderer spreads each tick's step
    /// over the samples it spans. Default: 1.0.
    pub crossfade_tick_ms: f32,
    /// Gain law while two filters are mixed.
    pub crossfade_curve: CrossfadeCurve,
    /// Pulse-train gain ahead of the filters. Default: 0.2.
    pub output_gain: f32,
    /// Fractional-sample time shift applied during synthesis (seconds).
    pub fractional_time_shift: f64,
    /// Target amount of audio buffered ahead of the device. Default: 60 ms.
    pub output_latency_ms: u32,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            sample_rate: 8_000,
            spectral_window: 2,
            f0_window: 50,
            smoothing_mode: SmoothingMode::Continuous,
            crossfade_step: 0.01,
            crossfade_tick_ms: 1.0,
            crossfade_curve: CrossfadeCurve::Complementary,
            output_gain: 0.2,
            fractional_time_shift: 0.0,
            output_latency_ms: 60,
        }
    }
}

impl VocoderConfig {
    /// Clamp every field into its supported range.
    pub fn normalize(&mut self) {
        self.fft_size = self.fft_size.max(4);
        if self.fft_size % 2 != 0 {
            self.fft_size += 1;
        }
        self.sample_rate = self.sample_rate.clamp(1_000, 192_000);
        self.spectral_window = self.spectral_window.clamp(1, 1_000);
        self.f0_window = self.f0_window.clamp(1, 1_000);
        self.crossfade_step = if self.crossfade_step.is_finite() {
            self.crossfade_step.clamp(1e-4, 1.0)
        } else {
            0.01
        };
        self.crossfade_tick_ms = if self.crossfade_tick_ms.is_finite() {
            self.crossfade_tick_ms.clamp(0.01, 100.0)
        } else {
            1.0
        };
        self.output_gain = if self.output_gain.is_finite() {
            self.output_gain.clamp(0.0, 1.0)
        } else {
            0.2
        };
        if !self.fractional_time_shift.is_finite() {
            self.fractional_time_shift = 0.0;
        }
        self.output_latency_ms = self.output_latency_ms.clamp(10, 1_000);
    }

    /// Spectral bins per frame (`fft_size / 2 + 1`).
    pub fn bins(&self) -> usize {
        bin_count(self.fft_size)
    }

    /// Samples spanned by one crossfade tick, at least one.
    pub fn samples_per_tick(&self) -> f32 {
        (self.crossfade_tick_ms * self.sample_rate as f32 / 1000.0).max(1.0)
    }

    /// Crossfade progress advanced per rendered sample.
    pub fn crossfade_step_per_sample(&self) -> f32 {
        self.crossfade_step / self.samples_per_tick()
    }

    /// Nominal length of one full crossfade in samples.
    pub fn crossfade_samples(&self) -> usize {
        (self.samples_per_tick() / self.crossfade_step).round() as usize
    }

    /// Apply `PHONATE_*` environment overrides, then re-normalise.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("PHONATE_OUTPUT_GAIN") {
            match raw.trim().parse::<f32>() {
                Ok(gain) => self.output_gain = gain,
                Err(_) => warn!(value = %raw, "ignoring unparsable PHONATE_OUTPUT_GAIN"),
            }
        }
        if let Ok(raw) = std::env::var("PHONATE_SMOOTHING_MODE") {
            match parse_smoothing_mode(&raw) {
                Some(mode) => self.smoothing_mode = mode,
                None => warn!(value = %raw, "ignoring unknown PHONATE_SMOOTHING_MODE"),
            }
        }
        self.normalize();
    }
}

/// Lenient parser for user-supplied smoothing mode names.
pub fn parse_smoothing_mode(raw: &str) -> Option<SmoothingMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "continuous" | "sliding" | "camera" | "live" => Some(SmoothingMode::Continuous),
        "singleshot" | "single-shot" | "single_shot" | "single" | "oneshot" | "file" => {
            Some(SmoothingMode::SingleShot)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = VocoderConfig::default();
        assert_eq!(cfg.fft_size, 1024);
        assert_eq!(cfg.bins(), 513);
        assert_eq!(cfg.sample_rate, 8_000);
        assert_eq!(cfg.spectral_window, 2);
        assert_eq!(cfg.f0_window, 50);
        assert!((cfg.crossfade_step - 0.01).abs() < 1e-9);
        // 1 ms ticks at 8 kHz: 8 samples per tick, 800 samples per crossfade.
        assert_eq!(cfg.samples_per_tick(), 8.0);
        assert_eq!(cfg.crossfade_samples(), 800);
    }

    #[test]
    fn normalize_fixes_out_of_range_values() {
        let mut cfg = VocoderConfig {
            fft_size: 511,
            spectral_window: 0,
            crossfade_step: f32::NAN,
            output_gain: 4.0,
            ..VocoderConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.fft_size, 512);
        assert_eq!(cfg.spectral_window, 1);
        assert!((cfg.crossfade_step - 0.01).abs() < 1e-9);
        assert_eq!(cfg.output_gain, 1.0);
    }

    #[test]
    fn deserializes_partial_camel_case_json() {
        let cfg: VocoderConfig =
            serde_json::from_str(r#"{"fftSize":512,"smoothingMode":"singleshot"}"#).unwrap();
        assert_eq!(cfg.fft_size, 512);
        assert_eq!(cfg.smoothing_mode, SmoothingMode::SingleShot);
        assert_eq!(cfg.sample_rate, 8_000);
        assert_eq!(cfg.crossfade_curve, CrossfadeCurve::Complementary);
    }

    #[test]
    fn parses_smoothing_aliases() {
        assert_eq!(parse_smoothing_mode(" Live "), Some(SmoothingMode::Continuous));
        assert_eq!(
            parse_smoothing_mode("single-shot"),
            Some(SmoothingMode::SingleShot)
        );
        assert_eq!(parse_smoothing_mode("bogus"), None);
    }
}
