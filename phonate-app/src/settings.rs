//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use phonate_core::VocoderConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub vocoder: VocoderConfig,
    pub preferred_output_device: Option<String>,
    /// Interval between predicted frames in live mode.
    pub frame_interval_ms: u64,
    /// Length of a live run, or of an exported rendition.
    pub duration_secs: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            vocoder: VocoderConfig::default(),
            preferred_output_device: None,
            frame_interval_ms: 100,
            duration_secs: 5.0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.vocoder.normalize();
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.frame_interval_ms = self.frame_interval_ms.clamp(10, 5_000);
        self.duration_secs = if self.duration_secs.is_finite() {
            self.duration_secs.clamp(0.1, 600.0)
        } else {
            5.0
        };
    }

    /// Apply `PHONATE_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.vocoder.apply_env_overrides();
        if let Ok(device) = std::env::var("PHONATE_OUTPUT_DEVICE") {
            self.preferred_output_device = Some(device);
        }
        if let Ok(raw) = std::env::var("PHONATE_FRAME_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.frame_interval_ms = ms,
                Err(_) => warn!(value = %raw, "ignoring unparsable PHONATE_FRAME_INTERVAL_MS"),
            }
        }
        self.normalize();
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Phonate")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("phonate")
            .join("settings.json")
    }
}

/// Missing or corrupt files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<AppSettings>(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(path = %path.display(), "ignoring corrupt settings file: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonate_core::SmoothingMode;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("phonate-settings-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(&temp_path("missing"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let path = temp_path("roundtrip");
        let mut settings = AppSettings::default();
        settings.vocoder.smoothing_mode = SmoothingMode::SingleShot;
        settings.preferred_output_device = Some("USB DAC".into());
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.vocoder.smoothing_mode, SmoothingMode::SingleShot);
        assert_eq!(loaded.preferred_output_device.as_deref(), Some("USB DAC"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn normalize_trims_device_and_clamps_interval() {
        let mut settings = AppSettings {
            preferred_output_device: Some("   ".into()),
            frame_interval_ms: 0,
            duration_secs: f64::NAN,
            ..AppSettings::default()
        };
        settings.normalize();
        assert!(settings.preferred_output_device.is_none());
        assert_eq!(settings.frame_interval_ms, 10);
        assert_eq!(settings.duration_secs, 5.0);
    }
}
