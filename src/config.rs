//! Runtime settings
//!
//! Settings come from an optional JSON file; every field has a default so an
//! empty object (or no file at all) is valid. Retention is expressed in
//! seconds throughout.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Retention applied when none (or an invalid one) is supplied: one hour
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Pause between two retention sweeps
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

/// Frame rate of the raw video file
pub const DEFAULT_VIDEO_FPS: u32 = crate::capture::webcam::DEFAULT_FPS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub retention_secs: u64,
    pub sweep_interval_ms: u64,
    pub video_fps: u32,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            video_fps: DEFAULT_VIDEO_FPS,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::debug!("Loaded settings from {:?}: {:?}", path, settings);
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(AppError::InvalidConfig(
                "sweepIntervalMs must be greater than zero".to_string(),
            ));
        }
        if self.video_fps == 0 {
            return Err(AppError::InvalidConfig(
                "videoFps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retention_window(&self) -> Duration {
        if self.retention_secs == 0 {
            Duration::from_secs(DEFAULT_RETENTION_SECS)
        } else {
            Duration::from_secs(self.retention_secs)
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Parse a retention window given in whole seconds.
///
/// Missing, blank, non-numeric or zero input yields `fallback`.
pub fn parse_retention(input: Option<&str>, fallback: Duration) -> Duration {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };

    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!(
                "Invalid retention {:?}, using {}s",
                raw,
                fallback.as_secs()
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_retention() {
        let fallback = Duration::from_secs(DEFAULT_RETENTION_SECS);

        assert_eq!(parse_retention(Some("2"), fallback), Duration::from_secs(2));
        assert_eq!(parse_retention(Some(" 90 "), fallback), Duration::from_secs(90));
        assert_eq!(parse_retention(None, fallback), fallback);
        assert_eq!(parse_retention(Some(""), fallback), fallback);
        assert_eq!(parse_retention(Some("soon"), fallback), fallback);
        assert_eq!(parse_retention(Some("0"), fallback), fallback);
        assert_eq!(parse_retention(Some("-5"), fallback), fallback);
    }

    #[test]
    fn test_load_partial_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("avrec.json");
        std::fs::write(&path, r#"{ "retentionSecs": 120, "ffmpegPath": "/opt/ffmpeg" }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.retention_window(), Duration::from_secs(120));
        assert_eq!(settings.ffmpeg_path, "/opt/ffmpeg");
        assert_eq!(settings.ffprobe_path, "ffprobe");
        assert_eq!(settings.video_fps, 30);
        assert_eq!(settings.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_rejects_zero_interval() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "sweepIntervalMs": 0 }"#).unwrap();

        assert!(matches!(Settings::load(&path), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ retention").unwrap();

        assert!(matches!(Settings::load(&path), Err(AppError::Serialization(_))));
    }
}
