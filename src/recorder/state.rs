//! Session state
//!
//! The immutable capture session and the per-stream reports produced when a
//! session ends.

use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Extension of the raw audio intermediate (PCM WAV)
pub const RAW_AUDIO_EXTENSION: &str = "wav";

/// Extension of the raw video intermediate (XVID in AVI)
pub const RAW_VIDEO_EXTENSION: &str = "avi";

/// Extension of the merged container
pub const FINAL_EXTENSION: &str = "mp4";

/// Which devices a session records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    AudioOnly,
    VideoOnly,
    AudioAndVideo,
}

impl CaptureMode {
    pub fn captures_audio(&self) -> bool {
        matches!(self, CaptureMode::AudioOnly | CaptureMode::AudioAndVideo)
    }

    pub fn captures_video(&self) -> bool {
        matches!(self, CaptureMode::VideoOnly | CaptureMode::AudioAndVideo)
    }
}

impl FromStr for CaptureMode {
    type Err = AppError;

    /// Accepts the menu numbers (`1`, `2`, `3`) as well as names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "audio" => Ok(CaptureMode::AudioOnly),
            "2" | "video" => Ok(CaptureMode::VideoOnly),
            "3" | "both" | "av" | "audio+video" => Ok(CaptureMode::AudioAndVideo),
            _ => Err(AppError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureMode::AudioOnly => "audio",
            CaptureMode::VideoOnly => "video",
            CaptureMode::AudioAndVideo => "audio+video",
        };
        f.write_str(name)
    }
}

/// One run of the tool. Built once from validated configuration and read-only afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    id: Uuid,
    mode: CaptureMode,
    output_dir: PathBuf,
    base_name: String,
    retention_window: Duration,
    created_at: DateTime<Utc>,
}

impl CaptureSession {
    /// Validate inputs and build a session.
    ///
    /// The output directory must already exist and the base name must be a
    /// plain, non-empty file stem.
    pub fn new(
        mode: CaptureMode,
        output_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        retention_window: Duration,
    ) -> AppResult<Self> {
        let output_dir = output_dir.into();
        let base_name = base_name.into().trim().to_string();

        if !output_dir.is_dir() {
            return Err(AppError::InvalidConfig(format!(
                "output directory does not exist: {}",
                output_dir.display()
            )));
        }
        if base_name.is_empty() {
            return Err(AppError::InvalidConfig("file name must not be empty".to_string()));
        }
        if base_name.contains(['/', '\\']) {
            return Err(AppError::InvalidConfig(format!(
                "file name must not contain path separators: {base_name}"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            mode,
            output_dir,
            base_name,
            retention_window,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn retention_window(&self) -> Duration {
        self.retention_window
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn derive_path(&self, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.base_name, extension))
    }

    pub fn raw_audio_path(&self) -> PathBuf {
        self.derive_path(RAW_AUDIO_EXTENSION)
    }

    pub fn raw_video_path(&self) -> PathBuf {
        self.derive_path(RAW_VIDEO_EXTENSION)
    }

    /// Target of the merge step
    pub fn merged_output_path(&self) -> PathBuf {
        self.derive_path(FINAL_EXTENSION)
    }

    /// Where the finished recording lives for this mode.
    ///
    /// Single-stream modes keep their raw file as the final output.
    pub fn final_output_path(&self) -> PathBuf {
        match self.mode {
            CaptureMode::AudioOnly => self.raw_audio_path(),
            CaptureMode::VideoOnly => self.raw_video_path(),
            CaptureMode::AudioAndVideo => self.merged_output_path(),
        }
    }
}

/// Medium captured by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => f.write_str("audio"),
            StreamKind::Video => f.write_str("video"),
        }
    }
}

/// How a capture stream ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StreamStatus {
    /// Stopped by the stop signal
    Completed,
    /// The device delivered an empty or invalid frame before stop was requested
    EndOfStream,
    /// Device or writer failure
    Failed { code: String, message: String },
}

impl StreamStatus {
    pub fn failed(code: &str, message: impl Into<String>) -> Self {
        StreamStatus::Failed {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StreamStatus::Failed { .. })
    }
}

/// Final state of one capture stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamReport {
    pub kind: StreamKind,
    pub sink_path: PathBuf,
    pub status: StreamStatus,
    /// Sink header flushed and file closed
    pub finalized: bool,
    /// Samples (audio) or frames (video) appended
    pub units_written: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StreamReport {
    /// Whether the sink is a usable file on disk
    pub fn produced_file(&self) -> bool {
        self.finalized && self.sink_path.is_file()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Result of `CaptureCoordinator::run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub mode: CaptureMode,
    pub streams: Vec<StreamReport>,
}

impl CaptureOutcome {
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamReport> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    /// Paths of finalized sink files that exist on disk
    pub fn produced_files(&self) -> Vec<PathBuf> {
        self.streams
            .iter()
            .filter(|s| s.produced_file())
            .map(|s| s.sink_path.clone())
            .collect()
    }

    pub fn any_failed(&self) -> bool {
        self.streams.iter().any(|s| s.status.is_failed())
    }
}
