//! Transcode types
//!
//! Request/response types for the merge step and its error taxonomy.

use crate::recorder::state::StreamKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A usable stream found by probing a media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub kind: StreamKind,
    /// Stream index inside its file
    pub index: u32,
    pub codec_name: String,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// One input of a merge: a file and the stream selected from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub path: PathBuf,
    pub stream: StreamInfo,
}

/// Audio/video alignment the backend should apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Stretch/squeeze audio to match timestamps
    pub resample_audio: bool,
    /// Duplicate/drop frames to hold a constant frame rate
    pub constant_frame_rate: bool,
}

impl SyncOptions {
    /// Frame-accurate audio/video alignment
    pub fn frame_accurate() -> Self {
        Self {
            resample_audio: true,
            constant_frame_rate: true,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::frame_accurate()
    }
}

/// Request handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub video: StreamDescriptor,
    pub audio: StreamDescriptor,
    pub output_path: PathBuf,
    pub sync: SyncOptions,
}

/// Successful merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutput {
    pub output_path: PathBuf,
    pub video: StreamInfo,
    pub audio: StreamInfo,
    /// Both raw intermediates were deleted
    pub intermediates_removed: bool,
}

/// Merge-stage errors
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Input file missing: {0}")]
    MissingInput(PathBuf),

    #[error("No usable {kind} stream in {path}")]
    NoStream { path: PathBuf, kind: StreamKind },

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::MissingInput(_) => "MISSING_INPUT",
            MergeError::NoStream { .. } => "NO_STREAM",
            MergeError::MergeFailed(_) => "MERGE_FAILED",
            MergeError::Io(_) => "IO_ERROR",
        }
    }
}
