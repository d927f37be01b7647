//! FFmpeg transcode backend
//!
//! Probes inputs with ffprobe and multiplexes them with ffmpeg.

use super::client::Transcoder;
use super::types::{MergeError, MergeRequest, StreamInfo};
use crate::recorder::state::StreamKind;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Transcoder backed by the ffmpeg/ffprobe binaries
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

fn stream_selector(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Audio => "a:0",
        StreamKind::Video => "v:0",
    }
}

/// ffprobe arguments listing the first stream of `kind` as JSON
pub fn stream_info_args(path: &Path, kind: StreamKind) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_streams".to_string(),
        "-select_streams".to_string(),
        stream_selector(kind).to_string(),
        path.to_string_lossy().to_string(),
    ]
}

fn parse_u32(value: Option<&serde_json::Value>) -> Option<u32> {
    value.and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .and_then(|n| u32::try_from(n).ok())
    })
}

/// Extract the first stream of `kind` from ffprobe JSON output
pub fn parse_stream_info(json: &str, kind: StreamKind) -> Result<Option<StreamInfo>, MergeError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| MergeError::MergeFailed(format!("Failed to parse ffprobe output: {e}")))?;

    let wanted = kind.to_string();
    let stream = value
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(wanted.as_str()))
        });

    let Some(stream) = stream else {
        return Ok(None);
    };

    Ok(Some(StreamInfo {
        kind,
        index: parse_u32(stream.get("index")).unwrap_or(0),
        codec_name: stream
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        duration_secs: stream
            .get("duration")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok()),
        width: parse_u32(stream.get("width")),
        height: parse_u32(stream.get("height")),
        sample_rate: parse_u32(stream.get("sample_rate")),
        channels: parse_u32(stream.get("channels")),
    }))
}

/// ffmpeg arguments that multiplex the request's two streams into MP4
pub fn build_merge_args(request: &MergeRequest) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        request.video.path.to_string_lossy().to_string(),
        "-i".to_string(),
        request.audio.path.to_string_lossy().to_string(),
        "-map".to_string(),
        format!("0:{}", request.video.stream.index),
        "-map".to_string(),
        format!("1:{}", request.audio.stream.index),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
    ];

    if request.sync.resample_audio {
        args.extend(["-af".to_string(), "aresample=async=1".to_string()]);
    }
    if request.sync.constant_frame_rate {
        args.extend(["-fps_mode".to_string(), "cfr".to_string()]);
    }

    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    args.push(request.output_path.to_string_lossy().to_string());
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn inspect(
        &self,
        path: &Path,
        kind: StreamKind,
    ) -> Result<Option<StreamInfo>, MergeError> {
        let output = Command::new(&self.ffprobe)
            .args(stream_info_args(path, kind))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MergeError::MergeFailed(format!("Failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            // ffprobe rejects files it cannot parse; that is "no usable stream"
            tracing::warn!(
                "ffprobe failed on {:?}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        parse_stream_info(&String::from_utf8_lossy(&output.stdout), kind)
    }

    async fn convert(&self, request: &MergeRequest) -> Result<(), MergeError> {
        let args = build_merge_args(request);
        tracing::info!("Starting FFmpeg merge: {:?}", args);

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MergeError::MergeFailed(format!("Failed to start FFmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MergeError::MergeFailed(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
