//! Session pipeline
//!
//! Capture, then merge when the mode needs it, then report. The merge runs
//! only after every capture stream has finalized its sink.

use super::channel::CaptureChannel;
use super::coordinator::CaptureCoordinator;
use super::state::{CaptureMode, CaptureOutcome, CaptureSession, StreamKind};
use crate::transcode::{MergeOutput, TranscodeClient, Transcoder};
use crate::utils::error::AppResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use uuid::Uuid;

/// What happened to the merge step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MergeStatus {
    /// Single-stream mode; the raw file is the output
    NotRequired,
    /// AudioAndVideo mode but a raw file was missing after capture
    Skipped { reason: String },
    Merged { output: MergeOutput },
    Failed { code: String, message: String },
}

/// Everything the front end needs to report a finished session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: Uuid,
    pub mode: CaptureMode,
    pub created_at: DateTime<Utc>,
    pub capture: CaptureOutcome,
    pub merge: MergeStatus,
    /// The finished recording, if one exists on disk
    pub final_output: Option<PathBuf>,
}

impl SessionReport {
    /// Whether the session left a usable recording behind
    pub fn succeeded(&self) -> bool {
        self.final_output.is_some()
    }
}

/// Run one session end to end.
///
/// Device-open failures abort the session and surface as `Err`. Everything
/// after that (stream failures, merge failures) is reported in the
/// `SessionReport`.
pub async fn run_session<T, F>(
    session: &CaptureSession,
    channels: Vec<Box<dyn CaptureChannel>>,
    transcoder: &TranscodeClient<T>,
    stop_request: F,
) -> AppResult<SessionReport>
where
    T: Transcoder,
    F: Future<Output = ()>,
{
    let mut coordinator = CaptureCoordinator::new();
    for channel in channels {
        coordinator.add_channel(channel);
    }

    let capture = coordinator.run(session, stop_request).await?;

    let (merge, final_output) = match session.mode() {
        CaptureMode::AudioOnly | CaptureMode::VideoOnly => {
            let output = session.final_output_path();
            let produced = capture.produced_files().contains(&output);
            (MergeStatus::NotRequired, produced.then_some(output))
        }
        CaptureMode::AudioAndVideo => merge_streams(session, &capture, transcoder).await,
    };

    match &final_output {
        Some(path) => tracing::info!("Session {} produced {:?}", session.id(), path),
        None => tracing::warn!("Session {} produced no final output", session.id()),
    }

    Ok(SessionReport {
        session_id: session.id(),
        mode: session.mode(),
        created_at: session.created_at(),
        capture,
        merge,
        final_output,
    })
}

async fn merge_streams<T: Transcoder>(
    session: &CaptureSession,
    capture: &CaptureOutcome,
    transcoder: &TranscodeClient<T>,
) -> (MergeStatus, Option<PathBuf>) {
    let missing: Vec<String> = [StreamKind::Video, StreamKind::Audio]
        .into_iter()
        .filter(|kind| !capture.stream(*kind).is_some_and(|s| s.produced_file()))
        .map(|kind| kind.to_string())
        .collect();

    if !missing.is_empty() {
        let reason = format!("no finalized {} file", missing.join(" or "));
        tracing::warn!("Session {}: skipping merge, {}", session.id(), reason);
        return (MergeStatus::Skipped { reason }, None);
    }

    match transcoder
        .merge(
            &session.raw_video_path(),
            &session.raw_audio_path(),
            &session.merged_output_path(),
        )
        .await
    {
        Ok(output) => {
            let path = output.output_path.clone();
            (MergeStatus::Merged { output }, Some(path))
        }
        Err(e) => (
            MergeStatus::Failed {
                code: e.code().to_string(),
                message: e.to_string(),
            },
            None,
        ),
    }
}
