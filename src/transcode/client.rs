//! Transcode client
//!
//! Validates and inspects the two raw files, asks the backend to multiplex
//! them, and cleans up after itself. Raw intermediates are deleted only once
//! the merged file exists; a failed merge leaves them untouched.

use super::types::{
    MergeError, MergeOutput, MergeRequest, StreamDescriptor, StreamInfo, SyncOptions,
};
use crate::recorder::state::StreamKind;
use async_trait::async_trait;
use std::path::Path;

/// Backend able to inspect and multiplex media files
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// First usable stream of `kind` in `path`, if any
    async fn inspect(
        &self,
        path: &Path,
        kind: StreamKind,
    ) -> Result<Option<StreamInfo>, MergeError>;

    /// Produce `request.output_path` from the two inputs
    async fn convert(&self, request: &MergeRequest) -> Result<(), MergeError>;
}

pub struct TranscodeClient<T> {
    backend: T,
    sync: SyncOptions,
}

impl<T: Transcoder> TranscodeClient<T> {
    pub fn new(backend: T) -> Self {
        Self {
            backend,
            sync: SyncOptions::frame_accurate(),
        }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    async fn inspect_required(
        &self,
        path: &Path,
        kind: StreamKind,
    ) -> Result<StreamInfo, MergeError> {
        self.backend
            .inspect(path, kind)
            .await?
            .ok_or_else(|| MergeError::NoStream {
                path: path.to_path_buf(),
                kind,
            })
    }

    /// Merge `video_path` and `audio_path` into `output_path`
    pub async fn merge(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<MergeOutput, MergeError> {
        for input in [video_path, audio_path] {
            if !input.is_file() {
                tracing::error!("Merge input missing: {:?}", input);
                return Err(MergeError::MissingInput(input.to_path_buf()));
            }
        }

        let video = self.inspect_required(video_path, StreamKind::Video).await?;
        let audio = self.inspect_required(audio_path, StreamKind::Audio).await?;

        tracing::info!(
            "Merging {:?} ({}) and {:?} ({}) into {:?}",
            video_path,
            video.codec_name,
            audio_path,
            audio.codec_name,
            output_path
        );

        let request = MergeRequest {
            video: StreamDescriptor {
                path: video_path.to_path_buf(),
                stream: video.clone(),
            },
            audio: StreamDescriptor {
                path: audio_path.to_path_buf(),
                stream: audio.clone(),
            },
            output_path: output_path.to_path_buf(),
            sync: self.sync,
        };

        let preexisting = output_path.exists();
        let converted = match self.backend.convert(&request).await {
            Ok(()) if output_path.is_file() => Ok(()),
            Ok(()) => Err(MergeError::MergeFailed(format!(
                "backend reported success but {:?} was not produced",
                output_path
            ))),
            Err(e) => Err(e),
        };

        if let Err(e) = converted {
            tracing::error!("Merge failed, keeping raw files for recovery: {}", e);
            if preexisting {
                tracing::warn!("Leaving {:?} in place; it predates this merge", output_path);
            } else {
                remove_partial_output(output_path);
            }
            return Err(match e {
                MergeError::MergeFailed(message) => MergeError::MergeFailed(message),
                other => MergeError::MergeFailed(other.to_string()),
            });
        }

        let mut intermediates_removed = true;
        for raw in [video_path, audio_path] {
            if let Err(e) = std::fs::remove_file(raw) {
                tracing::warn!("Failed to delete intermediate {:?}: {}", raw, e);
                intermediates_removed = false;
            }
        }

        tracing::info!("Merge complete: {:?}", output_path);

        Ok(MergeOutput {
            output_path: output_path.to_path_buf(),
            video,
            audio,
            intermediates_removed,
        })
    }
}

fn remove_partial_output(output_path: &Path) {
    match std::fs::remove_file(output_path) {
        Ok(()) => tracing::info!("Removed partial merge output {:?}", output_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {:?}: {}", output_path, e),
    }
}
