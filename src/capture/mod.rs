//! Device capture implementations
//!
//! Microphone capture through cpal, webcam capture through nokhwa.

pub mod audio;
pub mod traits;
pub mod webcam;

use crate::config::Settings;
use crate::recorder::channel::CaptureChannel;
use crate::recorder::state::CaptureSession;

pub use audio::MicrophoneChannel;
pub use traits::{AudioFormat, FrameSink, FrameSource, Resolution};
pub use webcam::{WebcamChannel, WebcamOptions};

/// Build the device channels required by the session's mode
pub fn channels_for(
    session: &CaptureSession,
    settings: &Settings,
) -> Vec<Box<dyn CaptureChannel>> {
    let mode = session.mode();
    let mut channels: Vec<Box<dyn CaptureChannel>> = Vec::new();

    if mode.captures_audio() {
        channels.push(Box::new(MicrophoneChannel::new(session.raw_audio_path())));
    }

    if mode.captures_video() {
        let options = WebcamOptions {
            camera_index: 0,
            fps: settings.video_fps,
            ffmpeg_path: settings.ffmpeg_path.clone(),
        };
        channels.push(Box::new(WebcamChannel::new(session.raw_video_path(), options)));
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::state::{CaptureMode, StreamKind};
    use std::time::Duration;
    use tempfile::tempdir;

    fn kinds(mode: CaptureMode) -> Vec<StreamKind> {
        let dir = tempdir().unwrap();
        let session =
            CaptureSession::new(mode, dir.path(), "take", Duration::from_secs(5)).unwrap();
        channels_for(&session, &Settings::default())
            .iter()
            .map(|c| c.kind())
            .collect()
    }

    #[test]
    fn test_channels_follow_mode() {
        assert_eq!(kinds(CaptureMode::AudioOnly), vec![StreamKind::Audio]);
        assert_eq!(kinds(CaptureMode::VideoOnly), vec![StreamKind::Video]);
        assert_eq!(
            kinds(CaptureMode::AudioAndVideo),
            vec![StreamKind::Audio, StreamKind::Video]
        );
    }
}
