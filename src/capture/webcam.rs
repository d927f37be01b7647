//! Webcam capture using nokhwa
//!
//! Frames are read from the default camera in a polling loop, decoded to
//! RGB24 and piped into an FFmpeg process that encodes XVID into an AVI file.

use crate::capture::traits::{FrameSink, FrameSource, Resolution};
use crate::recorder::channel::{
    ActiveFlag, ActiveWatch, CaptureChannel, CaptureError, CaptureResult,
};
use crate::recorder::signal::StopSignal;
use crate::recorder::state::{StreamKind, StreamReport, StreamStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Frame rate of the raw video file
pub const DEFAULT_FPS: u32 = 30;

/// Build the FFmpeg arguments for encoding RGB24 frames from stdin into XVID/AVI
pub fn build_encoder_args(resolution: Resolution, fps: u32, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "rgb24".to_string(),
        "-video_size".to_string(),
        format!("{}x{}", resolution.width, resolution.height),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "mpeg4".to_string(),
        "-vtag".to_string(),
        "xvid".to_string(),
        "-qscale:v".to_string(),
        "3".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// FFmpeg encoder for the raw webcam file
pub struct XvidAviWriter {
    process: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    frame_count: u64,
    output: PathBuf,
}

/// Longest stderr excerpt carried in an encoder error
const STDERR_TAIL: usize = 2048;

/// Read the encoder's stderr until it closes
fn drain_stderr(mut pipe: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf) {
        tracing::debug!("Stopped reading FFmpeg stderr: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

impl XvidAviWriter {
    pub fn spawn(
        ffmpeg: &str,
        resolution: Resolution,
        fps: u32,
        output: &Path,
    ) -> CaptureResult<Self> {
        let mut command = Command::new(ffmpeg);
        command.args(build_encoder_args(resolution, fps, output));
        let writer = Self::from_command(command, output)?;

        tracing::info!(
            "Started FFmpeg webcam encoder: {}x{} @ {}fps, output: {:?}",
            resolution.width,
            resolution.height,
            fps,
            output
        );
        Ok(writer)
    }

    /// Start an encoder process reading frames on stdin. Its stderr is read on
    /// a separate thread so the process never blocks on a full pipe.
    fn from_command(mut command: Command, output: &Path) -> CaptureResult<Self> {
        let mut process = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::Encoder(format!("Failed to start FFmpeg: {e}")))?;

        let stdin = process.stdin.take();
        let stderr = match process.stderr.take() {
            Some(pipe) => {
                let reader = std::thread::Builder::new()
                    .name("ffmpeg-stderr".to_string())
                    .spawn(move || drain_stderr(pipe));
                match reader {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        let _ = process.kill();
                        let _ = process.wait();
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            process,
            stdin,
            stderr,
            frame_count: 0,
            output: output.to_path_buf(),
        })
    }
}

impl FrameSink for XvidAviWriter {
    fn write_frame(&mut self, frame: &[u8]) -> CaptureResult<()> {
        let stdin = self.stdin.as_mut().ok_or(CaptureError::NotStarted)?;
        stdin.write_all(frame)?;
        self.frame_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> CaptureResult<()> {
        // Closing stdin signals EOF so FFmpeg writes the AVI index
        drop(self.stdin.take());

        let status = self.process.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(CaptureError::Encoder(format!(
                "FFmpeg exited with {status}: {}",
                stderr_tail(&stderr)
            )));
        }

        tracing::info!(
            "FFmpeg webcam finished: {} frames, output: {:?}",
            self.frame_count,
            self.output
        );
        Ok(())
    }
}

impl Drop for XvidAviWriter {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.process.kill();
        }
    }
}

/// Why the frame loop exited
#[derive(Debug)]
pub enum LoopExit {
    Stopped,
    EndOfStream,
    Failed(CaptureError),
}

/// Poll `source` and append each frame to `sink` until stopped.
///
/// The stop signal is checked once before every read, so a stop request
/// takes effect after at most one blocking read.
pub fn run_frame_loop<S, W>(source: &mut S, sink: &mut W, stop: &StopSignal) -> (LoopExit, u64)
where
    S: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
{
    let expected_len = source.resolution().rgb_frame_len();
    let mut frames = 0u64;

    loop {
        if stop.is_triggered() {
            return (LoopExit::Stopped, frames);
        }

        let frame = match source.read_frame() {
            Some(frame) if !frame.is_empty() => frame,
            _ => {
                tracing::info!("Camera returned an empty frame after {} frames", frames);
                return (LoopExit::EndOfStream, frames);
            }
        };

        if frame.len() != expected_len {
            tracing::warn!(
                "Invalid frame: {} bytes, expected {}; ending stream",
                frame.len(),
                expected_len
            );
            return (LoopExit::EndOfStream, frames);
        }

        if let Err(e) = sink.write_frame(&frame) {
            tracing::error!("Failed to write frame {}: {}", frames, e);
            return (LoopExit::Failed(e), frames);
        }
        frames += 1;
    }
}

/// Default camera opened through nokhwa
struct NokhwaSource {
    camera: Camera,
    resolution: Resolution,
}

impl NokhwaSource {
    fn open(index: u32) -> CaptureResult<Self> {
        let device = format!("camera {index}");
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| CaptureError::device_unavailable(&device, e))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::device_unavailable(&device, e))?;

        let native = camera.resolution();
        let resolution = Resolution {
            width: native.width(),
            height: native.height(),
        };

        tracing::info!(
            "Webcam opened: {} {}x{}",
            camera.info().human_name(),
            resolution.width,
            resolution.height
        );

        Ok(Self { camera, resolution })
    }
}

impl FrameSource for NokhwaSource {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read_frame(&mut self) -> Option<Vec<u8>> {
        let buffer = match self.camera.frame() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed to capture frame: {}", e);
                return None;
            }
        };

        match buffer.decode_image::<RgbFormat>() {
            Ok(image) => Some(image.into_raw()),
            Err(e) => {
                tracing::warn!("Failed to decode frame: {}", e);
                None
            }
        }
    }
}

impl Drop for NokhwaSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {}", e);
        }
    }
}

/// Options for the webcam channel
#[derive(Debug, Clone)]
pub struct WebcamOptions {
    pub camera_index: u32,
    pub fps: u32,
    pub ffmpeg_path: String,
}

impl Default for WebcamOptions {
    fn default() -> Self {
        Self {
            camera_index: 0,
            fps: DEFAULT_FPS,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Sent to the camera thread to begin writing
struct StartCommand {
    stop: StopSignal,
    active: ActiveFlag,
    started: oneshot::Sender<CaptureResult<()>>,
}

struct VideoRun {
    status: StreamStatus,
    finalized: bool,
    frames: u64,
}

/// Body of the camera thread. The nokhwa camera lives and dies on this thread.
fn run_camera(
    options: WebcamOptions,
    sink_path: PathBuf,
    ready: oneshot::Sender<CaptureResult<Resolution>>,
    go: oneshot::Receiver<StartCommand>,
) -> VideoRun {
    let not_started = |status| VideoRun {
        status,
        finalized: false,
        frames: 0,
    };

    let mut source = match NokhwaSource::open(options.camera_index) {
        Ok(s) => s,
        Err(e) => {
            let status = StreamStatus::failed(e.code(), e.to_string());
            let _ = ready.send(Err(e));
            return not_started(status);
        }
    };
    let resolution = source.resolution();
    let _ = ready.send(Ok(resolution));

    let Ok(StartCommand {
        stop,
        active,
        started,
    }) = go.blocking_recv()
    else {
        tracing::info!("Webcam released without recording");
        return not_started(StreamStatus::failed("ABORTED", "session aborted before start"));
    };

    let mut writer =
        match XvidAviWriter::spawn(&options.ffmpeg_path, resolution, options.fps, &sink_path) {
            Ok(w) => w,
            Err(e) => {
                let status = StreamStatus::failed(e.code(), e.to_string());
                let _ = started.send(Err(e));
                return not_started(status);
            }
        };
    let _ = started.send(Ok(()));

    let capture_start = std::time::Instant::now();
    let (exit, frames) = run_frame_loop(&mut source, &mut writer, &stop);
    let elapsed = capture_start.elapsed().as_secs_f64();
    tracing::info!(
        "Webcam captured {} frames in {:.2}s ({:.1} fps actual)",
        frames,
        elapsed,
        if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 }
    );

    drop(source);

    let mut status = match exit {
        LoopExit::Stopped => StreamStatus::Completed,
        LoopExit::EndOfStream => StreamStatus::EndOfStream,
        LoopExit::Failed(e) => StreamStatus::failed(e.code(), e.to_string()),
    };

    let finalized = match writer.finish() {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to finalize {:?}, recording lost: {}", sink_path, e);
            status = StreamStatus::failed(e.code(), e.to_string());
            false
        }
    };

    active.deactivate();
    tracing::info!("Webcam capture thread stopped");

    VideoRun {
        status,
        finalized,
        frames,
    }
}

/// Webcam capture channel writing a raw AVI file
pub struct WebcamChannel {
    id: String,
    sink_path: PathBuf,
    options: WebcamOptions,
    go: Option<oneshot::Sender<StartCommand>>,
    started_at: Option<DateTime<Utc>>,
    start_failure: Option<StreamStatus>,
    capture_thread: Option<JoinHandle<VideoRun>>,
}

impl WebcamChannel {
    pub fn new(sink_path: impl Into<PathBuf>, options: WebcamOptions) -> Self {
        Self {
            id: "webcam".to_string(),
            sink_path: sink_path.into(),
            options,
            go: None,
            started_at: None,
            start_failure: None,
            capture_thread: None,
        }
    }

    async fn join_thread(&mut self) -> Option<VideoRun> {
        let handle = self.capture_thread.take()?;
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(run)) => Some(run),
            _ => {
                tracing::error!("Webcam capture thread panicked");
                None
            }
        }
    }

    fn report(&self, status: StreamStatus, finalized: bool, units_written: u64) -> StreamReport {
        let ended_at = Utc::now();
        StreamReport {
            kind: StreamKind::Video,
            sink_path: self.sink_path.clone(),
            status,
            finalized,
            units_written,
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
        }
    }
}

#[async_trait]
impl CaptureChannel for WebcamChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn sink_path(&self) -> &Path {
        &self.sink_path
    }

    async fn open(&mut self) -> CaptureResult<()> {
        if self.capture_thread.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        if tokio::process::Command::new(&self.options.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_err()
        {
            return Err(CaptureError::Encoder(format!(
                "FFmpeg not found at {:?}",
                self.options.ffmpeg_path
            )));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (go_tx, go_rx) = oneshot::channel();
        let options = self.options.clone();
        let sink_path = self.sink_path.clone();

        let handle = std::thread::Builder::new()
            .name("webcam-capture".to_string())
            .spawn(move || run_camera(options, sink_path, ready_tx, go_rx))?;
        self.capture_thread = Some(handle);

        match ready_rx.await {
            Ok(Ok(resolution)) => {
                tracing::debug!(
                    "Webcam ready at {}x{}",
                    resolution.width,
                    resolution.height
                );
                self.go = Some(go_tx);
                Ok(())
            }
            Ok(Err(e)) => {
                self.join_thread().await;
                Err(e)
            }
            Err(_) => {
                self.join_thread().await;
                Err(CaptureError::device_unavailable(
                    format!("camera {}", self.options.camera_index),
                    "capture thread exited",
                ))
            }
        }
    }

    async fn start(&mut self, stop: StopSignal) -> CaptureResult<ActiveWatch> {
        let go = self.go.take().ok_or(CaptureError::NotStarted)?;
        let (active, watch) = ActiveFlag::new();
        let (started_tx, started_rx) = oneshot::channel();

        self.started_at = Some(Utc::now());
        let command = StartCommand {
            stop,
            active,
            started: started_tx,
        };
        if go.send(command).is_err() {
            let err = CaptureError::Encoder("webcam capture thread exited".to_string());
            self.start_failure = Some(StreamStatus::failed(err.code(), err.to_string()));
            return Err(err);
        }

        match started_rx.await {
            Ok(Ok(())) => Ok(watch),
            Ok(Err(e)) => {
                self.start_failure = Some(StreamStatus::failed(e.code(), e.to_string()));
                Err(e)
            }
            Err(_) => {
                let err = CaptureError::Encoder("webcam capture thread exited".to_string());
                self.start_failure = Some(StreamStatus::failed(err.code(), err.to_string()));
                Err(err)
            }
        }
    }

    async fn finish(&mut self) -> StreamReport {
        self.go = None;
        let run = self.join_thread().await;

        if let Some(status) = self.start_failure.take() {
            return self.report(status, false, 0);
        }
        match run {
            Some(run) => self.report(run.status, run.finalized, run.frames),
            None => self.report(
                StreamStatus::failed("IO_ERROR", "capture thread panicked or never started"),
                false,
                0,
            ),
        }
    }

    async fn abort(&mut self) {
        // Dropping the start sender releases the camera thread
        self.go = None;
        self.join_thread().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        resolution: Resolution,
        frames: Vec<Vec<u8>>,
        reads: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self {
                resolution: Resolution { width: 2, height: 1 },
                frames,
                reads: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn resolution(&self) -> Resolution {
            self.resolution
        }

        fn read_frame(&mut self) -> Option<Vec<u8>> {
            let frame = self.frames.get(self.reads).cloned();
            self.reads += 1;
            frame
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, frame: &[u8]) -> CaptureResult<()> {
            if self.fail_after == Some(self.frames.len()) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> CaptureResult<()> {
            Ok(())
        }
    }

    fn frame(value: u8) -> Vec<u8> {
        vec![value; 6]
    }

    #[test]
    fn test_empty_frame_ends_stream_in_order() {
        let mut source =
            ScriptedSource::new(vec![frame(1), frame(2), frame(3), Vec::new(), frame(9)]);
        let mut sink = RecordingSink::default();

        let (exit, frames) = run_frame_loop(&mut source, &mut sink, &StopSignal::new());

        assert!(matches!(exit, LoopExit::EndOfStream));
        assert_eq!(frames, 3);
        assert_eq!(sink.frames, vec![frame(1), frame(2), frame(3)]);
    }

    #[test]
    fn test_stop_checked_before_read() {
        let mut source = ScriptedSource::new(vec![frame(1)]);
        let mut sink = RecordingSink::default();
        let stop = StopSignal::new();
        stop.trigger();

        let (exit, frames) = run_frame_loop(&mut source, &mut sink, &stop);

        assert!(matches!(exit, LoopExit::Stopped));
        assert_eq!(frames, 0);
        assert_eq!(source.reads, 0);
    }

    #[test]
    fn test_wrong_sized_frame_is_end_of_stream() {
        let mut source = ScriptedSource::new(vec![frame(1), vec![0; 5]]);
        let mut sink = RecordingSink::default();

        let (exit, frames) = run_frame_loop(&mut source, &mut sink, &StopSignal::new());

        assert!(matches!(exit, LoopExit::EndOfStream));
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_write_failure_fails_stream() {
        let mut source = ScriptedSource::new(vec![frame(1), frame(2), frame(3)]);
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };

        let (exit, frames) = run_frame_loop(&mut source, &mut sink, &StopSignal::new());

        match exit {
            LoopExit::Failed(e) => assert_eq!(e.code(), "IO_ERROR"),
            other => panic!("unexpected exit: {other:?}"),
        }
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_encoder_args_target_xvid_avi() {
        let args = build_encoder_args(
            Resolution {
                width: 1280,
                height: 720,
            },
            30,
            Path::new("/tmp/take.avi"),
        );

        assert!(args.windows(2).any(|w| w == ["-video_size", "1280x720"]));
        assert!(args.windows(2).any(|w| w == ["-framerate", "30"]));
        assert!(args.windows(2).any(|w| w == ["-vtag", "xvid"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/take.avi"));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_encoder_does_not_stall_frame_writes() {
        let dir = tempfile::tempdir().unwrap();
        // Floods stderr well past the pipe buffer before reading any input
        let mut writer = XvidAviWriter::from_command(
            shell("head -c 1000000 /dev/zero >&2; cat > /dev/null"),
            &dir.path().join("take.avi"),
        )
        .unwrap();

        for _ in 0..200 {
            writer.write_frame(&[0u8; 4096]).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.frame_count, 200);
    }

    #[cfg(unix)]
    #[test]
    fn test_encoder_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = XvidAviWriter::from_command(
            shell("echo 'Unknown encoder' >&2; exit 3"),
            &dir.path().join("take.avi"),
        )
        .unwrap();

        let err = writer.finish().unwrap_err();
        assert_eq!(err.code(), "ENCODER_ERROR");
        assert!(err.to_string().contains("Unknown encoder"));
    }

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = format!("{}last line", "x".repeat(STDERR_TAIL * 2));
        let tail = stderr_tail(&long);
        assert_eq!(tail.len(), STDERR_TAIL);
        assert!(tail.ends_with("last line"));
        assert_eq!(stderr_tail("  short \n"), "short");
    }

    #[tokio::test]
    async fn test_start_without_open_is_rejected() {
        let mut channel = WebcamChannel::new("/tmp/never.avi", WebcamOptions::default());
        let err = channel.start(StopSignal::new()).await.unwrap_err();
        assert!(matches!(err, CaptureError::NotStarted));
    }
}
