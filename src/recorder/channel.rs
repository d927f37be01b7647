//! Capture channel trait
//!
//! Each capture source (microphone, camera) implements `CaptureChannel`. The
//! coordinator drives every channel through the same lifecycle:
//! `open` -> `start` -> `finish`, or `open` -> `abort` when a sibling device
//! could not be opened.

use super::signal::StopSignal;
use super::state::{StreamKind, StreamReport};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::watch;

/// Errors raised by capture channels
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {device} ({reason})")]
    DeviceUnavailable { device: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Channel already started")]
    AlreadyStarted,

    #[error("Channel not started")]
    NotStarted,
}

impl CaptureError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        CaptureError::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Encoder(_) => "ENCODER_ERROR",
            CaptureError::AlreadyStarted | CaptureError::NotStarted => "INVALID_STATE",
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Writer side of a stream's `active` flag. Flips to inactive exactly once,
/// at the latest when dropped.
#[derive(Debug)]
pub struct ActiveFlag {
    tx: watch::Sender<bool>,
}

/// Observer side of a stream's `active` flag
#[derive(Debug, Clone)]
pub struct ActiveWatch {
    rx: watch::Receiver<bool>,
}

impl ActiveFlag {
    pub fn new() -> (Self, ActiveWatch) {
        let (tx, rx) = watch::channel(true);
        (Self { tx }, ActiveWatch { rx })
    }

    pub fn deactivate(&self) {
        self.tx.send_if_modified(|active| std::mem::replace(active, false));
    }
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl ActiveWatch {
    pub fn is_active(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the stream is no longer active
    pub async fn ended(&mut self) {
        // A closed channel means the flag was dropped, which also ends the stream.
        let _ = self.rx.wait_for(|active| !*active).await;
    }
}

/// A capture source writing to one sink file
#[async_trait]
pub trait CaptureChannel: Send {
    /// Channel identifier used in logs
    fn id(&self) -> &str;

    fn kind(&self) -> StreamKind;

    /// File the channel writes to
    fn sink_path(&self) -> &Path;

    /// Acquire the device. Must not create or touch the sink file.
    async fn open(&mut self) -> CaptureResult<()>;

    /// Create the sink and begin capturing until `stop` is triggered or the
    /// device ends the stream.
    async fn start(&mut self, stop: StopSignal) -> CaptureResult<ActiveWatch>;

    /// Wait for the capture loop to exit and finalize the sink.
    ///
    /// Callable after a failed `start`; the report then carries the failure.
    async fn finish(&mut self) -> StreamReport;

    /// Release an opened device without ever starting it
    async fn abort(&mut self) {}
}
