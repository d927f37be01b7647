//! Fake devices and a fake transcoder for driving sessions without hardware.

#![allow(dead_code)]

use async_trait::async_trait;
use avrec::recorder::{
    ActiveFlag, ActiveWatch, CaptureChannel, CaptureError, CaptureResult, StopSignal, StreamKind,
    StreamReport, StreamStatus,
};
use avrec::transcode::{MergeError, MergeRequest, StreamInfo, Transcoder};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shared log of lifecycle calls, e.g. `"audio:open"`
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, Default)]
pub enum Behavior {
    /// Capture until stopped
    #[default]
    Healthy,
    /// `open` reports the device as unavailable
    Unavailable,
    /// `start` fails after open succeeded
    StartFails,
    /// Device returns an empty frame after this many units
    EndsAfter(u64),
    /// Writer fails after this many units
    FailsAfter(u64),
}

pub struct FakeChannel {
    id: String,
    kind: StreamKind,
    sink_path: PathBuf,
    behavior: Behavior,
    log: CallLog,
    started_at: chrono::DateTime<Utc>,
    task: Option<JoinHandle<(StreamStatus, u64)>>,
    start_error: Option<String>,
}

impl FakeChannel {
    pub fn new(kind: StreamKind, sink_path: PathBuf, behavior: Behavior, log: CallLog) -> Self {
        Self {
            id: format!("fake-{kind}"),
            kind,
            sink_path,
            behavior,
            log,
            started_at: Utc::now(),
            task: None,
            start_error: None,
        }
    }

    pub fn boxed(
        kind: StreamKind,
        sink_path: PathBuf,
        behavior: Behavior,
        log: &CallLog,
    ) -> Box<dyn CaptureChannel> {
        Box::new(Self::new(kind, sink_path, behavior, log.clone()))
    }

    fn record(&self, call: &str) {
        self.log.lock().push(format!("{}:{}", self.kind, call));
    }
}

#[async_trait]
impl CaptureChannel for FakeChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn sink_path(&self) -> &Path {
        &self.sink_path
    }

    async fn open(&mut self) -> CaptureResult<()> {
        self.record("open");
        match self.behavior {
            Behavior::Unavailable => Err(CaptureError::device_unavailable(
                self.id.clone(),
                "no such device",
            )),
            _ => Ok(()),
        }
    }

    async fn start(&mut self, stop: StopSignal) -> CaptureResult<ActiveWatch> {
        self.record("start");
        if let Behavior::StartFails = self.behavior {
            let err = CaptureError::device_unavailable(self.id.clone(), "stream refused");
            self.start_error = Some(err.to_string());
            return Err(err);
        }

        let mut file = std::fs::File::create(&self.sink_path)?;
        file.write_all(b"HEAD")?;
        drop(file);

        self.started_at = Utc::now();
        let (flag, watch) = ActiveFlag::new();
        let path = self.sink_path.clone();
        let behavior = self.behavior;

        self.task = Some(tokio::spawn(async move {
            let mut units = 0u64;
            let status = loop {
                if stop.is_triggered() {
                    break StreamStatus::Completed;
                }
                match behavior {
                    Behavior::EndsAfter(n) if units >= n => break StreamStatus::EndOfStream,
                    Behavior::FailsAfter(n) if units >= n => {
                        break StreamStatus::failed("IO_ERROR", "disk full")
                    }
                    _ => {}
                }
                let appended = OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| f.write_all(&[0u8; 16]));
                if let Err(e) = appended {
                    break StreamStatus::failed("IO_ERROR", e.to_string());
                }
                units += 1;

                tokio::select! {
                    _ = stop.triggered() => {}
                    _ = tokio::time::sleep(Duration::from_millis(2)) => {}
                }
            };
            flag.deactivate();
            (status, units)
        }));

        Ok(watch)
    }

    async fn finish(&mut self) -> StreamReport {
        self.record("finish");
        let (status, units_written, finalized) = match self.task.take() {
            Some(task) => match task.await {
                Ok((status, units)) => (status, units, true),
                Err(e) => (StreamStatus::failed("IO_ERROR", e.to_string()), 0, false),
            },
            None => (
                StreamStatus::failed(
                    "DEVICE_UNAVAILABLE",
                    self.start_error.clone().unwrap_or_default(),
                ),
                0,
                false,
            ),
        };

        StreamReport {
            kind: self.kind,
            sink_path: self.sink_path.clone(),
            status,
            finalized,
            units_written,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }

    async fn abort(&mut self) {
        self.record("abort");
    }
}

/// Transcoder that concatenates its inputs into the output file
#[derive(Default)]
pub struct FakeTranscoder {
    pub fail_convert: bool,
    pub convert_calls: AtomicUsize,
    pub last_request: Mutex<Option<MergeRequest>>,
}

impl FakeTranscoder {
    pub fn failing() -> Self {
        Self {
            fail_convert: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.convert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn inspect(
        &self,
        path: &Path,
        kind: StreamKind,
    ) -> Result<Option<StreamInfo>, MergeError> {
        let len = std::fs::metadata(path)?.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(StreamInfo {
            kind,
            index: 0,
            codec_name: format!("fake-{kind}"),
            duration_secs: None,
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
        }))
    }

    async fn convert(&self, request: &MergeRequest) -> Result<(), MergeError> {
        self.convert_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        if self.fail_convert {
            return Err(MergeError::MergeFailed("exit status: 1".to_string()));
        }
        let mut merged = std::fs::read(&request.video.path)?;
        merged.extend(std::fs::read(&request.audio.path)?);
        std::fs::write(&request.output_path, merged)?;
        Ok(())
    }
}

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Stop request resolving after `ms` milliseconds
pub fn stop_after(ms: u64) -> tokio::time::Sleep {
    tokio::time::sleep(Duration::from_millis(ms))
}
