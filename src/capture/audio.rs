//! Microphone capture using cpal and hound
//!
//! The default input device is opened at its native rate and channel count.
//! Every buffer the backend delivers is appended to a 16-bit PCM WAV file in
//! delivery order; the header is patched when the stream is finalized.

use crate::capture::traits::AudioFormat;
use crate::recorder::channel::{
    ActiveFlag, ActiveWatch, CaptureChannel, CaptureError, CaptureResult,
};
use crate::recorder::signal::StopSignal;
use crate::recorder::state::{StreamKind, StreamReport, StreamStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// How often the capture thread checks the stop signal
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

type WavSink = WavWriter<BufWriter<File>>;
type SharedWavSink = Arc<Mutex<Option<WavSink>>>;

/// Append one delivered buffer as 16-bit PCM. Returns the number of samples written.
pub fn append_buffer<T, W>(writer: &mut WavWriter<W>, data: &[T]) -> hound::Result<u64>
where
    T: cpal::Sample,
    i16: FromSample<T>,
    W: Write + Seek,
{
    for &sample in data {
        writer.write_sample(sample.to_sample::<i16>())?;
    }
    Ok(data.len() as u64)
}

fn wav_spec(format: &AudioFormat) -> WavSpec {
    WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn wav_error(error: hound::Error) -> CaptureError {
    match error {
        hound::Error::IoError(e) => CaptureError::Io(e),
        other => CaptureError::Encoder(other.to_string()),
    }
}

/// What the capture thread hands back when it exits
struct AudioRun {
    status: StreamStatus,
    finalized: bool,
    samples: u64,
}

/// State shared between the cpal callback and the capture thread
#[derive(Clone)]
struct CallbackState {
    writer: SharedWavSink,
    samples: Arc<AtomicU64>,
    write_failed: Arc<AtomicBool>,
    /// First failure seen by either callback
    failure: Arc<Mutex<Option<StreamStatus>>>,
}

impl CallbackState {
    fn new(writer: WavSink) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            samples: Arc::new(AtomicU64::new(0)),
            write_failed: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn on_data<T>(&self, data: &[T])
    where
        T: cpal::Sample,
        i16: FromSample<T>,
    {
        if self.write_failed.load(Ordering::Relaxed) {
            return;
        }

        let mut guard = self.writer.lock();
        if let Some(ref mut writer) = *guard {
            match append_buffer(writer, data) {
                Ok(n) => {
                    self.samples.fetch_add(n, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!("Failed to append audio buffer: {}", e);
                    self.fail(StreamStatus::failed("IO_ERROR", e.to_string()));
                }
            }
        }
    }

    /// Backend error callback. The device is gone or broken; end the stream.
    fn on_error(&self, error: cpal::StreamError) {
        tracing::error!("Audio stream error: {}", error);
        self.fail(StreamStatus::failed("DEVICE_UNAVAILABLE", error.to_string()));
    }

    fn fail(&self, status: StreamStatus) {
        self.failure.lock().get_or_insert(status);
        self.write_failed.store(true, Ordering::SeqCst);
    }
}

/// Whether the microphone's native sample format can be recorded
fn is_supported(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::I8
            | SampleFormat::I16
            | SampleFormat::I32
            | SampleFormat::I64
            | SampleFormat::U8
            | SampleFormat::U16
            | SampleFormat::U32
            | SampleFormat::U64
            | SampleFormat::F32
            | SampleFormat::F64
    )
}

/// Microphone capture channel writing a raw WAV file
pub struct MicrophoneChannel {
    id: String,
    sink_path: PathBuf,
    format: Option<AudioFormat>,
    sample_format: Option<SampleFormat>,
    started_at: Option<DateTime<Utc>>,
    start_failure: Option<StreamStatus>,
    capture_thread: Option<JoinHandle<AudioRun>>,
}

impl MicrophoneChannel {
    pub fn new(sink_path: impl Into<PathBuf>) -> Self {
        Self {
            id: "microphone".to_string(),
            sink_path: sink_path.into(),
            format: None,
            sample_format: None,
            started_at: None,
            start_failure: None,
            capture_thread: None,
        }
    }

    fn report(&self, status: StreamStatus, finalized: bool, units_written: u64) -> StreamReport {
        let ended_at = Utc::now();
        StreamReport {
            kind: StreamKind::Audio,
            sink_path: self.sink_path.clone(),
            status,
            finalized,
            units_written,
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
        }
    }
}

fn default_input_device() -> CaptureResult<cpal::Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::device_unavailable("default microphone", "no input device"))
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    state: CallbackState,
) -> Result<Stream, String> {
    match sample_format {
        SampleFormat::I8 => build_stream_typed::<i8>(device, config, state),
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, state),
        SampleFormat::I32 => build_stream_typed::<i32>(device, config, state),
        SampleFormat::I64 => build_stream_typed::<i64>(device, config, state),
        SampleFormat::U8 => build_stream_typed::<u8>(device, config, state),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, state),
        SampleFormat::U32 => build_stream_typed::<u32>(device, config, state),
        SampleFormat::U64 => build_stream_typed::<u64>(device, config, state),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, state),
        SampleFormat::F64 => build_stream_typed::<f64>(device, config, state),
        other => Err(format!("unsupported sample format {other:?}")),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    state: CallbackState,
) -> Result<Stream, String>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let error_state = state.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| state.on_data(data),
            move |err| error_state.on_error(err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Body of the capture thread.
///
/// The cpal stream is created and dropped on this thread since it is not
/// `Send` on every host.
fn run_capture(
    sink_path: PathBuf,
    format: AudioFormat,
    sample_format: SampleFormat,
    stop: StopSignal,
    active: ActiveFlag,
    ready: oneshot::Sender<CaptureResult<()>>,
) -> AudioRun {
    let not_started = |status| AudioRun {
        status,
        finalized: false,
        samples: 0,
    };

    let writer = match WavWriter::create(&sink_path, wav_spec(&format)) {
        Ok(w) => w,
        Err(e) => {
            let err = wav_error(e);
            let status = StreamStatus::failed(err.code(), err.to_string());
            let _ = ready.send(Err(err));
            return not_started(status);
        }
    };
    let state = CallbackState::new(writer);

    let stream = default_input_device().and_then(|device| {
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = build_stream(&device, &config, sample_format, state.clone())
            .map_err(|e| CaptureError::device_unavailable(&format.device_name, e))?;
        stream
            .play()
            .map_err(|e| CaptureError::device_unavailable(&format.device_name, e))?;
        Ok(stream)
    });

    let stream = match stream {
        Ok(s) => s,
        Err(err) => {
            // Nothing was captured; leave no file behind.
            state.writer.lock().take();
            if let Err(e) = std::fs::remove_file(&sink_path) {
                tracing::warn!("Failed to remove unused audio sink {:?}: {}", sink_path, e);
            }
            let status = StreamStatus::failed(err.code(), err.to_string());
            let _ = ready.send(Err(err));
            return not_started(status);
        }
    };

    let _ = ready.send(Ok(()));
    tracing::info!(
        "Microphone capture started: {} ({}Hz, {}ch) -> {:?}",
        format.device_name,
        format.sample_rate,
        format.channels,
        sink_path
    );

    while !stop.is_triggered() && !state.write_failed.load(Ordering::SeqCst) {
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    // Unregisters the callback; no buffer arrives after this point.
    drop(stream);

    let mut status = state
        .failure
        .lock()
        .take()
        .unwrap_or(StreamStatus::Completed);

    let finalized = match state.writer.lock().take() {
        Some(writer) => match writer.finalize() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to finalize WAV {:?}, recording lost: {}", sink_path, e);
                status = StreamStatus::failed("IO_ERROR", format!("finalize failed: {e}"));
                false
            }
        },
        None => false,
    };

    let samples = state.samples.load(Ordering::Relaxed);
    active.deactivate();

    tracing::info!(
        "Microphone capture stopped: {} samples written to {:?}",
        samples,
        sink_path
    );

    AudioRun {
        status,
        finalized,
        samples,
    }
}

#[async_trait]
impl CaptureChannel for MicrophoneChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn sink_path(&self) -> &Path {
        &self.sink_path
    }

    async fn open(&mut self) -> CaptureResult<()> {
        let device = default_input_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::device_unavailable(&device_name, e))?;

        if !is_supported(config.sample_format()) {
            return Err(CaptureError::device_unavailable(
                &device_name,
                format!("unsupported sample format {:?}", config.sample_format()),
            ));
        }

        let format = AudioFormat {
            device_name,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };

        tracing::info!(
            "Microphone opened: {} ({}Hz, {}ch, {:?})",
            format.device_name,
            format.sample_rate,
            format.channels,
            config.sample_format()
        );

        self.sample_format = Some(config.sample_format());
        self.format = Some(format);
        Ok(())
    }

    async fn start(&mut self, stop: StopSignal) -> CaptureResult<ActiveWatch> {
        if self.capture_thread.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        let (format, sample_format) = match (self.format.clone(), self.sample_format) {
            (Some(f), Some(s)) => (f, s),
            _ => return Err(CaptureError::NotStarted),
        };

        let (active, watch) = ActiveFlag::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let sink_path = self.sink_path.clone();

        self.started_at = Some(Utc::now());
        let handle = std::thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || run_capture(sink_path, format, sample_format, stop, active, ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.capture_thread = Some(handle);
                Ok(watch)
            }
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || handle.join()).await;
                self.start_failure = Some(StreamStatus::failed(e.code(), e.to_string()));
                Err(e)
            }
            Err(_) => {
                let err = CaptureError::Encoder("microphone capture thread exited".to_string());
                self.start_failure = Some(StreamStatus::failed(err.code(), err.to_string()));
                Err(err)
            }
        }
    }

    async fn finish(&mut self) -> StreamReport {
        let Some(handle) = self.capture_thread.take() else {
            let status = self
                .start_failure
                .take()
                .unwrap_or_else(|| StreamStatus::failed("INVALID_STATE", "never started"));
            return self.report(status, false, 0);
        };

        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(run)) => self.report(run.status, run.finalized, run.samples),
            _ => {
                tracing::error!("Microphone capture thread panicked");
                self.report(
                    StreamStatus::failed("IO_ERROR", "capture thread panicked"),
                    false,
                    0,
                )
            }
        }
    }
}
