//! Capture coordinator
//!
//! Opens and starts every channel of a session, owns the session's single
//! stop signal, and waits for all channels to finalize once it is triggered.

use super::channel::{ActiveWatch, CaptureChannel, CaptureError, CaptureResult};
use super::signal::StopSignal;
use super::state::{CaptureOutcome, CaptureSession, StreamKind, StreamReport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Lifecycle of a coordinator. A coordinator serves exactly one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Opening,
    Recording,
    Finalizing,
    Complete,
}

/// Events emitted during capture
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Every channel that could be started is capturing
    Started,
    /// A channel failed to start; the others keep running
    StreamFailed { kind: StreamKind, message: String },
    /// Stop was requested or every stream ended on its own
    Stopping,
    /// A channel finalized its sink
    StreamFinished(StreamReport),
    /// Session aborted before any sink was created
    Aborted(String),
}

/// Drives the capture channels of one session
pub struct CaptureCoordinator {
    state: Arc<RwLock<CoordinatorState>>,
    channels: Vec<Box<dyn CaptureChannel>>,
    stop: StopSignal,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureCoordinator {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            state: Arc::new(RwLock::new(CoordinatorState::Idle)),
            channels: Vec::new(),
            stop: StopSignal::new(),
            event_tx,
        }
    }

    pub fn add_channel(&mut self, channel: Box<dyn CaptureChannel>) {
        tracing::info!("Adding channel: {}", channel.id());
        self.channels.push(channel);
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Handle to the session's stop signal. Triggering it ends `run`.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    fn set_state(&self, state: CoordinatorState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: CaptureEvent) {
        emit(&self.event_tx, event);
    }

    /// Run the session until `stop_request` resolves, the stop signal is
    /// triggered, or every started stream has ended by itself.
    ///
    /// All channels are opened before any is started; if one cannot be
    /// opened the others are released and no sink file is created.
    pub async fn run<F>(
        &mut self,
        session: &CaptureSession,
        stop_request: F,
    ) -> CaptureResult<CaptureOutcome>
    where
        F: Future<Output = ()>,
    {
        if self.state() != CoordinatorState::Idle {
            return Err(CaptureError::AlreadyStarted);
        }
        self.set_state(CoordinatorState::Opening);

        tracing::info!(
            "Session {}: opening {} channel(s) for {} capture",
            session.id(),
            self.channels.len(),
            session.mode()
        );

        for index in 0..self.channels.len() {
            if let Err(e) = self.channels[index].open().await {
                tracing::error!(
                    "Session {}: {} unavailable: {}",
                    session.id(),
                    self.channels[index].id(),
                    e
                );
                for opened in &mut self.channels[..index] {
                    opened.abort().await;
                }
                self.emit(CaptureEvent::Aborted(e.to_string()));
                self.set_state(CoordinatorState::Complete);
                return Err(e);
            }
        }

        let mut watches: Vec<ActiveWatch> = Vec::new();
        for channel in &mut self.channels {
            match channel.start(self.stop.clone()).await {
                Ok(watch) => watches.push(watch),
                Err(e) => {
                    tracing::error!("Failed to start {}: {}", channel.id(), e);
                    emit(
                        &self.event_tx,
                        CaptureEvent::StreamFailed {
                            kind: channel.kind(),
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        self.set_state(CoordinatorState::Recording);
        self.emit(CaptureEvent::Started);
        tracing::info!("Session {}: capturing {} stream(s)", session.id(), watches.len());

        let all_ended = async {
            for watch in watches.iter_mut() {
                watch.ended().await;
            }
        };

        tokio::select! {
            _ = stop_request => tracing::info!("Stop requested"),
            _ = self.stop.triggered() => tracing::info!("Stop signal triggered"),
            _ = all_ended => tracing::info!("All capture streams ended on their own"),
        }

        self.stop.trigger();
        self.set_state(CoordinatorState::Finalizing);
        self.emit(CaptureEvent::Stopping);

        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            let report = channel.finish().await;
            tracing::info!(
                "{} finished: {:?}, finalized={}, {} units -> {:?}",
                channel.id(),
                report.status,
                report.finalized,
                report.units_written,
                report.sink_path
            );
            emit(&self.event_tx, CaptureEvent::StreamFinished(report.clone()));
            streams.push(report);
        }

        self.set_state(CoordinatorState::Complete);

        Ok(CaptureOutcome {
            mode: session.mode(),
            streams,
        })
    }
}

impl Default for CaptureCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Nobody listening is fine
fn emit(tx: &broadcast::Sender<CaptureEvent>, event: CaptureEvent) {
    let _ = tx.send(event);
}
