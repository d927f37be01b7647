//! Recording system module
//!
//! This module implements the capture session architecture:
//! - CaptureChannel trait for each capture device
//! - CaptureCoordinator to drive the channels of one session
//! - Session pipeline running capture followed by the optional merge

pub mod channel;
pub mod coordinator;
pub mod pipeline;
pub mod signal;
pub mod state;

pub use channel::{ActiveFlag, ActiveWatch, CaptureChannel, CaptureError, CaptureResult};
pub use coordinator::{CaptureCoordinator, CaptureEvent, CoordinatorState};
pub use pipeline::{run_session, MergeStatus, SessionReport};
pub use signal::StopSignal;
pub use state::{
    CaptureMode, CaptureOutcome, CaptureSession, StreamKind, StreamReport, StreamStatus,
};
