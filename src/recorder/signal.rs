//! Session-wide stop signal
//!
//! One `StopSignal` exists per capture session. Every capture loop holds a
//! clone and polls it between iterations; once triggered it stays triggered.

use tokio_util::sync::CancellationToken;

/// Level-triggered cancellation flag shared by all capture loops of a session
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Calling it again has no further effect.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Stop signal triggered");
        }
        self.token.cancel();
    }

    /// Non-blocking check, usable from device threads
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been triggered
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}
