//! avrec - record the microphone and/or webcam, merge, and expire old files.
//!
//! This is the library crate behind the `avrec` binary. It provides device
//! capture, the capture/merge session pipeline and the retention sweeper.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod retention;
pub mod transcode;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging. `RUST_LOG` overrides the default `avrec=info` filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avrec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
