//! Capture trait definitions
//!
//! Device descriptors and the frame-level seams used by the video loop.

use crate::recorder::channel::CaptureResult;
use serde::{Deserialize, Serialize};

/// Format of the default microphone as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Device name
    pub device_name: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Size in bytes of one packed RGB24 frame
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Blocking source of decoded RGB24 frames
pub trait FrameSource {
    /// Native frame size of the device
    fn resolution(&self) -> Resolution;

    /// Block until the next frame is available.
    ///
    /// `None` or an empty buffer means the device has nothing more to give.
    fn read_frame(&mut self) -> Option<Vec<u8>>;
}

/// Sequential writer of RGB24 frames
pub trait FrameSink {
    fn write_frame(&mut self, frame: &[u8]) -> CaptureResult<()>;

    /// Flush and close the output. Further writes are an error.
    fn finish(&mut self) -> CaptureResult<()>;
}
