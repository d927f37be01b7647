//! Transcode module
//!
//! Multiplexes the raw audio and video files of a session into one MP4.

pub mod client;
pub mod ffmpeg;
pub mod types;

pub use client::{TranscodeClient, Transcoder};
pub use ffmpeg::FfmpegTranscoder;
pub use types::{
    MergeError, MergeOutput, MergeRequest, StreamDescriptor, StreamInfo, SyncOptions,
};
