//! camvault-capture - Frame sources for Camvault
//!
//! Models live video input as a capability: a [`CaptureBackend`] opens
//! addresses into [`FrameSource`]s and answers liveness probes. Two backends
//! ship with the crate, an FFmpeg subprocess decoder for network cameras and
//! a synthetic test pattern.

pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod source;
pub mod test_pattern;

pub use error::CaptureError;
pub use ffmpeg::FfmpegBackend;
pub use frame::{Frame, FrameFormat};
pub use source::{backend, CaptureBackend, FrameSource, SourceKind};
pub use test_pattern::TestPatternBackend;
