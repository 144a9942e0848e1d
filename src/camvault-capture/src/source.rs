//! Frame source capability

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CaptureError;
use crate::ffmpeg::FfmpegBackend;
use crate::frame::{Frame, FrameFormat};
use crate::test_pattern::TestPatternBackend;

/// An open video stream yielding frames in capture order
pub trait FrameSource: Send {
    /// Geometry and rate of the frames this source produces
    fn format(&self) -> FrameFormat;

    /// Block until the next frame arrives.
    ///
    /// Returns `Ok(None)` once the stream has ended.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying stream. Safe to call more than once.
    fn release(&mut self);
}

/// Opens addresses into frame sources and checks reachability
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CaptureError>;

    /// Lightweight connectivity check; never fails, only reports
    fn probe(&self, address: &str) -> bool;
}

/// Backend selection, fixed when the manager is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Ffmpeg,
    TestPattern,
}

/// Build the backend for a source kind
pub fn backend(kind: SourceKind, probe_timeout: Duration) -> Arc<dyn CaptureBackend> {
    match kind {
        SourceKind::Ffmpeg => Arc::new(FfmpegBackend::new(probe_timeout)),
        SourceKind::TestPattern => Arc::new(TestPatternBackend::default()),
    }
}
