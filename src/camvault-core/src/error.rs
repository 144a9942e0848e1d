//! Recorder error types

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::CameraId;

/// Failures surfaced by the recording and retention engine.
///
/// None of these are fatal to the process: the affected camera is left
/// Idle or Offline and the error is logged by whoever observes it.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("camera {0} not found")]
    UnknownCamera(CameraId),

    #[error("source unavailable for camera {camera_id}: {reason}")]
    SourceUnavailable { camera_id: CameraId, reason: String },

    #[error("frame read failed for camera {camera_id}: {reason}")]
    ReadFailure { camera_id: CameraId, reason: String },

    #[error("cannot write {path:?}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },

    #[error("storage scan failed at {path:?}: {source}")]
    StorageScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}
