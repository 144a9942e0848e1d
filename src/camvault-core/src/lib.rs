//! Camvault Core Library
//!
//! Camera registry, recording sessions, preview snapshots and storage
//! enforcement, tied together by the [`CameraManager`].

pub mod colored_logger;
pub mod config;
pub mod error;
pub mod layout;
pub mod manager;
pub mod recorder;
pub mod registry;
pub mod snapshot;
pub mod storage;

pub use config::{CameraConfig, Config};
pub use error::RecorderError;
pub use manager::{CameraManager, RecordingFile};
pub use recorder::{RecordingController, RecordingEvent, StartOutcome, StopReason};
pub use registry::{Camera, CameraId, CameraRegistry, CameraStatus, Liveness, Preview};
pub use snapshot::{PreviewKind, SnapshotService};
pub use storage::{EnforcementReport, GuardianPolicy, StorageGuardian, StorageSettings};
