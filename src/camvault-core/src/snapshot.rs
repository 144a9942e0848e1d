//! Preview stills for cameras

use camvault_capture::CaptureBackend;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::error::RecorderError;
use crate::layout;
use crate::registry::{CameraId, CameraRegistry};
use crate::storage::{read_settings, SharedSettings};

/// Which preview file a capture targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Taken when a camera is added or edited
    Initial,
    /// Taken on demand
    Last,
}

impl PreviewKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            PreviewKind::Initial => layout::INIT_PREVIEW,
            PreviewKind::Last => layout::LAST_PREVIEW,
        }
    }
}

/// Captures single frames to represent each camera's view
#[derive(Clone)]
pub struct SnapshotService {
    registry: Arc<CameraRegistry>,
    backend: Arc<dyn CaptureBackend>,
    settings: SharedSettings,
}

impl SnapshotService {
    pub fn new(
        registry: Arc<CameraRegistry>,
        backend: Arc<dyn CaptureBackend>,
        settings: SharedSettings,
    ) -> Self {
        Self { registry, backend, settings }
    }

    /// Capture `init.jpg` in the background.
    ///
    /// The handle resolves to whether the preview was updated. None only if
    /// the capture thread could not be started.
    pub fn capture_initial(&self, id: CameraId, address: String) -> Option<JoinHandle<bool>> {
        self.spawn_capture(id, address, PreviewKind::Initial)
    }

    /// Capture `last_frame.jpg` in the background; None for unknown cameras
    pub fn refresh_last(&self, id: CameraId) -> Option<JoinHandle<bool>> {
        let camera = self.registry.get(id)?;
        self.spawn_capture(id, camera.address, PreviewKind::Last)
    }

    fn spawn_capture(&self, id: CameraId, address: String, kind: PreviewKind) -> Option<JoinHandle<bool>> {
        let service = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("snapshot-{}", id))
            .spawn(move || match service.capture_now(id, &address, kind) {
                Ok(path) => {
                    info!("{} captured for camera {} at {}", kind.file_name(), id, address);
                    service.registry.set_preview(id, path)
                }
                Err(e) => {
                    warn!("preview capture failed for camera {}: {}", id, e);
                    false
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to start preview capture for camera {}: {}", id, e);
                None
            }
        }
    }

    /// Open the source, read one frame and store it as a JPEG.
    ///
    /// Does not touch the registry; the previous preview stays in place on
    /// failure.
    pub fn capture_now(&self, id: CameraId, address: &str, kind: PreviewKind) -> Result<PathBuf, RecorderError> {
        let mut source = self.backend.open(address).map_err(|e| RecorderError::SourceUnavailable {
            camera_id: id,
            reason: e.to_string(),
        })?;

        let read = source.read();
        source.release();

        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(RecorderError::ReadFailure {
                    camera_id: id,
                    reason: "stream ended before first frame".to_string(),
                });
            }
            Err(e) => {
                return Err(RecorderError::ReadFailure {
                    camera_id: id,
                    reason: e.to_string(),
                });
            }
        };

        let dir = layout::camera_dir(&read_settings(&self.settings).root, id);
        let path = dir.join(kind.file_name());
        fs::create_dir_all(&dir).map_err(|e| RecorderError::WriteFailure {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        frame.save_jpeg(&path).map_err(|e| RecorderError::WriteFailure {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Preview;
    use crate::storage::StorageSettings;
    use camvault_capture::TestPatternBackend;
    use std::sync::RwLock;

    fn service(root: &std::path::Path) -> (SnapshotService, Arc<CameraRegistry>) {
        let registry = Arc::new(CameraRegistry::new());
        let settings = Arc::new(RwLock::new(StorageSettings {
            root: root.to_path_buf(),
            max_bytes: u64::MAX,
            chunk_bytes: 0,
        }));
        let backend = Arc::new(TestPatternBackend::unpaced());
        (SnapshotService::new(registry.clone(), backend, settings), registry)
    }

    #[test]
    fn test_capture_initial_sets_preview() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshots, registry) = service(dir.path());
        let id = registry.add("testsrc://16x12", "cam");

        let updated = snapshots.capture_initial(id, "testsrc://16x12".into()).unwrap().join().unwrap();

        assert!(updated);
        let expected = layout::camera_dir(dir.path(), id).join("init.jpg");
        assert!(expected.exists());
        assert_eq!(registry.get(id).unwrap().preview, Preview::Image(expected));
    }

    #[test]
    fn test_failed_capture_keeps_previous_preview() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshots, registry) = service(dir.path());
        let id = registry.add("testsrc://16x12", "cam");
        snapshots.capture_initial(id, "testsrc://16x12".into()).unwrap().join().unwrap();
        let before = registry.get(id).unwrap().preview;

        registry.edit(id, "rtsp://bad-host", "cam");
        let updated = snapshots.capture_initial(id, "rtsp://bad-host".into()).unwrap().join().unwrap();

        assert!(!updated);
        assert_eq!(registry.get(id).unwrap().preview, before);
    }

    #[test]
    fn test_refresh_last_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshots, registry) = service(dir.path());
        let id = registry.add("testsrc://16x12", "cam");

        assert!(snapshots.refresh_last(id).unwrap().join().unwrap());
        assert!(snapshots.refresh_last(id).unwrap().join().unwrap());

        let expected = layout::camera_dir(dir.path(), id).join("last_frame.jpg");
        assert_eq!(registry.get(id).unwrap().preview, Preview::Image(expected));
        assert!(snapshots.refresh_last(id + 1).is_none());
    }

    #[test]
    fn test_capture_now_reports_ended_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshots, _) = service(dir.path());

        let err = snapshots.capture_now(0, "testsrc://8x8?frames=0", PreviewKind::Initial).unwrap_err();
        assert!(matches!(err, RecorderError::ReadFailure { .. }));
    }
}
