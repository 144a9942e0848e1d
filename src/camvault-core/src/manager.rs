//! Camera manager
//!
//! The single service instance owning the registry, recorder, snapshot
//! service and storage guardian. It exposes the command surface used by the
//! front end and has an explicit lifecycle: construct from a [`Config`],
//! issue commands, then [`CameraManager::shutdown`].

use anyhow::{Context, Result};
use camvault_capture::CaptureBackend;
use camvault_processing::WriterFactory;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RecorderError;
use crate::layout;
use crate::recorder::{RecordingController, RecordingEvent, StartOutcome};
use crate::registry::{Camera, CameraId, CameraRegistry, CameraStatus};
use crate::snapshot::SnapshotService;
use crate::storage::{ActiveFiles, EnforcementReport, StorageGuardian};

/// A finished or in-progress recording file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Local>,
}

pub struct CameraManager {
    registry: Arc<CameraRegistry>,
    backend: Arc<dyn CaptureBackend>,
    snapshots: SnapshotService,
    recorder: RecordingController,
    guardian: Arc<StorageGuardian>,
    /// Initial preview captures still in flight, joined on shutdown
    previews: Mutex<Vec<JoinHandle<bool>>>,
}

impl CameraManager {
    /// Build the manager with the backends named in the configuration
    pub fn new(config: &Config) -> Result<Self> {
        let backend = camvault_capture::backend(config.capture.source, config.probe_timeout());
        let writers = camvault_processing::writer_factory(&config.encoding);
        info!(
            "capture backend: {}, recording format: .{}",
            backend.name(),
            writers.extension()
        );
        Self::with_backends(config, backend, writers)
    }

    pub fn with_backends(
        config: &Config,
        backend: Arc<dyn CaptureBackend>,
        writers: Arc<dyn WriterFactory>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.recording_root)
            .with_context(|| format!("Failed to create recording root {:?}", config.recording_root))?;

        let settings = Arc::new(RwLock::new(config.storage_settings()));
        let registry = Arc::new(CameraRegistry::new());
        let guardian = Arc::new(StorageGuardian::new(
            settings.clone(),
            config.guardian_policy(),
            ActiveFiles::default(),
        ));
        let snapshots = SnapshotService::new(registry.clone(), backend.clone(), settings);
        let recorder = RecordingController::new(
            registry.clone(),
            backend.clone(),
            writers,
            guardian.clone(),
        );

        let manager = Self {
            registry,
            backend,
            snapshots,
            recorder,
            guardian,
            previews: Mutex::new(Vec::new()),
        };

        for camera in &config.cameras {
            manager.add_camera(&camera.address, &camera.nickname);
        }

        info!(
            "camera manager ready: {} camera(s), root {:?}",
            manager.registry.len(),
            config.recording_root
        );
        Ok(manager)
    }

    /// Register a camera and capture its initial preview in the background
    pub fn add_camera(&self, address: &str, nickname: &str) -> CameraId {
        let id = self.registry.add(address, nickname);
        self.track_preview(self.snapshots.capture_initial(id, address.to_string()));
        id
    }

    /// Forget a camera. A running session notices and stops on its own.
    pub fn remove_camera(&self, id: CameraId) -> bool {
        self.registry.remove(id).is_some()
    }

    /// Update a camera and re-capture its initial preview
    pub fn edit_camera(&self, id: CameraId, address: &str, nickname: &str) -> bool {
        if !self.registry.edit(id, address, nickname) {
            return false;
        }
        self.track_preview(self.snapshots.capture_initial(id, address.to_string()));
        true
    }

    pub fn camera(&self, id: CameraId) -> Option<Camera> {
        self.registry.get(id)
    }

    /// All cameras with a fresh liveness probe
    pub fn list_cameras(&self) -> Vec<CameraStatus> {
        self.registry.list(self.backend.as_ref())
    }

    pub fn start_recording(&self, id: CameraId) -> Result<StartOutcome, RecorderError> {
        self.recorder.start(id)
    }

    /// Start every registered camera; returns how many are recording
    pub fn start_all(&self) -> usize {
        let mut recording = 0;
        for camera in self.registry.cameras() {
            match self.recorder.start(camera.id) {
                Ok(_) => recording += 1,
                Err(e) => warn!("camera {} ({}) not recording: {}", camera.id, camera.nickname, e),
            }
        }
        recording
    }

    pub fn stop_recording(&self, id: CameraId) -> bool {
        self.recorder.stop(id)
    }

    pub fn flush_recording(&self, id: CameraId) -> Result<StartOutcome, RecorderError> {
        self.recorder.flush(id)
    }

    pub fn is_recording(&self, id: CameraId) -> bool {
        self.recorder.is_recording(id)
    }

    /// Capture `last_frame.jpg` in the background; None for unknown cameras
    pub fn refresh_preview(&self, id: CameraId) -> Option<JoinHandle<bool>> {
        self.snapshots.refresh_last(id)
    }

    /// Move future recordings to a new root; sessions switch at their next file
    pub fn set_recording_root(&self, root: PathBuf) -> Result<()> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create recording root {:?}", root))?;
        self.guardian.set_root(root);
        Ok(())
    }

    pub fn set_max_space(&self, bytes: u64) {
        self.guardian.set_max_bytes(bytes);
    }

    pub fn set_chunk_size(&self, bytes: u64) {
        self.guardian.set_chunk_bytes(bytes);
    }

    pub fn recording_root(&self) -> PathBuf {
        self.guardian.settings().root
    }

    /// Recording files per registered camera, oldest first
    pub fn list_recordings(&self) -> BTreeMap<CameraId, Vec<RecordingFile>> {
        let root = self.recording_root();
        self.registry.cameras()
            .into_iter()
            .map(|camera| (camera.id, camera_recordings(&layout::camera_dir(&root, camera.id))))
            .collect()
    }

    /// Newest recording of a camera
    pub fn last_recording(&self, id: CameraId) -> Option<RecordingFile> {
        if !self.registry.contains(id) {
            return None;
        }
        camera_recordings(&layout::camera_dir(&self.recording_root(), id)).pop()
    }

    /// Bytes measured under the root by the latest scan
    pub fn consumed_bytes(&self) -> u64 {
        self.guardian.consumed_bytes()
    }

    /// Run one accounting and eviction pass now
    pub fn enforce_storage(&self) -> Result<EnforcementReport, RecorderError> {
        self.guardian.account_and_enforce()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.recorder.subscribe()
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    fn track_preview(&self, handle: Option<JoinHandle<bool>>) {
        let mut previews = self.previews.lock().unwrap_or_else(PoisonError::into_inner);
        let (finished, running): (Vec<_>, Vec<_>) = previews.drain(..).partition(|h| h.is_finished());
        *previews = running;
        previews.extend(handle);
        drop(previews);

        for handle in finished {
            let _ = handle.join();
        }
    }

    /// Wait for every initial preview capture started so far
    pub fn wait_for_previews(&self) {
        let pending: Vec<_> = self.previews.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !pending.is_empty() {
            debug!("waiting for {} preview capture(s)", pending.len());
        }
        for handle in pending {
            if handle.join().is_err() {
                warn!("preview capture thread panicked");
            }
        }
    }

    /// Stop all sessions, wait for their files to be closed and for pending
    /// preview captures to finish
    pub fn shutdown(&self) {
        info!("shutting down camera manager");
        self.recorder.stop_all();
        self.wait_for_previews();
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.recorder.stop_all();
        self.wait_for_previews();
    }
}

/// Recording files in one camera directory sorted by name, which sorts by time
fn camera_recordings(dir: &std::path::Path) -> Vec<RecordingFile> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("no recordings at {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut files: Vec<RecordingFile> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() || layout::is_preview(&path) {
                return None;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some(RecordingFile {
                path,
                size_bytes: metadata.len(),
                modified: DateTime::<Local>::from(modified),
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use camvault_capture::TestPatternBackend;
    use camvault_processing::MjpegWriterFactory;

    fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.recording_root = root.to_path_buf();
        config.storage.grace_secs = 0;
        config
    }

    fn manager(config: &Config) -> CameraManager {
        CameraManager::with_backends(
            config,
            Arc::new(TestPatternBackend::unpaced()),
            Arc::new(MjpegWriterFactory::new(80)),
        )
        .unwrap()
    }

    #[test]
    fn test_initial_cameras_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.cameras = vec![
            CameraConfig { address: "testsrc://8x8".into(), nickname: "a".into() },
            CameraConfig { address: "rtsp://bad-host".into(), nickname: "b".into() },
        ];

        let manager = manager(&config);
        let cameras = manager.list_cameras();

        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].camera.nickname, "a");
        assert_eq!(cameras[1].camera.nickname, "b");
    }

    #[test]
    fn test_unknown_camera_commands_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&config(dir.path()));

        assert!(!manager.remove_camera(9));
        assert!(!manager.edit_camera(9, "x", "y"));
        assert!(!manager.stop_recording(9));
        assert!(manager.refresh_preview(9).is_none());
        assert!(manager.last_recording(9).is_none());
        assert!(matches!(manager.start_recording(9), Err(RecorderError::UnknownCamera(9))));
    }

    #[test]
    fn test_set_recording_root_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&config(&dir.path().join("a")));
        let new_root = dir.path().join("b").join("c");

        manager.set_recording_root(new_root.clone()).unwrap();

        assert!(new_root.is_dir());
        assert_eq!(manager.recording_root(), new_root);
    }

    #[test]
    fn test_shutdown_waits_for_initial_previews() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&config(dir.path()));
        let online = manager.add_camera("testsrc://8x8", "online");
        let offline = manager.add_camera("rtsp://bad-host", "offline");

        manager.shutdown();

        assert!(manager.previews.lock().unwrap().is_empty());
        let init = layout::camera_dir(dir.path(), online).join(layout::INIT_PREVIEW);
        assert_eq!(manager.camera(online).unwrap().preview, crate::registry::Preview::Image(init.clone()));
        assert!(fs::metadata(&init).unwrap().len() > 0);
        assert_eq!(manager.camera(offline).unwrap().preview, crate::registry::Preview::Placeholder);
    }

    #[test]
    fn test_list_recordings_skips_previews() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&config(dir.path()));
        let id = manager.add_camera("rtsp://bad-host", "cam");

        let cam_dir = layout::camera_dir(dir.path(), id);
        fs::create_dir_all(&cam_dir).unwrap();
        fs::write(cam_dir.join("init.jpg"), b"jpeg").unwrap();
        fs::write(cam_dir.join("20240101_000000_000.mjpeg"), b"one").unwrap();
        fs::write(cam_dir.join("20240101_000100_000.mjpeg"), b"three").unwrap();

        let recordings = manager.list_recordings();
        let files = &recordings[&id];
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].size_bytes, 3);

        let last = manager.last_recording(id).unwrap();
        assert_eq!(last.path, cam_dir.join("20240101_000100_000.mjpeg"));
        assert_eq!(last.size_bytes, 5);
    }
}
