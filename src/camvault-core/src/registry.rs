//! Camera registry
//!
//! Flat set of configured cameras keyed by a process-unique integer id.

use camvault_capture::CaptureBackend;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

pub type CameraId = u64;

/// Preview image shown for a camera
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum Preview {
    #[default]
    Placeholder,
    Image(PathBuf),
}

/// A configured camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Camera {
    pub id: CameraId,
    pub address: String,
    pub nickname: String,
    pub recording: bool,
    pub preview: Preview,
}

/// Result of a connectivity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Online,
    Offline,
}

/// Camera annotated with its probed liveness
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    #[serde(flatten)]
    pub camera: Camera,
    pub status: Liveness,
}

/// Registry of cameras behind a single lock
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: RwLock<BTreeMap<CameraId, Camera>>,
    next_id: AtomicU64,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a camera and return its id. Ids are never reused.
    pub fn add(&self, address: &str, nickname: &str) -> CameraId {
        let mut cameras = self.cameras.write().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        cameras.insert(id, Camera {
            id,
            address: address.to_string(),
            nickname: nickname.to_string(),
            recording: false,
            preview: Preview::Placeholder,
        });

        info!("added camera {} ({}) at {}", id, nickname, address);
        id
    }

    /// Remove a camera, returning its last state
    pub fn remove(&self, id: CameraId) -> Option<Camera> {
        let removed = self.cameras.write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        if removed.is_some() {
            info!("removed camera {}", id);
        }
        removed
    }

    /// Update address and nickname; false if the id is unknown
    pub fn edit(&self, id: CameraId, address: &str, nickname: &str) -> bool {
        let mut cameras = self.cameras.write().unwrap_or_else(PoisonError::into_inner);
        match cameras.get_mut(&id) {
            Some(camera) => {
                camera.address = address.to_string();
                camera.nickname = nickname.to_string();
                info!("edited camera {}: {} at {}", id, nickname, address);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: CameraId) -> Option<Camera> {
        self.cameras.read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn contains(&self, id: CameraId) -> bool {
        self.cameras.read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Snapshot of all cameras in id order
    pub fn cameras(&self) -> Vec<Camera> {
        self.cameras.read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// All cameras with a fresh liveness probe each.
    ///
    /// Probing happens outside the lock; an unreachable camera is only marked
    /// Offline, never dropped.
    pub fn list(&self, backend: &dyn CaptureBackend) -> Vec<CameraStatus> {
        self.cameras()
            .into_iter()
            .map(|camera| {
                let status = if backend.probe(&camera.address) {
                    Liveness::Online
                } else {
                    Liveness::Offline
                };
                debug!("camera {} is {:?}", camera.id, status);
                CameraStatus { camera, status }
            })
            .collect()
    }

    /// Set the recording-active flag; false if the id is unknown
    pub fn set_recording(&self, id: CameraId, recording: bool) -> bool {
        let mut cameras = self.cameras.write().unwrap_or_else(PoisonError::into_inner);
        match cameras.get_mut(&id) {
            Some(camera) => {
                camera.recording = recording;
                true
            }
            None => false,
        }
    }

    /// Point the preview at a captured still; false if the id is unknown
    pub fn set_preview(&self, id: CameraId, path: PathBuf) -> bool {
        let mut cameras = self.cameras.write().unwrap_or_else(PoisonError::into_inner);
        match cameras.get_mut(&id) {
            Some(camera) => {
                camera.preview = Preview::Image(path);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.cameras.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
