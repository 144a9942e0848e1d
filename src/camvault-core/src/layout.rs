//! On-disk layout of the recording root
//!
//! ```text
//! <root>/camera_<id>/<YYYYmmdd_HHMMSS_mmm>.<ext>   recordings
//! <root>/camera_<id>/init.jpg                      preview taken on add/edit
//! <root>/camera_<id>/last_frame.jpg                refreshed preview
//! ```

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::registry::CameraId;

pub const INIT_PREVIEW: &str = "init.jpg";
pub const LAST_PREVIEW: &str = "last_frame.jpg";

/// Directory holding everything recorded for one camera
pub fn camera_dir(root: &Path, id: CameraId) -> PathBuf {
    root.join(format!("camera_{}", id))
}

/// Timestamped recording path, unique within the camera directory
pub fn recording_path(root: &Path, id: CameraId, at: DateTime<Local>, extension: &str) -> PathBuf {
    let dir = camera_dir(root, id);
    let stem = at.format("%Y%m%d_%H%M%S_%3f").to_string();

    let mut path = dir.join(format!("{}.{}", stem, extension));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, n, extension));
        n += 1;
    }
    path
}

/// Whether a file is a preview still rather than a recording
pub fn is_preview(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == INIT_PREVIEW || n == LAST_PREVIEW)
}
