//! Storage quota enforcement
//!
//! The guardian measures everything under the recording root and deletes the
//! oldest files until usage is back within budget. Files held open by an
//! active recording session, files modified within the grace window and
//! preview stills are never evicted.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::error::RecorderError;
use crate::layout;

/// Runtime-adjustable storage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub root: PathBuf,
    /// Maximum bytes allowed under the root
    pub max_bytes: u64,
    /// Rotate a recording once it grows past this size (0 = never)
    pub chunk_bytes: u64,
}

/// Settings shared by the guardian, the recorder and the snapshot service
pub type SharedSettings = Arc<RwLock<StorageSettings>>;

/// Read a consistent copy of the shared settings
pub fn read_settings(settings: &SharedSettings) -> StorageSettings {
    settings.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Paths currently held open by recording sessions
#[derive(Debug, Clone, Default)]
pub struct ActiveFiles(Arc<Mutex<HashSet<PathBuf>>>);

impl ActiveFiles {
    pub fn register(&self, path: &Path) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_path_buf());
    }

    pub fn unregister(&self, path: &Path) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file found under the recording root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
    /// Creation time, or modification time where the filesystem has none
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// Outcome of one guardian pass
#[derive(Debug, Clone, Default)]
pub struct EnforcementReport {
    pub total_before: u64,
    pub total_after: u64,
    pub max_bytes: u64,
    /// Evicted files, oldest first
    pub evicted: Vec<StoredFile>,
}

/// Eviction discipline
#[derive(Debug, Clone)]
pub struct GuardianPolicy {
    /// Files modified more recently than this are never evicted
    pub grace: Duration,
    /// Minimum time between scans triggered by frame writes (zero = every write)
    pub scan_interval: Duration,
}

impl Default for GuardianPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            scan_interval: Duration::ZERO,
        }
    }
}

/// Measures disk usage and evicts the oldest recordings when over budget
#[derive(Debug)]
pub struct StorageGuardian {
    settings: SharedSettings,
    policy: GuardianPolicy,
    active: ActiveFiles,
    consumed: AtomicU64,
    last_scan: Mutex<Option<Instant>>,
    scan_lock: Mutex<()>,
}

impl StorageGuardian {
    pub fn new(settings: SharedSettings, policy: GuardianPolicy, active: ActiveFiles) -> Self {
        Self {
            settings,
            policy,
            active,
            consumed: AtomicU64::new(0),
            last_scan: Mutex::new(None),
            scan_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> StorageSettings {
        read_settings(&self.settings)
    }

    pub fn active_files(&self) -> &ActiveFiles {
        &self.active
    }

    /// Bytes measured by the most recent scan
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    pub fn set_root(&self, root: PathBuf) {
        info!("recording root set to {:?}", root);
        self.settings.write().unwrap_or_else(PoisonError::into_inner).root = root;
    }

    pub fn set_max_bytes(&self, max_bytes: u64) {
        info!("storage budget set to {} bytes", max_bytes);
        self.settings.write().unwrap_or_else(PoisonError::into_inner).max_bytes = max_bytes;
    }

    pub fn set_chunk_bytes(&self, chunk_bytes: u64) {
        info!("chunk size set to {} bytes", chunk_bytes);
        self.settings.write().unwrap_or_else(PoisonError::into_inner).chunk_bytes = chunk_bytes;
    }

    /// Measure usage and evict oldest-first until within budget.
    ///
    /// Waits for any scan already in progress.
    pub fn account_and_enforce(&self) -> Result<EnforcementReport, RecorderError> {
        let _scan = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.enforce()
    }

    /// Accounting hook run by recording workers after each frame write.
    ///
    /// Skipped when another scan is running or the scan interval has not
    /// elapsed; errors are logged and retried on the next write.
    pub fn after_write(&self) {
        if !self.policy.scan_interval.is_zero() {
            let last = self.last_scan.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|t| t.elapsed() < self.policy.scan_interval) {
                return;
            }
        }

        let _scan = match self.scan_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };

        match self.enforce() {
            Ok(report) if !report.evicted.is_empty() => {
                info!(
                    "evicted {} file(s), usage {} -> {} of {} bytes",
                    report.evicted.len(),
                    report.total_before,
                    report.total_after,
                    report.max_bytes
                );
            }
            Ok(_) => {}
            Err(e) => warn!("storage accounting failed: {}", e),
        }
    }

    fn enforce(&self) -> Result<EnforcementReport, RecorderError> {
        let StorageSettings { root, max_bytes, .. } = self.settings();
        *self.last_scan.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let mut files = scan_tree(&root)?;
        let mut total = total_size(&files);
        self.consumed.store(total, Ordering::SeqCst);

        let mut report = EnforcementReport {
            total_before: total,
            total_after: total,
            max_bytes,
            evicted: Vec::new(),
        };

        while total > max_bytes {
            let now = SystemTime::now();
            let Some(victim) = self.oldest_evictable(&files, now) else {
                warn!(
                    "usage {} exceeds budget {} but no file is evictable",
                    total, max_bytes
                );
                break;
            };

            match fs::remove_file(&victim.path) {
                Ok(()) => {
                    debug!("evicted {:?} ({} bytes)", victim.path, victim.size);
                    report.evicted.push(victim.clone());
                }
                // Removed by someone else since the walk
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RecorderError::StorageScan {
                        path: victim.path.clone(),
                        source: e,
                    });
                }
            }

            // Writers keep changing the tree, so re-walk rather than reuse the listing
            files = scan_tree(&root)?;
            total = total_size(&files);
            self.consumed.store(total, Ordering::SeqCst);
        }

        report.total_after = total;
        Ok(report)
    }

    fn oldest_evictable<'a>(&self, files: &'a [StoredFile], now: SystemTime) -> Option<&'a StoredFile> {
        files.iter()
            .filter(|f| self.is_evictable(f, now))
            .min_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)))
    }

    /// Previews, open files and files inside the grace window are never
    /// evicted. Previews still count toward usage, so if they alone exceed
    /// the budget the total stays above it and each pass logs a warning.
    fn is_evictable(&self, file: &StoredFile, now: SystemTime) -> bool {
        if layout::is_preview(&file.path) || self.active.contains(&file.path) {
            return false;
        }
        // Modification times in the future count as fresh
        match now.duration_since(file.modified) {
            Ok(age) => age >= self.policy.grace,
            Err(_) => self.policy.grace.is_zero(),
        }
    }
}

fn total_size(files: &[StoredFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

/// Recursively list regular files under `root`.
///
/// A missing root is empty. Entries that vanish or cannot be read mid-walk
/// are skipped.
pub fn scan_tree(root: &Path) -> Result<Vec<StoredFile>, RecorderError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut is_root = true;

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                is_root = false;
                continue;
            }
            Err(e) if is_root => {
                return Err(RecorderError::StorageScan { path: dir, source: e });
            }
            Err(e) => {
                debug!("skipping unreadable directory {:?}: {}", dir, e);
                continue;
            }
        };
        is_root = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("skipping {:?}: {}", path, e);
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let created = metadata.created().unwrap_or(modified);
                files.push(StoredFile {
                    path,
                    size: metadata.len(),
                    created,
                    modified,
                });
            }
        }
    }

    Ok(files)
}
