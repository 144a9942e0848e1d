//! Per-camera recording with chunk rotation
//!
//! Each recording camera gets one worker thread that owns its frame source and
//! stream writer. The worker reads frames, writes them, runs storage
//! accounting, and rotates to a fresh file once the current one outgrows the
//! chunk threshold. Stopping is cooperative: the worker checks its cancel
//! token between frames.

use camvault_capture::{CaptureBackend, FrameFormat, FrameSource};
use camvault_processing::{StreamWriter, WriterFactory};
use chrono::Local;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::RecorderError;
use crate::layout;
use crate::registry::{CameraId, CameraRegistry};
use crate::storage::{ActiveFiles, StorageGuardian};

/// Capacity of the recording event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cooperative cancellation flag handed to a worker at start
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRecording,
}

/// Why a recording session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    CameraRemoved,
    EndOfStream,
    ReadFailure(String),
    WriteFailure(String),
}

/// Lifecycle notifications published by the controller
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Started { camera_id: CameraId, path: PathBuf },
    Rotated { camera_id: CameraId, closed: PathBuf, opened: PathBuf },
    Stopped { camera_id: CameraId, reason: StopReason },
}

struct Session {
    cancel: CancelToken,
    /// Set by the worker once its loop returns, before it closes the writer
    ended: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
            && !self.ended.load(Ordering::SeqCst)
            && !self.handle.is_finished()
    }

    fn join(self, id: CameraId) {
        if self.handle.join().is_err() {
            error!("recording worker for camera {} panicked", id);
        }
    }
}

/// Drives the capture-to-file loop of every recording camera
pub struct RecordingController {
    registry: Arc<CameraRegistry>,
    backend: Arc<dyn CaptureBackend>,
    writers: Arc<dyn WriterFactory>,
    guardian: Arc<StorageGuardian>,
    sessions: Mutex<HashMap<CameraId, Session>>,
    start_locks: Mutex<HashMap<CameraId, Arc<Mutex<()>>>>,
    events: broadcast::Sender<RecordingEvent>,
}

impl RecordingController {
    pub fn new(
        registry: Arc<CameraRegistry>,
        backend: Arc<dyn CaptureBackend>,
        writers: Arc<dyn WriterFactory>,
        guardian: Arc<StorageGuardian>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            backend,
            writers,
            guardian,
            sessions: Mutex::new(HashMap::new()),
            start_locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<CameraId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_lock(&self, id: CameraId) -> Arc<Mutex<()>> {
        self.start_locks.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    /// Start recording a camera.
    ///
    /// Opens the source and the first file, then hands both to a worker and
    /// returns without waiting for frames. If a previous session was stopped
    /// but is still winding down, waits for it to close its file first.
    pub fn start(&self, id: CameraId) -> Result<StartOutcome, RecorderError> {
        self.reap_removed();
        let camera = self.registry.get(id).ok_or(RecorderError::UnknownCamera(id))?;

        let start_lock = self.start_lock(id);
        let _starting = start_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let retired = {
            let mut sessions = self.lock_sessions();
            match sessions.get(&id) {
                Some(session) if session.is_live() => return Ok(StartOutcome::AlreadyRecording),
                Some(_) => sessions.remove(&id),
                None => None,
            }
        };
        if let Some(session) = retired {
            debug!("waiting for previous session of camera {} to close", id);
            session.join(id);
        }

        let mut source = self.backend.open(&camera.address).map_err(|e| {
            warn!("failed to open camera stream for camera {}: {}", id, e);
            RecorderError::SourceUnavailable {
                camera_id: id,
                reason: e.to_string(),
            }
        })?;

        let format = source.format();
        let root = self.guardian.settings().root;
        let active = self.guardian.active_files().clone();
        let writer = match open_writer(self.writers.as_ref(), &active, &root, id, format) {
            Ok(writer) => writer,
            Err(e) => {
                warn!("failed to open recording file for camera {}: {}", id, e);
                source.release();
                return Err(e);
            }
        };
        let path = writer.path().to_path_buf();

        let mut sessions = self.lock_sessions();

        // Removed while the source was opening
        if !self.registry.set_recording(id, true) {
            close_writer(writer, &active);
            source.release();
            return Err(RecorderError::UnknownCamera(id));
        }

        let cancel = CancelToken::default();
        let ended = Arc::new(AtomicBool::new(false));
        let worker = SessionWorker {
            camera_id: id,
            format,
            source,
            writer: Some(writer),
            cancel: cancel.clone(),
            ended: ended.clone(),
            registry: self.registry.clone(),
            writers: self.writers.clone(),
            guardian: self.guardian.clone(),
            events: self.events.clone(),
        };

        let handle = match thread::Builder::new()
            .name(format!("record-{}", id))
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The worker was dropped with the closure, which closed its file
                self.registry.set_recording(id, false);
                return Err(RecorderError::Spawn(e));
            }
        };

        sessions.insert(id, Session { cancel, ended, handle });
        drop(sessions);

        info!("recording camera {} to {:?}", id, path);
        let _ = self.events.send(RecordingEvent::Started { camera_id: id, path });
        Ok(StartOutcome::Started)
    }

    /// Ask a camera's worker to stop after its current frame.
    ///
    /// Returns false if the camera was not recording.
    pub fn stop(&self, id: CameraId) -> bool {
        let sessions = self.lock_sessions();
        match sessions.get(&id) {
            Some(session) if session.is_live() => {
                session.cancel.cancel();
                self.registry.set_recording(id, false);
                info!("stopping recording for camera {}", id);
                true
            }
            _ => false,
        }
    }

    /// Stop and immediately restart, forcing a new file
    pub fn flush(&self, id: CameraId) -> Result<StartOutcome, RecorderError> {
        if !self.registry.contains(id) {
            return Err(RecorderError::UnknownCamera(id));
        }
        self.stop(id);
        self.start(id)
    }

    pub fn is_recording(&self, id: CameraId) -> bool {
        self.lock_sessions().get(&id).is_some_and(Session::is_live)
    }

    /// Cameras with a live session
    pub fn recording_cameras(&self) -> Vec<CameraId> {
        let mut ids: Vec<_> = self.lock_sessions()
            .iter()
            .filter(|(_, s)| s.is_live())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Poll until the camera's worker has exited
    pub fn wait_until_idle(&self, id: CameraId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = self.lock_sessions()
                .get(&id)
                .map_or(true, |s| s.handle.is_finished());
            if finished {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Drop bookkeeping for removed cameras whose workers have exited
    fn reap_removed(&self) {
        let finished: Vec<(CameraId, Session)> = {
            let mut sessions = self.lock_sessions();
            let gone: Vec<CameraId> = sessions.iter()
                .filter(|(id, s)| s.handle.is_finished() && !self.registry.contains(**id))
                .map(|(id, _)| *id)
                .collect();
            gone.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };
        for (id, session) in finished {
            session.join(id);
        }

        self.start_locks.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| self.registry.contains(*id));
    }

    /// Cancel every session and wait for all workers to close their files
    pub fn stop_all(&self) {
        let sessions: Vec<_> = self.lock_sessions().drain().collect();
        if sessions.is_empty() {
            return;
        }

        info!("stopping {} recording session(s)", sessions.len());
        for (id, session) in &sessions {
            session.cancel.cancel();
            self.registry.set_recording(*id, false);
        }
        for (id, session) in sessions {
            session.join(id);
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Create the camera directory and open a fresh timestamped file.
///
/// The path is registered as active before the file exists so the guardian
/// can never pick it.
fn open_writer(
    writers: &dyn WriterFactory,
    active: &ActiveFiles,
    root: &Path,
    id: CameraId,
    format: FrameFormat,
) -> Result<Box<dyn StreamWriter>, RecorderError> {
    let dir = layout::camera_dir(root, id);
    fs::create_dir_all(&dir).map_err(|e| RecorderError::WriteFailure {
        path: dir.clone(),
        reason: e.to_string(),
    })?;

    let path = layout::recording_path(root, id, Local::now(), writers.extension());
    active.register(&path);

    writers.open(&path, format).map_err(|e| {
        active.unregister(&path);
        RecorderError::WriteFailure {
            path,
            reason: e.to_string(),
        }
    })
}

fn close_writer(writer: Box<dyn StreamWriter>, active: &ActiveFiles) -> PathBuf {
    let path = writer.path().to_path_buf();
    if let Err(e) = writer.close() {
        warn!("error finalizing {:?}: {}", path, e);
    }
    active.unregister(&path);
    path
}

/// State owned by one camera's recording thread
struct SessionWorker {
    camera_id: CameraId,
    format: FrameFormat,
    source: Box<dyn FrameSource>,
    writer: Option<Box<dyn StreamWriter>>,
    cancel: CancelToken,
    ended: Arc<AtomicBool>,
    registry: Arc<CameraRegistry>,
    writers: Arc<dyn WriterFactory>,
    guardian: Arc<StorageGuardian>,
    events: broadcast::Sender<RecordingEvent>,
}

impl SessionWorker {
    fn run(mut self) {
        let id = self.camera_id;
        let reason = self.record();
        self.ended.store(true, Ordering::SeqCst);
        self.finish();
        self.registry.set_recording(id, false);

        match &reason {
            StopReason::Requested => info!("recording stopped for camera {}", id),
            StopReason::CameraRemoved => info!("camera {} removed, recording stopped", id),
            StopReason::EndOfStream => warn!("stream ended for camera {}", id),
            StopReason::ReadFailure(e) => warn!("failed to capture frame from camera {}: {}", id, e),
            StopReason::WriteFailure(e) => error!("recording aborted for camera {}: {}", id, e),
        }

        let _ = self.events.send(RecordingEvent::Stopped { camera_id: id, reason });
    }

    fn record(&mut self) -> StopReason {
        let mut frames = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return StopReason::Requested;
            }
            if !self.registry.contains(self.camera_id) {
                return StopReason::CameraRemoved;
            }

            let frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => return StopReason::EndOfStream,
                Err(e) => return StopReason::ReadFailure(e.to_string()),
            };

            let Some(writer) = self.writer.as_mut() else {
                return StopReason::WriteFailure("no open recording file".to_string());
            };
            if let Err(e) = writer.write(&frame) {
                return StopReason::WriteFailure(e.to_string());
            }

            frames += 1;
            if frames % 600 == 0 {
                debug!("camera {}: {} frames written", self.camera_id, frames);
            }

            self.guardian.after_write();

            if let Err(e) = self.rotate_if_needed() {
                return StopReason::WriteFailure(e.to_string());
            }
        }
    }

    /// Swap to a new file once the current one exceeds the chunk threshold
    fn rotate_if_needed(&mut self) -> Result<(), RecorderError> {
        let settings = self.guardian.settings();
        if settings.chunk_bytes == 0 {
            return Ok(());
        }

        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };
        let size = match fs::metadata(writer.path()) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!("cannot stat {:?}: {}", writer.path(), e);
                return Ok(());
            }
        };
        if size <= settings.chunk_bytes {
            return Ok(());
        }

        let active = self.guardian.active_files().clone();
        let closed = match self.writer.take() {
            Some(writer) => close_writer(writer, &active),
            None => return Ok(()),
        };

        let writer = open_writer(
            self.writers.as_ref(),
            &active,
            &settings.root,
            self.camera_id,
            self.format,
        )?;
        let opened = writer.path().to_path_buf();
        self.writer = Some(writer);

        info!(
            "rotated camera {} after {} bytes: {:?}",
            self.camera_id, size, opened
        );
        let _ = self.events.send(RecordingEvent::Rotated {
            camera_id: self.camera_id,
            closed,
            opened,
        });
        Ok(())
    }

    /// Close the writer and release the source; safe to repeat
    fn finish(&mut self) {
        if let Some(writer) = self.writer.take() {
            close_writer(writer, self.guardian.active_files());
        }
        self.source.release();
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{GuardianPolicy, StorageSettings};
    use camvault_capture::{CaptureError, Frame, TestPatternBackend};
    use camvault_processing::EncodeError;
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::RwLock;

    const WAIT: Duration = Duration::from_secs(10);

    /// Writes raw frame bytes and records how writers were opened
    #[derive(Default)]
    struct FakeWriters {
        fail: bool,
        open_now: Arc<AtomicUsize>,
        max_open: Arc<AtomicUsize>,
        registry: Mutex<Option<Arc<CameraRegistry>>>,
        flags_at_open: Mutex<Vec<bool>>,
        close_delay: Duration,
    }

    struct FakeWriter {
        path: PathBuf,
        file: File,
        open_now: Arc<AtomicUsize>,
        close_delay: Duration,
    }

    impl WriterFactory for FakeWriters {
        fn extension(&self) -> &'static str {
            "bin"
        }

        fn open(&self, path: &Path, _format: FrameFormat) -> Result<Box<dyn StreamWriter>, EncodeError> {
            if self.fail {
                return Err(EncodeError::Encoder("disk full".to_string()));
            }
            if let Some(registry) = self.registry.lock().unwrap().as_ref() {
                let flag = registry.cameras().iter().any(|c| c.recording);
                self.flags_at_open.lock().unwrap().push(flag);
            }
            let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);

            Ok(Box::new(FakeWriter {
                path: path.to_path_buf(),
                file: File::create(path)?,
                open_now: self.open_now.clone(),
                close_delay: self.close_delay,
            }))
        }
    }

    impl StreamWriter for FakeWriter {
        fn path(&self) -> &Path {
            &self.path
        }

        fn write(&mut self, frame: &Frame) -> Result<(), EncodeError> {
            self.file.write_all(&frame.data)?;
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), EncodeError> {
            thread::sleep(self.close_delay);
            self.open_now.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Yields one frame, then fails every read
    #[derive(Default)]
    struct FlakyBackend {
        released: Arc<AtomicBool>,
    }

    struct FlakySource {
        reads: usize,
        released: Arc<AtomicBool>,
    }

    const FLAKY_FORMAT: FrameFormat = FrameFormat { width: 4, height: 4, fps: 10.0 };

    impl CaptureBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn open(&self, _address: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
            Ok(Box::new(FlakySource { reads: 0, released: self.released.clone() }))
        }

        fn probe(&self, _address: &str) -> bool {
            true
        }
    }

    impl FrameSource for FlakySource {
        fn format(&self) -> FrameFormat {
            FLAKY_FORMAT
        }

        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            self.reads += 1;
            if self.reads > 1 {
                return Err(CaptureError::Read("connection reset".to_string()));
            }
            Ok(Some(Frame::new(vec![7; FLAKY_FORMAT.frame_len()], 4, 4)?))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        registry: Arc<CameraRegistry>,
        writers: Arc<FakeWriters>,
        guardian: Arc<StorageGuardian>,
        controller: RecordingController,
    }

    fn fixture(chunk_bytes: u64, writers: FakeWriters) -> Fixture {
        fixture_with(chunk_bytes, writers, Arc::new(TestPatternBackend::unpaced()))
    }

    fn fixture_with(chunk_bytes: u64, writers: FakeWriters, backend: Arc<dyn CaptureBackend>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CameraRegistry::new());
        let settings = Arc::new(RwLock::new(StorageSettings {
            root: dir.path().to_path_buf(),
            max_bytes: u64::MAX,
            chunk_bytes,
        }));
        let policy = GuardianPolicy { grace: Duration::ZERO, scan_interval: Duration::ZERO };
        let guardian = Arc::new(StorageGuardian::new(settings, policy, ActiveFiles::default()));
        let writers = Arc::new(writers);
        let controller = RecordingController::new(
            registry.clone(),
            backend,
            writers.clone(),
            guardian.clone(),
        );

        Fixture { dir, registry, writers, guardian, controller }
    }

    fn recordings(root: &Path, id: CameraId) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(layout::camera_dir(root, id))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| !layout::is_preview(p))
            .collect();
        files.sort();
        files
    }

    fn drain(rx: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_unknown_camera() {
        let f = fixture(0, FakeWriters::default());
        let err = f.controller.start(42).unwrap_err();
        assert!(matches!(err, RecorderError::UnknownCamera(42)));
        assert!(!f.controller.is_recording(42));
    }

    #[test]
    fn test_unreachable_source_stays_idle() {
        let f = fixture(0, FakeWriters::default());
        let id = f.registry.add("rtsp://bad-host", "cam1");

        let err = f.controller.start(id).unwrap_err();

        assert!(matches!(err, RecorderError::SourceUnavailable { .. }));
        assert!(!f.registry.get(id).unwrap().recording);
        assert!(!f.controller.is_recording(id));
        assert!(!layout::camera_dir(f.dir.path(), id).exists());
    }

    #[test]
    fn test_start_twice_is_idempotent() {
        let f = fixture(0, FakeWriters::default());
        let mut rx = f.controller.subscribe();
        let id = f.registry.add("testsrc://4x4", "cam");

        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::Started);
        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::AlreadyRecording);
        assert!(f.registry.get(id).unwrap().recording);
        assert_eq!(f.guardian.active_files().len(), 1);

        assert!(f.controller.stop(id));
        assert!(f.controller.wait_until_idle(id, WAIT));

        let started = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RecordingEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(recordings(f.dir.path(), id).len(), 1);
        assert!(f.guardian.active_files().is_empty());
        assert!(!f.registry.get(id).unwrap().recording);
    }

    #[test]
    fn test_rotation_keeps_recording_active() {
        let f = fixture(100, FakeWriters::default());
        *f.writers.registry.lock().unwrap() = Some(f.registry.clone());
        let mut rx = f.controller.subscribe();

        // 48-byte frames: rotation after every third frame
        let id = f.registry.add("testsrc://4x4?frames=10", "cam");
        f.controller.start(id).unwrap();
        assert!(f.controller.wait_until_idle(id, WAIT));

        let files = recordings(f.dir.path(), id);
        let sizes: Vec<u64> = files.iter().map(|p| fs::metadata(p).unwrap().len()).collect();
        assert_eq!(sizes, vec![144, 144, 144, 48]);

        let flags = f.writers.flags_at_open.lock().unwrap().clone();
        assert_eq!(flags.len(), 4);
        assert!(flags[1..].iter().all(|recording| *recording));
        assert_eq!(f.writers.max_open.load(Ordering::SeqCst), 1);

        let events = drain(&mut rx);
        let rotations = events.iter().filter(|e| matches!(e, RecordingEvent::Rotated { .. })).count();
        assert_eq!(rotations, 3);
        assert!(matches!(
            events.last(),
            Some(RecordingEvent::Stopped { reason: StopReason::EndOfStream, .. })
        ));
    }

    #[test]
    fn test_end_of_stream_leaves_camera_idle() {
        let f = fixture(0, FakeWriters::default());
        let id = f.registry.add("testsrc://4x4?frames=2", "cam");

        f.controller.start(id).unwrap();
        assert!(f.controller.wait_until_idle(id, WAIT));

        assert!(!f.controller.is_recording(id));
        assert!(!f.registry.get(id).unwrap().recording);
        assert!(f.guardian.active_files().is_empty());
        assert_eq!(f.writers.open_now.load(Ordering::SeqCst), 0);

        // Restart after the stream ended opens a new session
        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::Started);
        assert!(f.controller.wait_until_idle(id, WAIT));
    }

    #[test]
    fn test_stop_idle_camera_is_noop() {
        let f = fixture(0, FakeWriters::default());
        let id = f.registry.add("testsrc://4x4", "cam");
        let before = f.registry.get(id).unwrap();

        assert!(!f.controller.stop(id));
        assert!(!f.controller.stop(id + 7));
        assert_eq!(f.registry.get(id).unwrap(), before);
    }

    #[test]
    fn test_flush_starts_new_file() {
        let f = fixture(0, FakeWriters::default());
        let id = f.registry.add("testsrc://4x4", "cam");

        f.controller.start(id).unwrap();
        assert_eq!(f.controller.flush(id).unwrap(), StartOutcome::Started);
        assert!(f.controller.is_recording(id));
        f.controller.stop_all();

        assert_eq!(recordings(f.dir.path(), id).len(), 2);
        assert_eq!(f.writers.max_open.load(Ordering::SeqCst), 1);
        assert!(matches!(f.controller.flush(id + 1), Err(RecorderError::UnknownCamera(_))));
    }

    #[test]
    fn test_removed_camera_stops_worker() {
        let f = fixture(0, FakeWriters::default());
        let mut rx = f.controller.subscribe();
        let id = f.registry.add("testsrc://4x4", "cam");

        f.controller.start(id).unwrap();
        f.registry.remove(id);
        assert!(f.controller.wait_until_idle(id, WAIT));

        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            RecordingEvent::Stopped { reason: StopReason::CameraRemoved, .. }
        )));
        assert!(f.guardian.active_files().is_empty());
    }

    #[test]
    fn test_write_failure_aborts_only_that_camera() {
        let f = fixture(0, FakeWriters { fail: true, ..Default::default() });
        let id = f.registry.add("testsrc://4x4", "cam");

        let err = f.controller.start(id).unwrap_err();

        assert!(matches!(err, RecorderError::WriteFailure { .. }));
        assert!(!f.registry.get(id).unwrap().recording);
        assert!(f.guardian.active_files().is_empty());
    }

    #[test]
    fn test_stop_all_closes_every_writer() {
        let f = fixture(0, FakeWriters::default());
        let a = f.registry.add("testsrc://4x4", "a");
        let b = f.registry.add("testsrc://8x8", "b");

        f.controller.start(a).unwrap();
        f.controller.start(b).unwrap();
        assert_eq!(f.controller.recording_cameras(), vec![a, b]);

        f.controller.stop_all();

        assert!(f.controller.recording_cameras().is_empty());
        assert_eq!(f.writers.open_now.load(Ordering::SeqCst), 0);
        assert!(f.registry.cameras().iter().all(|c| !c.recording));
    }

    #[test]
    fn test_start_while_previous_session_is_closing() {
        let writers = FakeWriters { close_delay: Duration::from_millis(800), ..Default::default() };
        let f = fixture(0, writers);
        let mut rx = f.controller.subscribe();
        let id = f.registry.add("testsrc://4x4?frames=1", "cam");

        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::Started);

        // The stream ends after one frame while the writer takes a while to close
        let deadline = Instant::now() + WAIT;
        while f.controller.is_recording(id) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!f.controller.is_recording(id));

        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::Started);
        assert!(f.registry.get(id).unwrap().recording);

        assert!(f.controller.wait_until_idle(id, WAIT));
        assert_eq!(f.writers.max_open.load(Ordering::SeqCst), 1);
        assert_eq!(recordings(f.dir.path(), id).len(), 2);

        let started = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RecordingEvent::Started { .. }))
            .count();
        assert_eq!(started, 2);
    }

    #[test]
    fn test_read_failure_leaves_camera_idle() {
        let backend = Arc::new(FlakyBackend::default());
        let f = fixture_with(0, FakeWriters::default(), backend.clone());
        let mut rx = f.controller.subscribe();
        let id = f.registry.add("rtsp://cam/stream", "cam");

        assert_eq!(f.controller.start(id).unwrap(), StartOutcome::Started);
        assert!(f.controller.wait_until_idle(id, WAIT));

        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            RecordingEvent::Stopped { reason: StopReason::ReadFailure(_), .. }
        )));
        assert!(!f.controller.is_recording(id));
        assert!(!f.registry.get(id).unwrap().recording);
        assert!(backend.released.load(Ordering::SeqCst));
        assert_eq!(f.writers.open_now.load(Ordering::SeqCst), 0);
        assert!(f.guardian.active_files().is_empty());

        let files = recordings(f.dir.path(), id);
        assert_eq!(files.len(), 1);
        assert_eq!(fs::metadata(&files[0]).unwrap().len(), 48);
    }

    #[test]
    fn test_removed_camera_entries_are_pruned() {
        let f = fixture(0, FakeWriters::default());
        let id = f.registry.add("testsrc://4x4", "cam");

        f.controller.start(id).unwrap();
        f.registry.remove(id);
        assert!(f.controller.wait_until_idle(id, WAIT));

        assert!(matches!(f.controller.start(id), Err(RecorderError::UnknownCamera(_))));
        assert!(!f.controller.sessions.lock().unwrap().contains_key(&id));
        assert!(!f.controller.start_locks.lock().unwrap().contains_key(&id));
    }
}
