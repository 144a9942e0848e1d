//! Camvault - Camera fleet recorder CLI
//!
//! Records network cameras into size-rotated files while keeping the
//! recording root under a storage budget.

use anyhow::{Context, Result};
use camvault_capture::SourceKind;
use camvault_core::colored_logger;
use camvault_core::{
    CameraConfig, CameraId, CameraManager, Config, Liveness, Preview, RecordingEvent,
};
use camvault_processing::Codec;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const MIB: u64 = 1024 * 1024;

/// How often the recorder logs storage usage
const USAGE_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "camvault")]
#[command(about = "Record a fleet of network cameras under a storage budget")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record every configured camera until interrupted
    Record {
        /// Recording root directory
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Storage budget in MiB
        #[arg(long)]
        max_space_mb: Option<u64>,

        /// Rotation size in MiB
        #[arg(long)]
        chunk_mb: Option<u64>,

        /// Extra camera as ADDRESS|NICKNAME (repeatable)
        #[arg(long = "camera")]
        cameras: Vec<CameraConfig>,
    },

    /// List configured cameras with their liveness
    Cameras,

    /// List recording files per camera
    Recordings {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run one storage accounting and eviction pass
    Enforce,

    /// Capture a fresh preview for a camera
    Snapshot {
        /// Camera id
        id: CameraId,
    },

    /// Check dependencies (FFmpeg, ffprobe, NVENC)
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Record { .. }) {
        colored_logger::init_logger(cli.verbose)?;
    } else {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .compact()
            .init();
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Record { root, max_space_mb, chunk_mb, cameras } => {
            cmd_record(config, root, max_space_mb, chunk_mb, cameras)?;
        }
        Commands::Cameras => {
            cmd_cameras(&config)?;
        }
        Commands::Recordings { json } => {
            cmd_recordings(&config, json)?;
        }
        Commands::Enforce => {
            cmd_enforce(&config)?;
        }
        Commands::Snapshot { id } => {
            cmd_snapshot(&config, id)?;
        }
        Commands::Check => {
            cmd_check()?;
        }
    }

    Ok(())
}

fn cmd_record(
    mut config: Config,
    root: Option<PathBuf>,
    max_space_mb: Option<u64>,
    chunk_mb: Option<u64>,
    cameras: Vec<CameraConfig>,
) -> Result<()> {
    if let Some(root) = root {
        config.recording_root = root;
    }
    if let Some(mb) = max_space_mb {
        config.max_space_bytes = mib_to_bytes(mb, "--max-space-mb")?;
    }
    if let Some(mb) = chunk_mb {
        config.chunk_size_bytes = mib_to_bytes(mb, "--chunk-mb")?;
    }
    config.cameras.extend(cameras);

    info!("starting camvault recorder");
    info!("recording root: {:?}", config.recording_root);
    info!(
        "budget: {} MiB, chunk size: {} MiB",
        config.max_space_bytes / MIB,
        config.chunk_size_bytes / MIB
    );

    if config.cameras.is_empty() {
        warn!("no cameras configured, add some with --camera ADDRESS|NICKNAME");
    }

    let needs_ffmpeg = config.capture.source == SourceKind::Ffmpeg
        || config.encoding.codec != Codec::Mjpeg;
    if needs_ffmpeg && !camvault_processing::encoder::check_ffmpeg() {
        error!("ffmpeg not found in PATH - please install FFmpeg");
        return Err(anyhow::anyhow!("FFmpeg not found"));
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let manager = CameraManager::new(&config)?;
    let mut events = manager.subscribe();

    let recording = manager.start_all();
    info!("{} of {} camera(s) recording", recording, config.cameras.len());

    let mut last_usage_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        loop {
            match events.try_recv() {
                Ok(event) => log_event(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("missed {} recording event(s)", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if last_usage_log.elapsed() >= USAGE_LOG_INTERVAL {
            info!(
                "storage: {} MiB used of {} MiB",
                manager.consumed_bytes() / MIB,
                config.max_space_bytes / MIB
            );
            last_usage_log = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(250));
    }

    manager.shutdown();
    info!("recorder stopped");
    Ok(())
}

fn mib_to_bytes(mb: u64, flag: &str) -> Result<u64> {
    mb.checked_mul(MIB)
        .ok_or_else(|| anyhow::anyhow!("{} value {} MiB is too large", flag, mb))
}

fn log_event(event: &RecordingEvent) {
    match event {
        RecordingEvent::Started { camera_id, path } => {
            info!("camera {} recording to {:?}", camera_id, path);
        }
        RecordingEvent::Rotated { camera_id, closed, opened } => {
            info!("camera {} rotated {:?} -> {:?}", camera_id, closed, opened);
        }
        RecordingEvent::Stopped { camera_id, reason } => {
            info!("camera {} stopped: {:?}", camera_id, reason);
        }
    }
}

fn cmd_cameras(config: &Config) -> Result<()> {
    let manager = CameraManager::new(config)?;
    let cameras = manager.list_cameras();

    println!("found {} camera(s):\n", cameras.len());

    for status in &cameras {
        let camera = &status.camera;
        let liveness = match status.status {
            Liveness::Online => "online",
            Liveness::Offline => "offline",
        };
        println!("  [{}] {} - {} ({})", camera.id, camera.nickname, camera.address, liveness);
    }

    Ok(())
}

fn cmd_recordings(config: &Config, json: bool) -> Result<()> {
    let manager = CameraManager::new(config)?;
    let recordings = manager.list_recordings();

    if json {
        println!("{}", serde_json::to_string_pretty(&recordings)?);
        return Ok(());
    }

    for (id, files) in &recordings {
        let nickname = manager.camera(*id).map(|c| c.nickname).unwrap_or_default();
        println!("camera {} ({}): {} file(s)", id, nickname, files.len());
        for file in files {
            println!(
                "  {}  {:>10} bytes  {}",
                file.modified.format("%Y-%m-%d %H:%M:%S"),
                file.size_bytes,
                file.path.display()
            );
        }
    }

    let stored = camvault_core::storage::scan_tree(&manager.recording_root())
        .context("storage accounting failed")?;
    let consumed: u64 = stored.iter().map(|f| f.size).sum();
    println!(
        "\nconsumed: {} MiB of {} MiB",
        consumed / MIB,
        config.max_space_bytes / MIB
    );

    Ok(())
}

fn cmd_enforce(config: &Config) -> Result<()> {
    let manager = CameraManager::new(config)?;
    let report = manager.enforce_storage().context("storage enforcement failed")?;

    println!("usage before: {} bytes", report.total_before);
    println!("usage after:  {} bytes", report.total_after);
    println!("budget:       {} bytes", report.max_bytes);

    if report.evicted.is_empty() {
        println!("nothing evicted");
    } else {
        println!("evicted {} file(s):", report.evicted.len());
        for file in &report.evicted {
            println!("  {} ({} bytes)", file.path.display(), file.size);
        }
    }

    Ok(())
}

fn cmd_snapshot(config: &Config, id: CameraId) -> Result<()> {
    let manager = CameraManager::new(config)?;

    let handle = manager
        .refresh_preview(id)
        .ok_or_else(|| anyhow::anyhow!("camera {} not found", id))?;

    let captured = handle
        .join()
        .map_err(|_| anyhow::anyhow!("snapshot thread panicked"))?;

    match manager.camera(id).map(|c| c.preview) {
        Some(Preview::Image(path)) if captured => println!("preview saved to {}", path.display()),
        _ => println!("camera {} unreachable, preview unchanged", id),
    }

    Ok(())
}

fn cmd_check() -> Result<()> {
    println!("checking dependencies...\n");

    let ffmpeg_ok = camvault_processing::encoder::check_ffmpeg();
    println!("  ffmpeg:  {}", if ffmpeg_ok { "OK" } else { "NOT FOUND" });

    let ffprobe_ok = camvault_capture::ffmpeg::check_ffprobe();
    println!("  ffprobe: {}", if ffprobe_ok { "OK" } else { "NOT FOUND" });

    if ffmpeg_ok {
        let nvenc_ok = camvault_processing::encoder::check_nvenc();
        println!(
            "  nvenc:   {}",
            if nvenc_ok { "OK" } else { "not available (will use software encoding)" }
        );
    }

    println!();

    if !ffmpeg_ok || !ffprobe_ok {
        println!("WARNING: FFmpeg and ffprobe are required for camera capture and encoding.");
        println!("Please install FFmpeg and ensure it's in your PATH.");
        println!("Download: https://ffmpeg.org/download.html");
    } else {
        println!("all checks passed!");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mib_to_bytes() {
        assert_eq!(mib_to_bytes(0, "--chunk-mb").unwrap(), 0);
        assert_eq!(mib_to_bytes(100, "--chunk-mb").unwrap(), 100 * MIB);
        assert_eq!(mib_to_bytes(u64::MAX / MIB, "--max-space-mb").unwrap(), (u64::MAX / MIB) * MIB);
    }

    #[test]
    fn test_mib_to_bytes_rejects_overflow() {
        let err = mib_to_bytes(17_592_186_044_416, "--max-space-mb").unwrap_err();
        assert!(err.to_string().contains("--max-space-mb"));
    }
}
