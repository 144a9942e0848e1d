//! Configuration management
//!
//! TOML file with every field defaulted, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! recording_root = "/var/lib/camvault"
//! max_space_bytes = 10737418240
//! chunk_size_bytes = 104857600
//!
//! [[cameras]]
//! address = "rtsp://10.0.0.12/stream1"
//! nickname = "driveway"
//!
//! [capture]
//! source = "ffmpeg"
//!
//! [encoding]
//! codec = "xvid"
//! ```

use anyhow::{Context, Result};
use camvault_capture::SourceKind;
use camvault_processing::EncoderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::{GuardianPolicy, StorageSettings};

const MIB: u64 = 1024 * 1024;

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one `camera_<id>` folder per camera
    #[serde(default = "default_recording_root")]
    pub recording_root: PathBuf,

    /// Storage budget for everything under the recording root
    #[serde(default = "default_max_space_bytes")]
    pub max_space_bytes: u64,

    /// Recording files are rotated once they exceed this size
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,

    /// Cameras registered at startup
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub encoding: EncoderConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// A camera entry, written `address|nickname` on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub address: String,
    pub nickname: String,
}

impl FromStr for CameraConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, nickname) = s.split_once('|')
            .ok_or_else(|| format!("expected ADDRESS|NICKNAME, got {:?}", s))?;
        let address = address.trim();
        let nickname = nickname.trim();
        if address.is_empty() || nickname.is_empty() {
            return Err("camera address and nickname are required".to_string());
        }

        Ok(Self {
            address: address.to_string(),
            nickname: nickname.to_string(),
        })
    }
}

/// Frame source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub source: SourceKind,

    /// Network timeout for probes and stream reads
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

/// Guardian settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Files modified within this many seconds are never evicted
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Minimum milliseconds between scans triggered by frame writes
    #[serde(default)]
    pub scan_interval_ms: u64,
}

// Default value functions
fn default_recording_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Camvault")
        .join("recordings")
}
fn default_max_space_bytes() -> u64 { 10 * 1024 * MIB }
fn default_chunk_size_bytes() -> u64 { 100 * MIB }
fn default_probe_timeout_secs() -> u64 { 5 }
fn default_grace_secs() -> u64 { 5 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            scan_interval_ms: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recording_root: default_recording_root(),
            max_space_bytes: default_max_space_bytes(),
            chunk_size_bytes: default_chunk_size_bytes(),
            cameras: Vec::new(),
            capture: CaptureConfig::default(),
            encoding: EncoderConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Load the given file, or defaults when none is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            root: self.recording_root.clone(),
            max_bytes: self.max_space_bytes,
            chunk_bytes: self.chunk_size_bytes,
        }
    }

    pub fn guardian_policy(&self) -> GuardianPolicy {
        GuardianPolicy {
            grace: Duration::from_secs(self.storage.grace_secs),
            scan_interval: Duration::from_millis(self.storage.scan_interval_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.capture.probe_timeout_secs)
    }
}
