//! Video encoding using FFmpeg
//!
//! Raw RGB24 frames are piped directly to FFmpeg stdin; closing the writer
//! closes the pipe and waits for FFmpeg to finish the container.

use camvault_capture::{Frame, FrameFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::EncodeError;
use crate::writer::{Codec, EncoderConfig, StreamWriter, WriterFactory};

/// Opens piped FFmpeg encoders
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    config: EncoderConfig,
    use_nvenc: bool,
}

impl FfmpegWriterFactory {
    /// Build the factory, probing once for NVENC when hardware H.264 is requested.
    ///
    /// Without NVENC the factory encodes with libx264 instead.
    pub fn new(config: EncoderConfig) -> Self {
        let wants_nvenc = config.codec == Codec::H264 && config.use_hw_encoding;
        let use_nvenc = wants_nvenc && check_nvenc();
        if wants_nvenc && !use_nvenc {
            warn!("NVENC not available, falling back to libx264");
        }
        Self::with_nvenc(config, use_nvenc)
    }

    /// Build the factory with a known NVENC availability
    pub fn with_nvenc(config: EncoderConfig, nvenc_available: bool) -> Self {
        let use_nvenc = nvenc_available && config.use_hw_encoding;
        Self { config, use_nvenc }
    }

    fn build_command(&self, path: &Path, format: FrameFormat) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y") // Overwrite output
            .arg("-hide_banner")
            .arg("-loglevel").arg("error")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgb24")
            .arg("-s").arg(format!("{}x{}", format.width, format.height))
            .arg("-r").arg(format!("{:.3}", format.fps))
            .arg("-i").arg("-") // Read from stdin
            .arg("-c:v");

        match self.config.codec {
            Codec::H264 if self.use_nvenc => {
                cmd.arg("h264_nvenc")
                    .arg("-preset").arg("p4")
                    .arg("-rc").arg("vbr")
                    .arg("-cq").arg(self.config.quality.to_string());
            }
            Codec::H264 => {
                cmd.arg("libx264")
                    .arg("-crf").arg(self.config.quality.to_string())
                    .arg("-preset").arg("fast");
            }
            Codec::Xvid | Codec::Mjpeg => {
                cmd.arg("mpeg4")
                    .arg("-vtag").arg("xvid")
                    .arg("-q:v").arg(self.config.quality.to_string());
            }
        }

        cmd.arg("-pix_fmt").arg("yuv420p")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn extension(&self) -> &'static str {
        match self.config.codec {
            Codec::H264 => "mkv",
            Codec::Xvid | Codec::Mjpeg => "avi",
        }
    }

    fn open(&self, path: &Path, format: FrameFormat) -> Result<Box<dyn StreamWriter>, EncodeError> {
        let mut cmd = self.build_command(path, format);
        debug!("spawning ffmpeg pipe: {:?}", cmd);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take()
            .ok_or_else(|| EncodeError::Encoder("failed to open ffmpeg stdin".to_string()))?;

        info!(
            "starting piped encoding to {:?} ({}x{})",
            path, format.width, format.height
        );

        Ok(Box::new(FfmpegWriter {
            path: path.to_path_buf(),
            format,
            process: Some(child),
            stdin: Some(stdin),
            frame_count: 0,
        }))
    }
}

/// One recording file fed through an FFmpeg pipe
pub struct FfmpegWriter {
    path: PathBuf,
    format: FrameFormat,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    frame_count: u64,
}

impl FfmpegWriter {
    fn finish(&mut self) -> Result<(), EncodeError> {
        // Close stdin to signal EOF to FFmpeg
        self.stdin.take();

        let Some(child) = self.process.take() else {
            return Ok(());
        };

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.chars().take(500).collect();

            // A partial file is still playable, so only fail if nothing was written
            if self.frame_count == 0 {
                return Err(EncodeError::Encoder(stderr));
            }
            warn!("ffmpeg stderr: {}", stderr);
        }

        debug!("finalized {:?} after {} frames", self.path, self.frame_count);
        Ok(())
    }
}

impl StreamWriter for FfmpegWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        if frame.width != self.format.width || frame.height != self.format.height {
            return Err(EncodeError::FrameMismatch {
                width: self.format.width,
                height: self.format.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }

        let stdin = self.stdin.as_mut().ok_or(EncodeError::Closed)?;
        stdin.write_all(&frame.data)?;
        self.frame_count += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), EncodeError> {
        self.finish()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("failed to finalize {:?} on drop: {}", self.path, e);
        }
    }
}

/// Check if FFmpeg is available
pub fn check_ffmpeg() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check if NVENC is available
pub fn check_nvenc() -> bool {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains("h264_nvenc"))
        .unwrap_or(false)
}
