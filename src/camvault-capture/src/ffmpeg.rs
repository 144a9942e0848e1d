//! Network camera capture through an FFmpeg subprocess
//!
//! `ffprobe` reports the stream geometry, then `ffmpeg` decodes the stream to
//! packed RGB24 frames on its stdout, which are read one frame at a time.

use std::io::{BufReader, ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::frame::{Frame, FrameFormat};
use crate::source::{CaptureBackend, FrameSource};

/// Frame rate assumed when the stream does not advertise one
const FALLBACK_FPS: f64 = 20.0;

/// Capture backend driving `ffmpeg`/`ffprobe`
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    /// Socket timeout applied to probes and reads
    pub timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Query the stream geometry with ffprobe
    pub fn probe_format(&self, address: &str) -> Result<FrameFormat, CaptureError> {
        let mut cmd = Command::new("ffprobe");
        cmd.arg("-v").arg("error");
        self.input_options(&mut cmd, address);
        cmd.arg("-select_streams").arg("v:0")
            .arg("-show_entries").arg("stream=width,height,avg_frame_rate")
            .arg("-of").arg("csv=p=0")
            .arg(address)
            .stdin(Stdio::null());

        debug!("running ffprobe: {:?}", cmd);

        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Open {
                address: address.to_string(),
                reason: stderr.trim().chars().take(300).collect(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&stdout).ok_or_else(|| CaptureError::Open {
            address: address.to_string(),
            reason: format!("no video stream in probe output: {:?}", stdout.trim()),
        })
    }

    fn input_options(&self, cmd: &mut Command, address: &str) {
        let micros = self.timeout.as_micros().to_string();
        if address.starts_with("rtsp://") || address.starts_with("rtsps://") {
            cmd.arg("-rtsp_transport").arg("tcp").arg("-timeout").arg(micros);
        } else if address.contains("://") && !address.starts_with("file://") {
            cmd.arg("-rw_timeout").arg(micros);
        }
    }
}

impl CaptureBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let format = self.probe_format(address)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        self.input_options(&mut cmd, address);
        cmd.arg("-i").arg(address)
            .arg("-an")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        debug!("spawning ffmpeg decoder: {:?}", cmd);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| CaptureError::Open {
            address: address.to_string(),
            reason: "failed to open ffmpeg stdout".to_string(),
        })?;

        info!(
            "opened {} ({}x{} @ {:.1} fps)",
            address, format.width, format.height, format.fps
        );

        Ok(Box::new(FfmpegSource {
            format,
            child: Some(child),
            stdout: Some(BufReader::new(stdout)),
        }))
    }

    fn probe(&self, address: &str) -> bool {
        match self.probe_format(address) {
            Ok(_) => {
                debug!("camera reachable: {}", address);
                true
            }
            Err(e) => {
                debug!("camera unreachable: {}: {}", address, e);
                false
            }
        }
    }
}

/// Frames decoded by a running ffmpeg process
struct FfmpegSource {
    format: FrameFormat,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl FrameSource for FfmpegSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let stdout = self.stdout.as_mut()
            .ok_or_else(|| CaptureError::Read("source released".to_string()))?;

        let mut data = vec![0u8; self.format.frame_len()];
        match stdout.read_exact(&mut data) {
            Ok(()) => Frame::new(data, self.format.width, self.format.height).map(Some),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }

    fn release(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited
                debug!("ffmpeg kill: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("failed to reap ffmpeg decoder: {}", e);
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Parse `width,height,rate` as printed by ffprobe's csv writer
pub fn parse_probe_output(output: &str) -> Option<FrameFormat> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',');

    let width: u32 = fields.next()?.trim().parse().ok().filter(|w| *w > 0)?;
    let height: u32 = fields.next()?.trim().parse().ok().filter(|h| *h > 0)?;
    let fps = fields.next()
        .and_then(parse_rate)
        .unwrap_or(FALLBACK_FPS);

    Some(FrameFormat { width, height, fps })
}

/// Parse an ffmpeg rational such as `30000/1001`
fn parse_rate(rate: &str) -> Option<f64> {
    let rate = rate.trim();
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}

/// Check if ffprobe is available
pub fn check_ffprobe() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
