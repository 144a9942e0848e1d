//! Stream writer capability

use camvault_capture::{Frame, FrameFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::encoder::FfmpegWriterFactory;
use crate::error::EncodeError;
use crate::mjpeg::MjpegWriterFactory;

/// An open recording file accepting frames in order
pub trait StreamWriter: Send {
    /// Destination file of this writer
    fn path(&self) -> &Path;

    fn write(&mut self, frame: &Frame) -> Result<(), EncodeError>;

    /// Flush and close the file
    fn close(self: Box<Self>) -> Result<(), EncodeError>;
}

/// Opens stream writers for one codec
pub trait WriterFactory: Send + Sync {
    /// File extension of the produced container, without the dot
    fn extension(&self) -> &'static str;

    fn open(&self, path: &Path, format: FrameFormat) -> Result<Box<dyn StreamWriter>, EncodeError>;
}

/// Recording codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// MPEG-4 part 2 tagged XVID in an AVI container
    #[default]
    Xvid,
    /// H.264 in a Matroska container
    H264,
    /// Concatenated JPEG stills, no external encoder required
    Mjpeg,
}

/// Stream writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub codec: Codec,
    /// Use hardware encoding (NVENC) for H.264
    #[serde(default)]
    pub use_hw_encoding: bool,
    /// Codec quality; CRF/CQ for H.264, qscale for XVID, 1-100 for MJPEG
    #[serde(default = "default_quality")]
    pub quality: u32,
}

fn default_quality() -> u32 { 5 }

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Xvid,
            use_hw_encoding: false,
            quality: default_quality(),
        }
    }
}

/// Build the writer factory for a configuration
pub fn writer_factory(config: &EncoderConfig) -> Arc<dyn WriterFactory> {
    match config.codec {
        Codec::Xvid | Codec::H264 => Arc::new(FfmpegWriterFactory::new(config.clone())),
        Codec::Mjpeg => Arc::new(MjpegWriterFactory::new(mjpeg_quality(config.quality))),
    }
}

/// Map the shared quality knob onto the JPEG 1-100 scale
fn mjpeg_quality(quality: u32) -> u8 {
    if quality <= 31 {
        // qscale-style value, lower is better
        (100 - quality.min(31) * 3).clamp(10, 100) as u8
    } else {
        quality.min(100) as u8
    }
}
