//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open source {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("frame buffer is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
