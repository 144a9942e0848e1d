//! Encoding error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("frame is {actual_width}x{actual_height}, writer expects {width}x{height}")]
    FrameMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("encoder exited: {0}")]
    Encoder(String),

    #[error("writer already closed")]
    Closed,
}
