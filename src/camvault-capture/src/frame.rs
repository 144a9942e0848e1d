//! Decoded video frames

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use std::path::Path;

use crate::error::CaptureError;

/// Geometry and nominal rate of a frame source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl FrameFormat {
    /// Size in bytes of one packed RGB24 frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// A single packed RGB24 frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Wrap a raw buffer, checking it matches the declared geometry
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CaptureError::FrameSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            timestamp: Utc::now(),
        })
    }

    /// Convert to an RGB image buffer
    pub fn to_image(&self) -> Result<RgbImage, CaptureError> {
        let expected = self.width as usize * self.height as usize * 3;
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            CaptureError::FrameSize {
                expected,
                actual: self.data.len(),
            },
        )
    }

    /// Save as a JPEG still, overwriting any existing file
    pub fn save_jpeg(&self, path: &Path) -> Result<(), CaptureError> {
        self.to_image()?.save_with_format(path, ImageFormat::Jpeg)?;
        Ok(())
    }
}
