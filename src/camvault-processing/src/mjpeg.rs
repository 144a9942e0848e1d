//! Motion-JPEG writer

use camvault_capture::{Frame, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EncodeError;
use crate::writer::{StreamWriter, WriterFactory};

/// Writes each frame as a JPEG image appended to one file
#[derive(Debug, Clone)]
pub struct MjpegWriterFactory {
    quality: u8,
}

impl MjpegWriterFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl WriterFactory for MjpegWriterFactory {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn open(&self, path: &Path, format: FrameFormat) -> Result<Box<dyn StreamWriter>, EncodeError> {
        let file = File::create(path)?;
        debug!("opened mjpeg stream {:?} ({}x{})", path, format.width, format.height);

        Ok(Box::new(MjpegWriter {
            path: path.to_path_buf(),
            format,
            quality: self.quality,
            out: BufWriter::new(file),
        }))
    }
}

struct MjpegWriter {
    path: PathBuf,
    format: FrameFormat,
    quality: u8,
    out: BufWriter<File>,
}

impl StreamWriter for MjpegWriter {
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

        let mut encoder = JpegEncoder::new_with_quality(&mut self.out, self.quality);
        encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
        // Keep the on-disk size current for rotation checks
        self.out.flush()?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), EncodeError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_file_grows_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let format = FrameFormat { width: 16, height: 16, fps: 10.0 };
        let factory = MjpegWriterFactory::new(80);

        let mut writer = factory.open(&path, format).unwrap();
        let frame = Frame::new(vec![200; format.frame_len()], 16, 16).unwrap();

        writer.write(&frame).unwrap();
        let after_one = std::fs::metadata(&path).unwrap().len();
        writer.write(&frame).unwrap();
        let after_two = std::fs::metadata(&path).unwrap().len();
        writer.close().unwrap();

        assert!(after_one > 0);
        assert!(after_two > after_one);
    }

    #[test]
    fn test_mjpeg_rejects_wrong_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let format = FrameFormat { width: 16, height: 16, fps: 10.0 };
        let mut writer = MjpegWriterFactory::new(80)
            .open(&dir.path().join("clip.mjpeg"), format)
            .unwrap();

        let frame = Frame::new(vec![0; 8 * 8 * 3], 8, 8).unwrap();
        assert!(matches!(writer.write(&frame), Err(EncodeError::FrameMismatch { .. })));
    }
}
