//! camvault-processing - Stream writers for Camvault
//!
//! Serializes decoded frames into on-disk video files. The FFmpeg writer pipes
//! raw frames to an encoder subprocess; the Motion-JPEG writer needs nothing
//! beyond the `image` crate.

pub mod encoder;
pub mod error;
pub mod mjpeg;
pub mod writer;

pub use encoder::FfmpegWriterFactory;
pub use error::EncodeError;
pub use mjpeg::MjpegWriterFactory;
pub use writer::{writer_factory, Codec, EncoderConfig, StreamWriter, WriterFactory};
