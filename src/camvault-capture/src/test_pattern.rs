//! Synthetic frame source
//!
//! Addresses take the form `testsrc://WIDTHxHEIGHT[@FPS][?frames=N]`. Any
//! other address is treated as unreachable, which makes the backend handy for
//! exercising offline cameras as well.

use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::CaptureError;
use crate::frame::{Frame, FrameFormat};
use crate::source::{CaptureBackend, FrameSource};

const SCHEME: &str = "testsrc://";
const DEFAULT_FPS: f64 = 10.0;

/// Parsed test pattern address
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSpec {
    pub format: FrameFormat,
    /// Number of frames before the stream ends (None = endless)
    pub frames: Option<u64>,
}

impl PatternSpec {
    pub fn parse(address: &str) -> Option<Self> {
        let rest = address.strip_prefix(SCHEME)?;
        let (geometry, query) = match rest.split_once('?') {
            Some((g, q)) => (g, Some(q)),
            None => (rest, None),
        };

        let (size, fps) = match geometry.split_once('@') {
            Some((s, f)) => (s, f.parse::<f64>().ok().filter(|f| *f > 0.0)?),
            None => (geometry, DEFAULT_FPS),
        };

        let (width, height) = size.split_once('x')?;
        let width: u32 = width.parse().ok().filter(|w| *w > 0)?;
        let height: u32 = height.parse().ok().filter(|h| *h > 0)?;

        let mut frames = None;
        if let Some(query) = query {
            for pair in query.split('&') {
                if let Some(n) = pair.strip_prefix("frames=") {
                    frames = Some(n.parse().ok()?);
                }
            }
        }

        Some(Self {
            format: FrameFormat { width, height, fps },
            frames,
        })
    }
}

/// Backend generating a moving gradient instead of decoding a stream
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    /// Sleep between frames to match the nominal rate
    pub paced: bool,
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self { paced: true }
    }
}

impl TestPatternBackend {
    /// Backend that produces frames as fast as they are read
    pub fn unpaced() -> Self {
        Self { paced: false }
    }
}

impl CaptureBackend for TestPatternBackend {
    fn name(&self) -> &'static str {
        "test_pattern"
    }

    fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let spec = PatternSpec::parse(address).ok_or_else(|| CaptureError::Open {
            address: address.to_string(),
            reason: "not a test pattern address".to_string(),
        })?;

        debug!(
            "opened test pattern {}x{} @ {} fps",
            spec.format.width, spec.format.height, spec.format.fps
        );

        Ok(Box::new(TestPatternSource {
            spec,
            paced: self.paced,
            produced: 0,
            last_frame: None,
            released: false,
        }))
    }

    fn probe(&self, address: &str) -> bool {
        PatternSpec::parse(address).is_some()
    }
}

struct TestPatternSource {
    spec: PatternSpec,
    paced: bool,
    produced: u64,
    last_frame: Option<Instant>,
    released: bool,
}

impl TestPatternSource {
    fn render(&self) -> Vec<u8> {
        let FrameFormat { width, height, .. } = self.spec.format;
        let shift = (self.produced % 256) as u32;
        let mut data = Vec::with_capacity(self.spec.format.frame_len());
        for y in 0..height {
            for x in 0..width {
                data.push(((x * 255 / width + shift) % 256) as u8);
                data.push(((y * 255 / height) % 256) as u8);
                data.push((shift * 3 % 256) as u8);
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    fn format(&self) -> FrameFormat {
        self.spec.format
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Err(CaptureError::Read("source released".to_string()));
        }
        if self.spec.frames.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }

        if self.paced {
            let interval = Duration::from_secs_f64(1.0 / self.spec.format.fps);
            if let Some(last) = self.last_frame {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            }
            self.last_frame = Some(Instant::now());
        }

        let frame = Frame::new(self.render(), self.spec.format.width, self.spec.format.height)?;
        self.produced += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
