//! Video frames and the sources that produce them.
//!
//! [`FrameSource`] is implemented by the real camera (`webcam` feature) and
//! by [`TestPattern`], the stand-in used in simulation mode.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open camera {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("camera disconnected")]
    Disconnected,
}

impl CaptureError {
    /// Errors after which no further frames will arrive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Open { .. } | CaptureError::Disconnected)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Frame
// ════════════════════════════════════════════════════════════════════════════

/// A packed RGB8 image, row-major, no padding.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width:  u32,
    pub height: u32,
    pub rgb:    Vec<u8>,
}

impl Frame {
    /// Wrap an RGB buffer; fails if the length does not match the size.
    pub fn from_rgb(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(CaptureError::Decode(format!(
                "{}x{} frame needs {} bytes, got {}",
                width, height, expected, rgb.len()
            )));
        }
        Ok(Frame { width, height, rgb })
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color.iter().copied().cycle().take(width as usize * height as usize * 3).collect();
        Frame { width, height, rgb }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]])
    }

    /// Flip left ↔ right in place.
    pub fn mirror_horizontal(&mut self) {
        let row_len = self.width as usize * 3;
        if row_len == 0 {
            return;
        }
        for row in self.rgb.chunks_exact_mut(row_len) {
            let w = self.width as usize;
            for x in 0..w / 2 {
                let (a, b) = (x * 3, (w - 1 - x) * 3);
                for c in 0..3 {
                    row.swap(a + c, b + c);
                }
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FrameSource
// ════════════════════════════════════════════════════════════════════════════

/// Anything that can hand out video frames, one blocking call at a time.
pub trait FrameSource {
    fn name(&self) -> &str;
    fn dimensions(&self) -> (u32, u32);
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

// ── TestPattern — simulation stand-in ─────────────────────────────────────

/// A dark frame with a faint grid, paced to a fixed frame rate.
pub struct TestPattern {
    width:    u32,
    height:   u32,
    interval: Duration,
    last:     Option<Instant>,
    base:     Frame,
}

impl TestPattern {
    const BG:   [u8; 3] = [0x1A, 0x1A, 0x2E];
    const GRID: [u8; 3] = [0x24, 0x24, 0x40];
    const CELL: u32     = 40;

    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let mut base = Frame::filled(width, height, Self::BG);
        for y in 0..height {
            for x in 0..width {
                if x % Self::CELL == 0 || y % Self::CELL == 0 {
                    let i = (y as usize * width as usize + x as usize) * 3;
                    base.rgb[i..i + 3].copy_from_slice(&Self::GRID);
                }
            }
        }
        TestPattern {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            last: None,
            base,
        }
    }
}

impl FrameSource for TestPattern {
    fn name(&self) -> &str { "test pattern" }

    fn dimensions(&self) -> (u32, u32) { (self.width, self.height) }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        // Stand in for the camera's blocking read.
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
        Ok(self.base.clone())
    }
}

// ── Webcam — real camera (feature = "webcam") ─────────────────────────────

/// The system camera, streaming RGB at its highest frame rate.
///
/// The stream is opened on construction and stopped on drop.
#[cfg(feature = "webcam")]
pub struct Webcam {
    camera: nokhwa::Camera,
    name:   String,
}

#[cfg(feature = "webcam")]
impl Webcam {
    pub fn open(index: u32) -> Result<Self, CaptureError> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};

        let open_err = |e: nokhwa::NokhwaError| CaptureError::Open { index, reason: e.to_string() };

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(index), requested).map_err(open_err)?;
        camera.open_stream().map_err(open_err)?;

        let name = camera.info().human_name();
        let res = camera.resolution();
        tracing::info!(camera = %name, width = res.width(), height = res.height(), "camera opened");

        Ok(Webcam { camera, name })
    }
}

#[cfg(feature = "webcam")]
impl FrameSource for Webcam {
    fn name(&self) -> &str { &self.name }

    fn dimensions(&self) -> (u32, u32) {
        let res = self.camera.resolution();
        (res.width(), res.height())
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        use nokhwa::pixel_format::RgbFormat;

        if !self.camera.is_stream_open() {
            return Err(CaptureError::Disconnected);
        }
        let buffer = self.camera.frame().map_err(|e| CaptureError::Capture(e.to_string()))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        let (width, height) = (image.width(), image.height());
        Frame::from_rgb(width, height, image.into_raw())
    }
}

#[cfg(feature = "webcam")]
impl Drop for Webcam {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("failed to stop camera stream: {}", e);
        } else {
            tracing::info!(camera = %self.name, "camera released");
        }
    }
}
