// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use super::buffer_pool::PooledBuffer;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Four-character pixel format code as reported by V4L2
pub type Fourcc = [u8; 4];

/// Frame data storage - either pre-copied bytes or a pooled capture buffer
///
/// Pooled buffers go back to the capture loop's [`BufferPool`](super::BufferPool)
/// when the frame holding them is dropped.
pub enum FrameData {
    /// Pre-copied bytes (tests, decoded stills, simulated sources)
    Copied(Arc<[u8]>),
    /// Buffer borrowed from the capture loop's pool
    Pooled(PooledBuffer),
}

impl FrameData {
    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Pooled(buf) => write!(f, "FrameData::Pooled({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Pooled(buf) => buf.as_ref(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data))
    }
}

/// Device information from V4L2 capability
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
    /// Real device path (resolved symlinks)
    pub real_path: String,
}

/// Pixel format of captured frames
///
/// Formats the export pipeline knows how to decode get their own variant;
/// anything else a device advertises is carried as `Other` so it can still
/// be negotiated and streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2 (Y0 U Y1 V)
    Yuyv,
    /// Packed 4:2:2 (U Y0 V Y1)
    Uyvy,
    /// Motion JPEG, one JPEG image per frame
    Mjpeg,
    /// Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    Nv12,
    /// 24-bit RGB
    Rgb24,
    /// 24-bit BGR
    Bgr24,
    /// 8-bit grayscale
    Gray8,
    /// 16-bit little-endian grayscale
    Gray16,
    /// Any other fourcc
    Other(Fourcc),
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a pixel format
    pub fn from_fourcc(code: Fourcc) -> Self {
        match &code {
            b"YUYV" | b"YUY2" => Self::Yuyv,
            b"UYVY" => Self::Uyvy,
            b"MJPG" | b"JPEG" => Self::Mjpeg,
            b"NV12" => Self::Nv12,
            b"RGB3" => Self::Rgb24,
            b"BGR3" => Self::Bgr24,
            b"GREY" => Self::Gray8,
            b"Y16 " => Self::Gray16,
            _ => Self::Other(code),
        }
    }

    /// The V4L2 fourcc for this format
    pub fn fourcc(&self) -> Fourcc {
        match self {
            Self::Yuyv => *b"YUYV",
            Self::Uyvy => *b"UYVY",
            Self::Mjpeg => *b"MJPG",
            Self::Nv12 => *b"NV12",
            Self::Rgb24 => *b"RGB3",
            Self::Bgr24 => *b"BGR3",
            Self::Gray8 => *b"GREY",
            Self::Gray16 => *b"Y16 ",
            Self::Other(code) => *code,
        }
    }

    /// Parse a user-supplied fourcc such as "YUYV" or "Y16"
    ///
    /// Codes shorter than four characters are space padded, matching how
    /// V4L2 spells them.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || text.len() > 4 || !text.is_ascii() {
            return None;
        }
        let mut code = *b"    ";
        for (slot, byte) in code.iter_mut().zip(text.to_ascii_uppercase().bytes()) {
            *slot = byte;
        }
        Some(Self::from_fourcc(code))
    }

    /// Compressed formats have no fixed frame size
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpeg)
    }

    /// Check if this is a YUV format
    pub fn is_yuv(&self) -> bool {
        matches!(self, Self::Yuyv | Self::Uyvy | Self::Nv12)
    }

    /// Check if the decoded image carries a single luminance channel
    pub fn is_grayscale(&self) -> bool {
        matches!(self, Self::Gray8 | Self::Gray16)
    }

    /// Bytes needed for one uncompressed frame, if the layout is known
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Yuyv | Self::Uyvy | Self::Gray16 => Some(pixels * 2),
            Self::Nv12 => Some(pixels + pixels / 2),
            Self::Rgb24 | Self::Bgr24 => Some(pixels * 3),
            Self::Gray8 => Some(pixels),
            Self::Mjpeg | Self::Other(_) => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.fourcc();
        let text: String = code
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { ' ' })
            .collect();
        write!(f, "{}", text.trim_end())
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Create a framerate from a V4L2 frame interval (seconds per frame)
    pub fn from_interval(numerator: u32, denominator: u32) -> Self {
        Self::new(denominator, numerator)
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Get the rounded integer framerate
    pub fn as_int(&self) -> u32 {
        self.num / self.denom
    }

    /// Frame interval as a fraction (numerator, denominator) for V4L2
    pub fn as_interval(&self) -> (u32, u32) {
        (self.denom, self.num)
    }

    /// Absolute distance to another rate, in millihertz
    pub fn distance_millis(&self, other: &Framerate) -> u64 {
        ((self.as_f64() - other.as_f64()).abs() * 1000.0).round() as u64
    }

    /// Rates equal to within a millihertz (30/1 matches 60/2)
    pub fn approx_eq(&self, other: &Framerate) -> bool {
        self.distance_millis(other) == 0
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fps = self.as_f64();
        // Show decimal for non-integer framerates (NTSC)
        if self.denom != 1 {
            write!(f, "{:.2}", fps)
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// A complete capture mode: the unit a device advertises and negotiates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub framerate: Framerate,
}

impl CameraFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32, framerate: Framerate) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate,
        }
    }

    /// Same fourcc, resolution and (approximately) the same rate
    pub fn same_mode(&self, other: &CameraFormat) -> bool {
        self.pixel_format == other.pixel_format
            && self.width == other.width
            && self.height == other.height
            && self.framerate.approx_eq(&other.framerate)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for CameraFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps",
            self.pixel_format, self.width, self.height, self.framerate
        )
    }
}

/// What the caller asks for when opening a device
///
/// The device may not support this exact mode; see
/// [`negotiate`](super::negotiation::negotiate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
}

impl FormatRequest {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32, fps: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            framerate: Framerate::from_int(fps),
        }
    }

    /// Request exactly this format again (used by reset)
    pub fn exact(format: &CameraFormat) -> Self {
        Self {
            pixel_format: format.pixel_format,
            width: format.width,
            height: format.height,
            framerate: format.framerate,
        }
    }
}

impl std::fmt::Display for FormatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps",
            self.pixel_format, self.width, self.height, self.framerate
        )
    }
}

/// Metadata returned by a device dequeue
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInfo {
    /// Payload size in bytes
    pub bytes_used: usize,
    /// Driver sequence number (resets with the stream)
    pub device_sequence: u32,
}

/// A single frame from the camera
///
/// Frames are immutable once produced and shared as `Arc<CameraFrame>`
/// between sinks.
#[derive(Debug)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Raw payload in `format`
    pub data: FrameData,
    /// Pixel format of the data
    pub format: PixelFormat,
    /// Loop-wide sequence number, strictly increasing across device resets
    pub sequence: u64,
    /// Wall-clock capture time, used for file naming
    pub timestamp: DateTime<Local>,
    /// Monotonic capture time (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a frame around owned bytes, stamped now
    pub fn from_bytes(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
        sequence: u64,
    ) -> Self {
        Self {
            width,
            height,
            data: FrameData::from(data),
            format,
            sequence,
            timestamp: Local::now(),
            captured_at: Instant::now(),
        }
    }

    /// Replace the wall-clock timestamp (tests and replays)
    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a device backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Device node does not exist or cannot be opened
    #[error("Device not found: {0}")]
    NotFound(String),
    /// Device was unplugged while in use
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// No frame arrived within the dequeue timeout
    #[error("Timed out waiting for frame")]
    Timeout,
    /// The device does not support the requested operation or format
    #[error("Not supported: {0}")]
    Unsupported(String),
    /// The driver rejected a value (EINVAL / ERANGE)
    #[error("Rejected by driver: {0}")]
    Rejected(String),
    /// The driver refused the operation (EACCES / EPERM / EBUSY)
    #[error("Denied by driver: {0}")]
    Denied(String),
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl BackendError {
    /// Classify an OS error from an ioctl or read
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENXIO) => BackendError::Disconnected(err.to_string()),
            Some(libc::ENOENT) => BackendError::NotFound(err.to_string()),
            Some(libc::EINVAL) | Some(libc::ERANGE) => BackendError::Rejected(err.to_string()),
            Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::EBUSY) => {
                BackendError::Denied(err.to_string())
            }
            _ if err.kind() == std::io::ErrorKind::TimedOut => BackendError::Timeout,
            _ if err.kind() == std::io::ErrorKind::NotFound => {
                BackendError::NotFound(err.to_string())
            }
            _ => BackendError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip_names() {
        assert_eq!(PixelFormat::from_fourcc(*b"YUYV"), PixelFormat::Yuyv);
        assert_eq!(PixelFormat::from_fourcc(*b"JPEG"), PixelFormat::Mjpeg);
        assert_eq!(PixelFormat::parse("y16"), Some(PixelFormat::Gray16));
        assert_eq!(PixelFormat::Gray16.to_string(), "Y16");
        assert_eq!(
            PixelFormat::parse("Y10B"),
            Some(PixelFormat::Other(*b"Y10B"))
        );
        assert_eq!(PixelFormat::parse("TOOLONG"), None);
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Yuyv.frame_size(640, 480), Some(614_400));
        assert_eq!(PixelFormat::Nv12.frame_size(4, 2), Some(12));
        assert_eq!(PixelFormat::Mjpeg.frame_size(640, 480), None);
    }

    #[test]
    fn test_framerate_interval() {
        let rate = Framerate::from_interval(1001, 60000);
        assert_eq!(rate.to_string(), "59.94");
        assert_eq!(rate.as_interval(), (1001, 60000));
        assert!(Framerate::new(60, 2).approx_eq(&Framerate::from_int(30)));
    }

    #[test]
    fn test_backend_error_classification() {
        let err = std::io::Error::from_raw_os_error(libc::ENODEV);
        assert!(matches!(BackendError::from_io(&err), BackendError::Disconnected(_)));
        let err = std::io::Error::from_raw_os_error(libc::ERANGE);
        assert!(matches!(BackendError::from_io(&err), BackendError::Rejected(_)));
    }
}
