// SPDX-License-Identifier: GPL-3.0-only

//! usbcam - USB camera control and capture pipeline
//!
//! Opens a V4L2 capture device, negotiates its format, pulls frames on a
//! dedicated thread and exports single frames or bursts to disk.
//!
//! # Architecture
//!
//! - [`backends`]: Device access, controls and the capture loop
//! - [`pipelines`]: Frame conversion and export
//! - [`storage`]: Output file naming
//! - [`config`]: User configuration handling
//! - [`errors`]: The error taxonomy shared by every operation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use usbcam::backends::camera::{CaptureLoop, DeviceHandle, FormatRequest, PixelFormat, V4l2Provider};
//! use usbcam::pipelines::photo::{ExportRequest, ExportTarget, FrameExporter, PhotoCapture};
//! use usbcam::NamingRule;
//!
//! # fn main() -> Result<(), usbcam::CameraError> {
//! let request = FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30);
//! let handle = DeviceHandle::open(Arc::new(V4l2Provider::new()), "/dev/video0", &request)?;
//!
//! let mut capture = CaptureLoop::new("main");
//! let sink = capture.subscribe("snapshot");
//! capture.start(handle)?;
//!
//! let frame = PhotoCapture::from_sink(&sink, Duration::from_secs(2))?;
//! let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
//! exporter.export_one(&frame, &ExportRequest::single(ExportTarget::Png, "/tmp/usbcam"))?;
//!
//! let _handle = capture.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{
    CameraFormat, CameraFrame, CaptureLoop, ControlRegistry, DeviceHandle, FormatRequest,
    PixelFormat,
};
pub use config::Config;
pub use constants::{JpegQuality, NamingRule};
pub use errors::{CameraError, CameraResult};
pub use pipelines::photo::{ExportRequest, ExportTarget, FrameExporter};
pub use storage::NamingScheme;
