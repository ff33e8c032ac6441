// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture device
//!
//! Formats and streaming go through the `v4l` crate (mmap streaming with a
//! poll timeout); controls use the raw ioctls in
//! [`v4l2_controls`](super::v4l2_controls).

use super::types::{BackendError, BackendResult, CameraFormat, DeviceInfo, FrameInfo, Framerate, PixelFormat};
use super::v4l2_controls::V4l2ControlChannel;
use super::v4l2_utils;
use super::{CaptureDevice, ControlChannel, DeviceProvider};
use crate::constants::capture::{DEQUEUE_TIMEOUT, STREAM_BUFFER_COUNT};
use crate::constants::{COMMON_FRAMERATES, COMMON_RESOLUTIONS};
use std::sync::Arc;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC, Fraction};

/// Provider for `/dev/video*` nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Provider;

impl V4l2Provider {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProvider for V4l2Provider {
    fn open(&self, path: &str) -> BackendResult<Box<dyn CaptureDevice>> {
        let dev = Device::with_path(path).map_err(|e| BackendError::from_io(&e))?;
        let info = v4l2_utils::build_device_info(path, None);
        info!(path, driver = %info.driver, "Opened V4L2 device");

        Ok(Box::new(V4l2Device {
            path: path.to_string(),
            dev,
            stream: None,
            controls: Arc::new(V4l2ControlChannel::new(path)),
        }))
    }

    fn list_devices(&self) -> Vec<DeviceInfo> {
        v4l2_utils::discover_capture_devices()
    }
}

struct V4l2Device {
    path: String,
    dev: Device,
    stream: Option<MmapStream<'static>>,
    controls: Arc<V4l2ControlChannel>,
}

fn rates_for(dev: &Device, fourcc: FourCC, width: u32, height: u32) -> Vec<Framerate> {
    let intervals = match dev.enum_frameintervals(fourcc, width, height) {
        Ok(intervals) => intervals,
        Err(e) => {
            debug!(width, height, error = %e, "Frame interval enumeration failed");
            return vec![Framerate::default()];
        }
    };

    let mut rates = Vec::new();
    for interval in intervals {
        match interval.interval {
            FrameIntervalEnum::Discrete(frac) => {
                if frac.numerator > 0 {
                    rates.push(Framerate::from_interval(frac.numerator, frac.denominator));
                }
            }
            FrameIntervalEnum::Stepwise(step) => {
                // Shortest interval is the fastest rate
                let fastest = Framerate::from_interval(step.min.numerator, step.min.denominator);
                let slowest = Framerate::from_interval(step.max.numerator, step.max.denominator);
                rates.extend(
                    COMMON_FRAMERATES
                        .iter()
                        .map(|&fps| Framerate::from_int(fps))
                        .filter(|r| r.as_f64() <= fastest.as_f64() && r.as_f64() >= slowest.as_f64()),
                );
            }
        }
    }

    if rates.is_empty() {
        rates.push(Framerate::default());
    }
    rates
}

impl CaptureDevice for V4l2Device {
    fn path(&self) -> &str {
        &self.path
    }

    fn enumerate_formats(&self) -> BackendResult<Vec<CameraFormat>> {
        let descriptions = self
            .dev
            .enum_formats()
            .map_err(|e| BackendError::from_io(&e))?;

        let mut formats = Vec::new();
        for desc in descriptions {
            let pixel_format = PixelFormat::from_fourcc(desc.fourcc.repr);
            let sizes = match self.dev.enum_framesizes(desc.fourcc) {
                Ok(sizes) => sizes,
                Err(e) => {
                    warn!(fourcc = %pixel_format, error = %e, "Frame size enumeration failed");
                    continue;
                }
            };

            for size in sizes {
                let dims: Vec<(u32, u32)> = match size.size {
                    FrameSizeEnum::Discrete(discrete) => vec![(discrete.width, discrete.height)],
                    FrameSizeEnum::Stepwise(step) => COMMON_RESOLUTIONS
                        .iter()
                        .copied()
                        .filter(|&(w, h)| {
                            w >= step.min_width
                                && w <= step.max_width
                                && h >= step.min_height
                                && h <= step.max_height
                                && (w - step.min_width) % step.step_width.max(1) == 0
                                && (h - step.min_height) % step.step_height.max(1) == 0
                        })
                        .collect(),
                };

                for (width, height) in dims {
                    for framerate in rates_for(&self.dev, desc.fourcc, width, height) {
                        formats.push(CameraFormat::new(pixel_format, width, height, framerate));
                    }
                }
            }
        }

        debug!(path = %self.path, count = formats.len(), "Enumerated V4L2 formats");
        Ok(formats)
    }

    fn set_format(&mut self, format: &CameraFormat) -> BackendResult<CameraFormat> {
        if self.stream.is_some() {
            return Err(BackendError::Denied("device is streaming".to_string()));
        }

        let requested = Format::new(
            format.width,
            format.height,
            FourCC::new(&format.pixel_format.fourcc()),
        );
        let applied = self
            .dev
            .set_format(&requested)
            .map_err(|e| BackendError::from_io(&e))?;

        let (num, denom) = format.framerate.as_interval();
        let framerate = match self.dev.set_params(&Parameters::new(Fraction::new(num, denom))) {
            Ok(params) if params.interval.numerator > 0 => {
                Framerate::from_interval(params.interval.numerator, params.interval.denominator)
            }
            Ok(_) => format.framerate,
            Err(e) => {
                debug!(path = %self.path, error = %e, "Driver does not accept frame interval");
                format.framerate
            }
        };

        Ok(CameraFormat::new(
            PixelFormat::from_fourcc(applied.fourcc.repr),
            applied.width,
            applied.height,
            framerate,
        ))
    }

    fn control_channel(&self) -> Arc<dyn ControlChannel> {
        self.controls.clone()
    }

    fn start_stream(&mut self) -> BackendResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let mut stream = MmapStream::with_buffers(&self.dev, Type::VideoCapture, STREAM_BUFFER_COUNT)
            .map_err(|e| BackendError::from_io(&e))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        stream.start().map_err(|e| BackendError::from_io(&e))?;
        debug!(path = %self.path, buffers = STREAM_BUFFER_COUNT, "V4L2 stream started");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_stream(&mut self) -> BackendResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop().map_err(|e| BackendError::from_io(&e))?;
            debug!(path = %self.path, "V4L2 stream stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn dequeue(&mut self, buffer: &mut Vec<u8>) -> BackendResult<FrameInfo> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BackendError::Rejected("stream is off".to_string()))?;
        let (data, meta) = stream.next().map_err(|e| BackendError::from_io(&e))?;

        // Compressed payloads are shorter than the mapped buffer
        let used = (meta.bytesused as usize).min(data.len());
        let used = if used == 0 { data.len() } else { used };
        buffer.clear();
        buffer.extend_from_slice(&data[..used]);

        Ok(FrameInfo {
            bytes_used: used,
            device_sequence: meta.sequence,
        })
    }
}
