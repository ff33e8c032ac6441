// SPDX-License-Identifier: GPL-3.0-only

//! Simulated capture device
//!
//! Behaves like a small UVC webcam: advertises a format table, exposes the
//! usual controls (including the UVC auto-exposure menu that marks exposure
//! inactive) and produces a moving test pattern in whatever format was
//! negotiated. Tests and `--simulate` use it in place of real hardware; it
//! also lets tests unplug the device or inject read failures.

use super::types::{
    BackendError, BackendResult, CameraFormat, DeviceInfo, FrameInfo, Framerate, PixelFormat,
};
use super::v4l2_controls::{self as v4l2, ControlInfo, ControlType, MenuItem};
use super::{CaptureDevice, ControlChannel, DeviceProvider};
use crate::constants::capture::DEQUEUE_TIMEOUT;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

struct SimState {
    name: String,
    formats: Vec<CameraFormat>,
    controls: Vec<(ControlInfo, i32)>,
    plugged: bool,
    stalled: bool,
    read_failures: u32,
    coerce_to: Option<CameraFormat>,
    frame_interval: Option<Duration>,
    opens: u32,
}

/// A simulated camera; clones share the same device state
#[derive(Clone)]
pub struct SimulatedCamera {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new("Simulated Camera")
    }
}

fn integer(id: u32, name: &str, min: i32, max: i32, step: i32, default: i32) -> ControlInfo {
    ControlInfo {
        id,
        name: name.to_string(),
        ctrl_type: ControlType::Integer,
        minimum: min,
        maximum: max,
        step,
        default_value: default,
        flags: 0,
        menu_items: Vec::new(),
    }
}

fn boolean(id: u32, name: &str, default: bool) -> ControlInfo {
    ControlInfo {
        id,
        name: name.to_string(),
        ctrl_type: ControlType::Boolean,
        minimum: 0,
        maximum: 1,
        step: 1,
        default_value: default as i32,
        flags: 0,
        menu_items: Vec::new(),
    }
}

fn menu(id: u32, name: &str, items: Vec<MenuItem>, default: i32) -> ControlInfo {
    ControlInfo {
        id,
        name: name.to_string(),
        ctrl_type: ControlType::Menu,
        minimum: items.first().map(|i| i.index).unwrap_or(0),
        maximum: items.last().map(|i| i.index).unwrap_or(0),
        step: 1,
        default_value: default,
        flags: 0,
        menu_items: items,
    }
}

impl SimulatedCamera {
    /// An empty camera with no formats or controls
    pub fn new(name: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                name: name.to_string(),
                formats: Vec::new(),
                controls: Vec::new(),
                plugged: true,
                stalled: false,
                read_failures: 0,
                coerce_to: None,
                frame_interval: None,
                opens: 0,
            })),
        }
    }

    /// A typical USB webcam: YUYV up to 720p, MJPEG up to 1080p
    pub fn uvc_webcam() -> Self {
        let fps = Framerate::from_int;
        Self::new("Simulated UVC Webcam")
            .with_format(CameraFormat::new(PixelFormat::Yuyv, 640, 480, fps(30)))
            .with_format(CameraFormat::new(PixelFormat::Yuyv, 640, 480, fps(15)))
            .with_format(CameraFormat::new(PixelFormat::Yuyv, 1280, 720, fps(10)))
            .with_format(CameraFormat::new(PixelFormat::Mjpeg, 640, 480, fps(30)))
            .with_format(CameraFormat::new(PixelFormat::Mjpeg, 1280, 720, fps(30)))
            .with_format(CameraFormat::new(PixelFormat::Mjpeg, 1920, 1080, fps(30)))
            .with_control(integer(v4l2::V4L2_CID_BRIGHTNESS, "Brightness", -64, 64, 1, 0))
            .with_control(integer(v4l2::V4L2_CID_CONTRAST, "Contrast", 0, 100, 5, 50))
            .with_control(integer(v4l2::V4L2_CID_SATURATION, "Saturation", 0, 128, 1, 64))
            .with_control(boolean(
                v4l2::V4L2_CID_AUTO_WHITE_BALANCE,
                "White Balance, Automatic",
                true,
            ))
            .with_control(integer(v4l2::V4L2_CID_GAIN, "Gain", 0, 100, 5, 0))
            .with_control(menu(
                v4l2::V4L2_CID_POWER_LINE_FREQUENCY,
                "Power Line Frequency",
                vec![
                    MenuItem::new(0, "Disabled"),
                    MenuItem::new(1, "50 Hz"),
                    MenuItem::new(2, "60 Hz"),
                ],
                1,
            ))
            .with_control(menu(
                v4l2::V4L2_CID_EXPOSURE_AUTO,
                "Auto Exposure",
                vec![
                    MenuItem::new(1, "Manual Mode"),
                    MenuItem::new(3, "Aperture Priority Mode"),
                ],
                v4l2::V4L2_EXPOSURE_APERTURE_PRIORITY,
            ))
            .with_control(integer(
                v4l2::V4L2_CID_EXPOSURE_ABSOLUTE,
                "Exposure Time, Absolute",
                3,
                2047,
                1,
                156,
            ))
    }

    /// Advertise an additional format (enumeration order is insertion order)
    pub fn with_format(self, format: CameraFormat) -> Self {
        self.lock().formats.push(format);
        self
    }

    /// Add a control, starting at its default value
    pub fn with_control(self, info: ControlInfo) -> Self {
        {
            let mut state = self.lock();
            let value = info.default_value;
            state.controls.push((info, value));
            sync_exposure_flags(&mut state.controls);
        }
        self
    }

    /// Fixed delay between frames instead of the negotiated frame rate
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        self.lock().frame_interval = Some(interval);
        self
    }

    /// Make `set_format` apply `format` regardless of the request
    pub fn coerce_format(&self, format: CameraFormat) {
        self.lock().coerce_to = Some(format);
    }

    /// Simulate the cable being pulled
    pub fn unplug(&self) {
        debug!("Simulated camera unplugged");
        self.lock().plugged = false;
    }

    pub fn replug(&self) {
        debug!("Simulated camera plugged back in");
        self.lock().plugged = true;
    }

    /// Fail the next `count` dequeues with an I/O error
    pub fn fail_next_reads(&self, count: u32) {
        self.lock().read_failures = count;
    }

    /// While stalled, dequeue times out without delivering frames
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// How many times the device has been opened
    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    /// Current value of a control as the "hardware" sees it
    pub fn control_value(&self, id: u32) -> Option<i32> {
        self.lock()
            .controls
            .iter()
            .find(|(info, _)| info.id == id)
            .map(|(_, value)| *value)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_device(&self, path: &str) -> BackendResult<SimulatedDevice> {
        let mut state = self.lock();
        if !state.plugged {
            return Err(BackendError::NotFound(format!("{} is not connected", path)));
        }
        state.opens += 1;
        let current = state.formats.first().copied();
        drop(state);

        Ok(SimulatedDevice {
            camera: self.clone(),
            path: path.to_string(),
            current,
            streaming: false,
            frame_index: 0,
            mjpeg_cache: None,
        })
    }
}

/// UVC drivers mark exposure inactive while auto exposure is engaged
fn sync_exposure_flags(controls: &mut [(ControlInfo, i32)]) {
    let auto = controls
        .iter()
        .find(|(info, _)| info.id == v4l2::V4L2_CID_EXPOSURE_AUTO)
        .map(|(_, value)| {
            *value == v4l2::V4L2_EXPOSURE_AUTO || *value == v4l2::V4L2_EXPOSURE_APERTURE_PRIORITY
        });
    let Some(auto) = auto else { return };

    for (info, _) in controls.iter_mut() {
        if info.id == v4l2::V4L2_CID_EXPOSURE_ABSOLUTE {
            if auto {
                info.flags |= v4l2::V4L2_CTRL_FLAG_INACTIVE;
            } else {
                info.flags &= !v4l2::V4L2_CTRL_FLAG_INACTIVE;
            }
        }
    }
}

struct SimulatedDevice {
    camera: SimulatedCamera,
    path: String,
    current: Option<CameraFormat>,
    streaming: bool,
    frame_index: u32,
    mjpeg_cache: Option<(CameraFormat, u32, Vec<u8>)>,
}

impl SimulatedDevice {
    fn check_plugged(&self) -> BackendResult<()> {
        if self.camera.lock().plugged {
            Ok(())
        } else {
            Err(BackendError::Disconnected(self.path.clone()))
        }
    }
}

impl CaptureDevice for SimulatedDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn enumerate_formats(&self) -> BackendResult<Vec<CameraFormat>> {
        self.check_plugged()?;
        Ok(self.camera.lock().formats.clone())
    }

    fn set_format(&mut self, format: &CameraFormat) -> BackendResult<CameraFormat> {
        self.check_plugged()?;
        if self.streaming {
            return Err(BackendError::Denied("device is streaming".to_string()));
        }
        let state = self.camera.lock();
        let applied = match state.coerce_to {
            Some(coerced) => coerced,
            None if state.formats.iter().any(|f| f.same_mode(format)) => *format,
            None => {
                return Err(BackendError::Rejected(format!("{} not supported", format)));
            }
        };
        drop(state);
        self.current = Some(applied);
        self.mjpeg_cache = None;
        Ok(applied)
    }

    fn control_channel(&self) -> Arc<dyn ControlChannel> {
        Arc::new(SimulatedControls {
            camera: self.camera.clone(),
        })
    }

    fn start_stream(&mut self) -> BackendResult<()> {
        self.check_plugged()?;
        if self.current.is_none() {
            return Err(BackendError::Rejected("no format set".to_string()));
        }
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> BackendResult<()> {
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn dequeue(&mut self, buffer: &mut Vec<u8>) -> BackendResult<FrameInfo> {
        let (plugged, stalled, fail, interval) = {
            let mut state = self.camera.lock();
            let fail = state.read_failures > 0;
            if fail {
                state.read_failures -= 1;
            }
            (state.plugged, state.stalled, fail, state.frame_interval)
        };

        if !plugged {
            return Err(BackendError::Disconnected(self.path.clone()));
        }
        if !self.streaming {
            return Err(BackendError::Rejected("stream is off".to_string()));
        }
        if fail {
            return Err(BackendError::Io("injected read failure".to_string()));
        }

        let format = self
            .current
            .ok_or_else(|| BackendError::Rejected("no format set".to_string()))?;

        let interval = interval.unwrap_or_else(|| {
            Duration::from_secs_f64(1.0 / format.framerate.as_f64().max(1.0))
        });
        if stalled || interval > DEQUEUE_TIMEOUT {
            std::thread::sleep(DEQUEUE_TIMEOUT);
            return Err(BackendError::Timeout);
        }
        std::thread::sleep(interval);

        let index = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);

        buffer.clear();
        if format.pixel_format == PixelFormat::Mjpeg {
            // Encoding every frame is slow; the pattern only moves every 8 frames
            let bucket = index / 8;
            let fresh = match &self.mjpeg_cache {
                Some((f, b, _)) => !(f.same_mode(&format) && *b == bucket),
                None => true,
            };
            if fresh {
                let jpeg = encode_mjpeg(&format, bucket * 8)?;
                self.mjpeg_cache = Some((format, bucket, jpeg));
            }
            if let Some((_, _, jpeg)) = &self.mjpeg_cache {
                buffer.extend_from_slice(jpeg);
            }
        } else {
            fill_pattern(buffer, &format, index);
        }

        Ok(FrameInfo {
            bytes_used: buffer.len(),
            device_sequence: index,
        })
    }
}

/// Diagonal gradient that scrolls with `index`
fn fill_pattern(buffer: &mut Vec<u8>, format: &CameraFormat, index: u32) {
    let (w, h) = (format.width as usize, format.height as usize);
    let shift = index as usize;
    let luma = |x: usize, y: usize| ((x + y + shift) & 0xff) as u8;

    match format.pixel_format {
        PixelFormat::Yuyv => {
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    buffer.extend_from_slice(&[luma(x, y), 128, luma(x + 1, y), 128]);
                }
            }
        }
        PixelFormat::Uyvy => {
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    buffer.extend_from_slice(&[128, luma(x, y), 128, luma(x + 1, y)]);
                }
            }
        }
        PixelFormat::Nv12 => {
            for y in 0..h {
                for x in 0..w {
                    buffer.push(luma(x, y));
                }
            }
            buffer.resize(w * h + w * h / 2, 128);
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            for y in 0..h {
                for x in 0..w {
                    buffer.extend_from_slice(&[luma(x, y), (y & 0xff) as u8, (shift & 0xff) as u8]);
                }
            }
        }
        PixelFormat::Gray8 => {
            for y in 0..h {
                for x in 0..w {
                    buffer.push(luma(x, y));
                }
            }
        }
        PixelFormat::Gray16 => {
            for y in 0..h {
                for x in 0..w {
                    let value = (((x + y) * 256 + shift) & 0xffff) as u16;
                    buffer.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        PixelFormat::Mjpeg | PixelFormat::Other(_) => {
            buffer.resize(w * h * 2, (shift & 0xff) as u8);
        }
    }
}

fn encode_mjpeg(format: &CameraFormat, index: u32) -> BackendResult<Vec<u8>> {
    use image::ImageEncoder;
    use image::codecs::jpeg::JpegEncoder;

    let rgb = CameraFormat {
        pixel_format: PixelFormat::Rgb24,
        ..*format
    };
    let mut raw = Vec::with_capacity(format.pixel_count() as usize * 3);
    fill_pattern(&mut raw, &rgb, index);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 80)
        .write_image(&raw, format.width, format.height, image::ExtendedColorType::Rgb8)
        .map_err(|e| BackendError::Io(format!("test pattern encode failed: {}", e)))?;
    Ok(jpeg)
}

struct SimulatedControls {
    camera: SimulatedCamera,
}

impl ControlChannel for SimulatedControls {
    fn enumerate(&self) -> BackendResult<Vec<ControlInfo>> {
        let state = self.camera.lock();
        if !state.plugged {
            return Err(BackendError::Disconnected(state.name.clone()));
        }
        Ok(state.controls.iter().map(|(info, _)| info.clone()).collect())
    }

    fn get(&self, id: u32) -> BackendResult<i32> {
        let state = self.camera.lock();
        if !state.plugged {
            return Err(BackendError::Disconnected(state.name.clone()));
        }
        state
            .controls
            .iter()
            .find(|(info, _)| info.id == id)
            .map(|(_, value)| *value)
            .ok_or_else(|| BackendError::Rejected(format!("no control {:#010x}", id)))
    }

    fn set(&self, id: u32, value: i32) -> BackendResult<i32> {
        let mut state = self.camera.lock();
        if !state.plugged {
            return Err(BackendError::Disconnected(state.name.clone()));
        }
        let (info, current) = state
            .controls
            .iter_mut()
            .find(|(info, _)| info.id == id)
            .ok_or_else(|| BackendError::Rejected(format!("no control {:#010x}", id)))?;

        if info.is_read_only() || info.is_inactive() {
            return Err(BackendError::Denied(format!("{} is not writable", info.name)));
        }
        if value < info.minimum || value > info.maximum {
            return Err(BackendError::Rejected(format!(
                "{} outside {}..={}",
                value, info.minimum, info.maximum
            )));
        }
        *current = value;
        sync_exposure_flags(&mut state.controls);
        Ok(value)
    }
}

/// Provider serving simulated cameras by path
#[derive(Clone, Default)]
pub struct SimulatedProvider {
    cameras: Arc<Mutex<BTreeMap<String, SimulatedCamera>>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `camera` under `path`
    pub fn with_camera(self, path: &str, camera: SimulatedCamera) -> Self {
        self.insert(path, camera);
        self
    }

    pub fn insert(&self, path: &str, camera: SimulatedCamera) {
        self.cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), camera);
    }
}

impl DeviceProvider for SimulatedProvider {
    fn open(&self, path: &str) -> BackendResult<Box<dyn CaptureDevice>> {
        let camera = self
            .cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
        Ok(Box::new(camera.open_device(path)?))
    }

    fn list_devices(&self) -> Vec<DeviceInfo> {
        self.cameras
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, camera)| DeviceInfo {
                card: camera.lock().name.clone(),
                driver: "simulated".to_string(),
                path: path.clone(),
                real_path: path.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_sizes_match_layout() {
        for pf in [
            PixelFormat::Yuyv,
            PixelFormat::Nv12,
            PixelFormat::Rgb24,
            PixelFormat::Gray8,
            PixelFormat::Gray16,
        ] {
            let format = CameraFormat::new(pf, 16, 8, Framerate::from_int(30));
            let mut buffer = Vec::new();
            fill_pattern(&mut buffer, &format, 3);
            assert_eq!(Some(buffer.len()), pf.frame_size(16, 8), "{}", pf);
        }
    }

    #[test]
    fn test_auto_exposure_marks_exposure_inactive() {
        let camera = SimulatedCamera::uvc_webcam();
        let provider = SimulatedProvider::new().with_camera("sim://flags", camera.clone());
        let device = provider.open("sim://flags").unwrap();
        let channel = device.control_channel();

        let exposure = |channel: &Arc<dyn ControlChannel>| {
            channel
                .enumerate()
                .unwrap()
                .into_iter()
                .find(|c| c.id == v4l2::V4L2_CID_EXPOSURE_ABSOLUTE)
                .unwrap()
        };
        assert!(exposure(&channel).is_inactive());

        channel
            .set(v4l2::V4L2_CID_EXPOSURE_AUTO, v4l2::V4L2_EXPOSURE_MANUAL)
            .unwrap();
        assert!(!exposure(&channel).is_inactive());
        assert_eq!(camera.control_value(v4l2::V4L2_CID_EXPOSURE_AUTO), Some(1));
    }

    #[test]
    fn test_unplugged_dequeue_is_disconnect() {
        let camera = SimulatedCamera::uvc_webcam().with_frame_interval(Duration::from_millis(1));
        let provider = SimulatedProvider::new().with_camera("sim://dq", camera.clone());
        let mut device = provider.open("sim://dq").unwrap();
        device.start_stream().unwrap();

        let mut buffer = Vec::new();
        let info = device.dequeue(&mut buffer).unwrap();
        assert_eq!(info.bytes_used, 640 * 480 * 2);

        camera.unplug();
        assert!(matches!(
            device.dequeue(&mut buffer),
            Err(BackendError::Disconnected(_))
        ));
    }
}
