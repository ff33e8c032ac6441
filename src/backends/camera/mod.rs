// SPDX-License-Identifier: GPL-3.0-only

//! Camera device access and the capture pipeline core
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │   Shell (GUI / CLI)      │
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐      ┌──────────────────┐
//! │ CaptureLoop + sinks      │ ───▶ │ FrameExporter    │
//! └────────────┬─────────────┘      └──────────────────┘
//!              │ owns
//!              ▼
//! ┌──────────────────────────┐      ┌──────────────────┐
//! │ DeviceHandle             │ ───▶ │ ControlRegistry  │
//! └────────────┬─────────────┘      └────────┬─────────┘
//!              │                             │
//!              ▼                             ▼
//! ┌──────────────────────────┐      ┌──────────────────┐
//! │ CaptureDevice trait      │      │ ControlChannel   │
//! └────────────┬─────────────┘      └────────┬─────────┘
//!              └──────────┬──────────────────┘
//!                  ┌──────┴──────┐
//!                  │ V4L2 │ Sim  │  ← concrete implementations
//!                  └─────────────┘
//! ```

pub mod buffer_pool;
pub mod controls;
pub mod format_converters;
pub mod frame_loop;
pub mod handle;
pub mod negotiation;
pub mod simulated;
pub mod sink;
pub mod types;
pub mod v4l2_controls;
pub mod v4l2_device;
pub mod v4l2_utils;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use controls::{ControlDescriptor, ControlKind, ControlRegistry, ExposureMode};
pub use frame_loop::{CaptureLoop, CaptureStats, LoopState};
pub use handle::DeviceHandle;
pub use simulated::{SimulatedCamera, SimulatedProvider};
pub use sink::{RecvError, SinkReceiver};
pub use types::*;
pub use v4l2_controls::{ControlInfo, ControlType, MenuItem};
pub use v4l2_device::V4l2Provider;

use std::sync::Arc;

/// Opens capture devices by path
///
/// One provider exists per device family (real V4L2 nodes, simulated
/// cameras). [`DeviceHandle::open`] goes through a provider so the same
/// negotiation and lease logic serves both.
pub trait DeviceProvider: Send + Sync {
    /// Open the device node at `path`
    ///
    /// # Returns
    /// * `Ok(device)` - Device opened, not yet streaming
    /// * `Err(BackendError::NotFound)` - No such device
    fn open(&self, path: &str) -> BackendResult<Box<dyn CaptureDevice>>;

    /// Enumerate devices this provider can open
    fn list_devices(&self) -> Vec<DeviceInfo>;
}

/// An open video capture device
///
/// Implementations are driven from one thread at a time: the thread that
/// opened the handle, then the capture thread once a loop takes ownership.
pub trait CaptureDevice: Send {
    /// Device path this device was opened from
    fn path(&self) -> &str;

    /// Every (fourcc, size, rate) combination the device advertises,
    /// in the device's enumeration order
    fn enumerate_formats(&self) -> BackendResult<Vec<CameraFormat>>;

    /// Ask the device to apply `format`
    ///
    /// Drivers are allowed to adjust the request. The returned format is what
    /// the device actually applied.
    fn set_format(&mut self, format: &CameraFormat) -> BackendResult<CameraFormat>;

    /// Control access that stays valid while the device is open
    fn control_channel(&self) -> Arc<dyn ControlChannel>;

    /// Start streaming (queue buffers, STREAMON)
    fn start_stream(&mut self) -> BackendResult<()>;

    /// Stop streaming (STREAMOFF); a no-op when not streaming
    fn stop_stream(&mut self) -> BackendResult<()>;

    fn is_streaming(&self) -> bool;

    /// Wait for the next frame and copy its payload into `buffer`
    ///
    /// Blocks for at most the device read timeout.
    ///
    /// # Returns
    /// * `Ok(info)` - `buffer` holds `info.bytes_used` bytes of frame data
    /// * `Err(BackendError::Timeout)` - No frame within the timeout
    /// * `Err(BackendError::Disconnected)` - Device is gone
    fn dequeue(&mut self, buffer: &mut Vec<u8>) -> BackendResult<FrameInfo>;
}

/// Control get/set surface of a device
///
/// Shared between the registry and anything else that needs to touch
/// controls, so it must be usable from several threads.
pub trait ControlChannel: Send + Sync {
    /// Describe every control the device exposes, menu items included
    fn enumerate(&self) -> BackendResult<Vec<ControlInfo>>;

    /// Read the current value from the device
    fn get(&self, id: u32) -> BackendResult<i32>;

    /// Write `value` and return the value the device reports afterwards
    fn set(&self, id: u32, value: i32) -> BackendResult<i32>;
}
