// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 utility functions
//!
//! Capability queries and device discovery used by the V4L2 provider and by
//! the device lease table.

use super::types::DeviceInfo;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

/// Single-planar video capture capability bit
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
/// Streaming I/O capability bit
const V4L2_CAP_STREAMING: u32 = 0x0400_0000;

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

impl V4l2Capability {
    /// Per-node caps when the driver reports them, device-wide caps otherwise
    fn effective_caps(&self) -> u32 {
        if self.device_caps != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Query V4L2 capabilities for an open file descriptor.
///
/// Issues the `VIDIOC_QUERYCAP` ioctl and returns the capability struct,
/// or `None` if the ioctl fails.
fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

/// Get V4L2 driver name using ioctl
///
/// Returns None if the device cannot be opened or the ioctl fails.
pub fn get_v4l2_driver(device_path: &str) -> Option<String> {
    let file = std::fs::File::open(device_path).ok()?;
    let cap = query_v4l2_cap(file.as_raw_fd())?;
    let driver = c_string(&cap.driver);

    debug!(device_path, driver = %driver, "Got V4L2 driver name");
    Some(driver)
}

/// Canonical form of a device path, used as the exclusivity key
///
/// `/dev/v4l/by-id/...` symlinks and `/dev/videoN` resolve to the same key.
/// Paths that do not exist (simulated devices) are used verbatim.
pub fn canonical_device_path(device_path: &str) -> String {
    std::fs::canonicalize(device_path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| device_path.to_string())
}

/// Build DeviceInfo from V4L2 device path and optional card name
///
/// Resolves symlinks to get the real device path and queries the driver name.
pub fn build_device_info(v4l2_path: &str, card: Option<&str>) -> DeviceInfo {
    DeviceInfo {
        card: card.unwrap_or_default().to_string(),
        driver: get_v4l2_driver(v4l2_path).unwrap_or_default(),
        path: v4l2_path.to_string(),
        real_path: canonical_device_path(v4l2_path),
    }
}

/// Scan `/dev/video*` for nodes that can stream video capture
///
/// UVC cameras expose a second metadata node per camera; those lack the
/// capture capability and are skipped.
pub fn discover_capture_devices() -> Vec<DeviceInfo> {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if !name_str.starts_with("video") {
            continue;
        }

        let path = format!("/dev/{}", name_str);
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let cap = match query_v4l2_cap(file.as_raw_fd()) {
            Some(c) => c,
            None => continue,
        };

        let caps = cap.effective_caps();
        if caps & V4L2_CAP_VIDEO_CAPTURE == 0 || caps & V4L2_CAP_STREAMING == 0 {
            debug!(path = %path, caps = format!("{:#x}", caps), "Skipping non-capture node");
            continue;
        }

        devices.push(DeviceInfo {
            card: c_string(&cap.card),
            driver: c_string(&cap.driver),
            real_path: canonical_device_path(&path),
            path,
        });
    }

    // Natural order: video2 before video10
    devices.sort_by_key(|d| {
        d.path
            .trim_start_matches("/dev/video")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    devices
}
