// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera control interface
//!
//! Raw `VIDIOC_*CTRL` ioctls for enumerating, reading and writing controls.
//! Every call opens its own file descriptor on the device node, so control
//! traffic never interferes with the streaming descriptor owned by the
//! capture thread.
//!
//! Inspired by [cameractrls](https://github.com/soyersoyer/cameractrls).

use super::ControlChannel;
use super::types::{BackendError, BackendResult};
use serde::Serialize;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CTRL_CLASS_IMAGE_SOURCE: u32 = 0x009e0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;
const V4L2_CID_IMAGE_SOURCE_CLASS_BASE: u32 = V4L2_CTRL_CLASS_IMAGE_SOURCE | 0x900;

// ===== V4L2 Control IDs (User Class) =====

pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
pub const V4L2_CID_SATURATION: u32 = V4L2_CID_BASE + 2;
pub const V4L2_CID_HUE: u32 = V4L2_CID_BASE + 3;
/// Automatic white balance
pub const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
/// Sensor exposure in driver-specific units (sensor drivers)
pub const V4L2_CID_EXPOSURE: u32 = V4L2_CID_BASE + 17;
/// Automatic gain control
pub const V4L2_CID_AUTOGAIN: u32 = V4L2_CID_BASE + 18;
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;
/// Power line frequency filter (menu)
pub const V4L2_CID_POWER_LINE_FREQUENCY: u32 = V4L2_CID_BASE + 24;
/// White balance temperature in Kelvin
pub const V4L2_CID_WHITE_BALANCE_TEMPERATURE: u32 = V4L2_CID_BASE + 26;
pub const V4L2_CID_SHARPNESS: u32 = V4L2_CID_BASE + 27;
pub const V4L2_CID_BACKLIGHT_COMPENSATION: u32 = V4L2_CID_BASE + 28;

// ===== V4L2 Control IDs (Camera Class) =====

/// Exposure mode: Auto, Manual, Shutter Priority, Aperture Priority
pub const V4L2_CID_EXPOSURE_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 1;
/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;
/// Allow frame rate variation during auto exposure
pub const V4L2_CID_EXPOSURE_AUTO_PRIORITY: u32 = V4L2_CID_CAMERA_CLASS_BASE + 3;
pub const V4L2_CID_FOCUS_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 10;
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// ISO sensitivity value
pub const V4L2_CID_ISO_SENSITIVITY: u32 = V4L2_CID_CAMERA_CLASS_BASE + 23;

// ===== V4L2 Control IDs (Image Source Class) =====

pub const V4L2_CID_ANALOGUE_GAIN: u32 = V4L2_CID_IMAGE_SOURCE_CLASS_BASE + 3;

// ===== V4L2 Exposure Auto Menu Values =====

/// Automatic exposure time and iris
pub const V4L2_EXPOSURE_AUTO: i32 = 0;
/// Manual exposure time and iris
pub const V4L2_EXPOSURE_MANUAL: i32 = 1;
/// Manual exposure time, auto iris (shutter priority)
pub const V4L2_EXPOSURE_SHUTTER_PRIORITY: i32 = 2;
/// Auto exposure time, manual iris (aperture priority)
pub const V4L2_EXPOSURE_APERTURE_PRIORITY: i32 = 3;

// ===== V4L2 Control Types =====
const V4L2_CTRL_TYPE_INTEGER: u32 = 1;
const V4L2_CTRL_TYPE_BOOLEAN: u32 = 2;
const V4L2_CTRL_TYPE_MENU: u32 = 3;
const V4L2_CTRL_TYPE_BUTTON: u32 = 4;
const V4L2_CTRL_TYPE_CTRL_CLASS: u32 = 6;
const V4L2_CTRL_TYPE_INTEGER_MENU: u32 = 9;

// ===== V4L2 Control Flags =====
pub const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;
pub const V4L2_CTRL_FLAG_READ_ONLY: u32 = 0x0004;
pub const V4L2_CTRL_FLAG_INACTIVE: u32 = 0x0010;
const V4L2_CTRL_FLAG_NEXT_CTRL: u32 = 0x8000_0000;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr
// where dir: 2=READ, 1=WRITE, 3=READ|WRITE

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
/// Query menu item (v4l2_querymenu: 44 bytes)
const VIDIOC_QUERYMENU: libc::c_ulong = 0xC02C5625;

// ===== V4L2 ioctl Structures =====

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// `name` is a union with an `i64 value` for integer menus
#[repr(C)]
#[repr(packed)]
struct V4l2Querymenu {
    id: u32,
    index: u32,
    name: [u8; 32],
    reserved: u32,
}

// ===== Public Types =====

/// Information about a V4L2 control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub ctrl_type: ControlType,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
    /// Advertised entries for menu and integer-menu controls
    pub menu_items: Vec<MenuItem>,
}

/// V4L2 control type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Integer,
    Boolean,
    Menu,
    IntegerMenu,
    Button,
    Class,
    Unknown(u32),
}

impl From<u32> for ControlType {
    fn from(value: u32) -> Self {
        match value {
            V4L2_CTRL_TYPE_INTEGER => ControlType::Integer,
            V4L2_CTRL_TYPE_BOOLEAN => ControlType::Boolean,
            V4L2_CTRL_TYPE_MENU => ControlType::Menu,
            V4L2_CTRL_TYPE_INTEGER_MENU => ControlType::IntegerMenu,
            V4L2_CTRL_TYPE_BUTTON => ControlType::Button,
            V4L2_CTRL_TYPE_CTRL_CLASS => ControlType::Class,
            other => ControlType::Unknown(other),
        }
    }
}

impl ControlInfo {
    /// Check if control is disabled
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    /// Check if control is permanently read-only
    pub fn is_read_only(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_READ_ONLY != 0
    }

    /// Check if control is inactive (value cannot be changed)
    pub fn is_inactive(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_INACTIVE != 0
    }
}

/// Menu item for menu-type controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub index: i32,
    pub name: String,
}

impl MenuItem {
    pub fn new(index: i32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

// ===== Helper Functions =====

/// Extract a null-terminated string from a fixed-size byte array
fn extract_name(bytes: &[u8; 32]) -> String {
    let name_len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..name_len]).to_string()
}

fn open_device(device_path: &str) -> BackendResult<File> {
    File::options()
        .read(true)
        .write(true)
        .open(device_path)
        .map_err(|e| BackendError::from_io(&e))
}

fn raw_query(file: &File, id: u32) -> std::io::Result<V4l2Queryctrl> {
    let mut qctrl = V4l2Queryctrl {
        id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_QUERYCTRL,
            &mut qctrl as *mut V4l2Queryctrl,
        )
    };

    if result < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(qctrl)
}

fn info_from_raw(file: &File, qctrl: &V4l2Queryctrl) -> ControlInfo {
    let ctrl_type = ControlType::from(qctrl.ctrl_type);
    let menu_items = match ctrl_type {
        ControlType::Menu | ControlType::IntegerMenu => {
            raw_menu_items(file, qctrl.id, qctrl.minimum, qctrl.maximum, ctrl_type)
        }
        _ => Vec::new(),
    };

    ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        ctrl_type,
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
        menu_items,
    }
}

fn raw_menu_items(
    file: &File,
    control_id: u32,
    min_index: i32,
    max_index: i32,
    ctrl_type: ControlType,
) -> Vec<MenuItem> {
    let mut items = Vec::new();

    for index in min_index.max(0)..=max_index {
        let mut qmenu = V4l2Querymenu {
            id: control_id,
            index: index as u32,
            name: [0; 32],
            reserved: 0,
        };

        let result = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                VIDIOC_QUERYMENU,
                &mut qmenu as *mut V4l2Querymenu,
            )
        };

        // Drivers leave holes in sparse menus; skipped indices are not advertised
        if result < 0 {
            continue;
        }

        let name_bytes = qmenu.name;
        let name = if ctrl_type == ControlType::IntegerMenu {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&name_bytes[..8]);
            i64::from_ne_bytes(raw).to_string()
        } else {
            extract_name(&name_bytes)
        };

        items.push(MenuItem { index, name });
    }

    items
}

// ===== Public Functions =====

/// Query if a control exists and get its information
pub fn query_control(device_path: &str, control_id: u32) -> Option<ControlInfo> {
    let file = open_device(device_path).ok()?;
    let qctrl = raw_query(&file, control_id).ok()?;
    Some(info_from_raw(&file, &qctrl))
}

/// Walk every control with `V4L2_CTRL_FLAG_NEXT_CTRL`
///
/// Disabled controls and class headers are left out.
pub fn enumerate_controls(device_path: &str) -> BackendResult<Vec<ControlInfo>> {
    let file = open_device(device_path)?;
    let mut controls = Vec::new();
    let mut next_id = V4L2_CTRL_FLAG_NEXT_CTRL;

    loop {
        let qctrl = match raw_query(&file, next_id) {
            Ok(q) => q,
            // EINVAL marks the end of the list
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => break,
            Err(e) => return Err(BackendError::from_io(&e)),
        };
        next_id = qctrl.id | V4L2_CTRL_FLAG_NEXT_CTRL;

        let info = info_from_raw(&file, &qctrl);
        if info.is_disabled() || info.ctrl_type == ControlType::Class {
            continue;
        }
        debug!(
            device_path,
            id = format!("{:#010x}", info.id),
            name = %info.name,
            ctrl_type = ?info.ctrl_type,
            "Found V4L2 control"
        );
        controls.push(info);
    }

    Ok(controls)
}

/// Get current value of a control
pub fn get_control(device_path: &str, control_id: u32) -> BackendResult<i32> {
    let file = open_device(device_path)?;

    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };

    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_G_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        debug!(device_path, control_id, ?errno, "Failed to get V4L2 control");
        return Err(BackendError::from_io(&errno));
    }

    Ok(ctrl.value)
}

/// Set value of a control, returning the value the driver settled on
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> BackendResult<i32> {
    let file = open_device(device_path)?;

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(
            device_path,
            control_id,
            value,
            ?errno,
            "Failed to set V4L2 control"
        );
        return Err(BackendError::from_io(&errno));
    }

    // Some drivers only report adjustments on a fresh read
    let actual = get_control(device_path, control_id).unwrap_or(ctrl.value);
    if actual != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual,
            "V4L2 control value was adjusted by driver"
        );
    }

    Ok(actual)
}

/// Query all menu items for a menu-type control
pub fn query_menu_items(device_path: &str, control_id: u32, max_index: i32) -> Vec<MenuItem> {
    match open_device(device_path) {
        Ok(file) => raw_menu_items(&file, control_id, 0, max_index, ControlType::Menu),
        Err(_) => Vec::new(),
    }
}

/// Check if a control is available on the device
pub fn has_control(device_path: &str, control_id: u32) -> bool {
    query_control(device_path, control_id)
        .map(|info| !info.is_disabled())
        .unwrap_or(false)
}

/// [`ControlChannel`] over a V4L2 device node
#[derive(Debug, Clone)]
pub struct V4l2ControlChannel {
    device_path: String,
}

impl V4l2ControlChannel {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl ControlChannel for V4l2ControlChannel {
    fn enumerate(&self) -> BackendResult<Vec<ControlInfo>> {
        enumerate_controls(&self.device_path)
    }

    fn get(&self, id: u32) -> BackendResult<i32> {
        get_control(&self.device_path, id)
    }

    fn set(&self, id: u32, value: i32) -> BackendResult<i32> {
        set_control(&self.device_path, id, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_id_values() {
        assert_eq!(V4L2_CID_EXPOSURE_AUTO, 0x009a0901);
        assert_eq!(V4L2_CID_EXPOSURE_ABSOLUTE, 0x009a0902);
        assert_eq!(V4L2_CID_ISO_SENSITIVITY, 0x009a0917);
        assert_eq!(V4L2_CID_EXPOSURE, 0x00980911);
        assert_eq!(V4L2_CID_GAIN, 0x00980913);
        assert_eq!(V4L2_CID_ANALOGUE_GAIN, 0x009e0903);
    }

    #[test]
    fn test_control_type_conversion() {
        assert_eq!(ControlType::from(1), ControlType::Integer);
        assert_eq!(ControlType::from(2), ControlType::Boolean);
        assert_eq!(ControlType::from(3), ControlType::Menu);
        assert_eq!(ControlType::from(9), ControlType::IntegerMenu);
        assert_eq!(ControlType::from(99), ControlType::Unknown(99));
    }

    #[test]
    fn test_flags() {
        let info = ControlInfo {
            id: V4L2_CID_GAIN,
            name: "Gain".into(),
            ctrl_type: ControlType::Integer,
            minimum: 0,
            maximum: 255,
            step: 1,
            default_value: 32,
            flags: V4L2_CTRL_FLAG_READ_ONLY | V4L2_CTRL_FLAG_INACTIVE,
            menu_items: Vec::new(),
        };
        assert!(info.is_read_only());
        assert!(info.is_inactive());
        assert!(!info.is_disabled());
    }

    #[test]
    fn test_missing_device_is_not_found() {
        let err = get_control("/dev/nonexistent-video-node", V4L2_CID_GAIN).unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }
}
