// SPDX-License-Identifier: GPL-3.0-only

//! Control registry
//!
//! Enumerates a device's controls once, caches their values and validates
//! every write before it reaches the driver. Writes are never clamped: a
//! value outside the advertised range or off the step grid is rejected.
//!
//! The V4L2 auto-exposure control is treated as a master: while it is in an
//! automatic mode, exposure time, exposure, gain, analogue gain and ISO are
//! locked and writes to them fail with `ControlNotWritable`.
//!
//! # Locking
//!
//! Each descriptor sits behind its own mutex, held across the device write,
//! so there is one writer per control at a time. The `auto_exposure` gate is
//! taken for writing by the master and for reading by its dependents, which
//! orders dependent writes against mode changes. The gate is always taken
//! before a descriptor mutex.

use super::ControlChannel;
use super::handle::DeviceHandle;
use super::types::{BackendError, CameraFormat, FormatRequest};
use super::v4l2_controls::{
    self as v4l2, ControlInfo, ControlType, MenuItem, V4L2_EXPOSURE_APERTURE_PRIORITY,
    V4L2_EXPOSURE_AUTO, V4L2_EXPOSURE_MANUAL, V4L2_EXPOSURE_SHUTTER_PRIORITY,
};
use crate::errors::{CameraError, CameraResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Controls whose value is driven by auto exposure
pub const AUTO_EXPOSURE_DEPENDENTS: [u32; 5] = [
    v4l2::V4L2_CID_EXPOSURE_ABSOLUTE,
    v4l2::V4L2_CID_EXPOSURE,
    v4l2::V4L2_CID_GAIN,
    v4l2::V4L2_CID_ANALOGUE_GAIN,
    v4l2::V4L2_CID_ISO_SENSITIVITY,
];

/// V4L2 exposure auto modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExposureMode {
    /// Automatic exposure time and iris
    Auto,
    /// Manual exposure control (user sets exposure time)
    Manual,
    /// Shutter priority (user sets exposure time, camera adjusts aperture)
    ShutterPriority,
    /// Aperture priority (user sets aperture, camera adjusts exposure time)
    AperturePriority,
}

impl ExposureMode {
    /// Convert from V4L2 exposure auto value
    pub fn from_v4l2_value(value: i32) -> Option<Self> {
        match value {
            V4L2_EXPOSURE_AUTO => Some(ExposureMode::Auto),
            V4L2_EXPOSURE_MANUAL => Some(ExposureMode::Manual),
            V4L2_EXPOSURE_SHUTTER_PRIORITY => Some(ExposureMode::ShutterPriority),
            V4L2_EXPOSURE_APERTURE_PRIORITY => Some(ExposureMode::AperturePriority),
            _ => None,
        }
    }

    /// Whether the camera picks the exposure time in this mode
    pub fn is_automatic(self) -> bool {
        matches!(self, ExposureMode::Auto | ExposureMode::AperturePriority)
    }
}

/// What kind of value a control takes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlKind {
    Boolean,
    Integer,
    /// Only the listed item indices are valid values
    Menu { items: Vec<MenuItem> },
}

/// A control as the registry sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlDescriptor {
    pub id: u32,
    /// snake_case name derived from the label, e.g. `exposure_time_absolute`
    pub identifier: String,
    /// Driver-provided name, e.g. "Exposure Time, Absolute"
    pub label: String,
    pub kind: ControlKind,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default: i32,
    /// Last value written or read back from the device
    pub value: i32,
    pub read_only: bool,
    /// Driver reports the control as inactive under the current mode
    pub inactive: bool,
    /// Held by an automatic exposure mode
    pub locked: bool,
}

impl ControlDescriptor {
    fn from_info(info: &ControlInfo, value: i32) -> Option<Self> {
        let kind = match info.ctrl_type {
            ControlType::Boolean => ControlKind::Boolean,
            ControlType::Integer => ControlKind::Integer,
            ControlType::Menu | ControlType::IntegerMenu => ControlKind::Menu {
                items: info.menu_items.clone(),
            },
            ControlType::Button | ControlType::Class | ControlType::Unknown(_) => return None,
        };

        Some(Self {
            id: info.id,
            identifier: identifier_for(&info.name),
            label: info.name.clone(),
            kind,
            minimum: info.minimum,
            maximum: info.maximum,
            step: info.step,
            default: info.default_value,
            value,
            read_only: info.is_read_only(),
            inactive: info.is_inactive(),
            locked: false,
        })
    }

    pub fn is_writable(&self) -> bool {
        !self.read_only && !self.inactive && !self.locked
    }

    /// Check `value` against kind, range and step
    ///
    /// Returns the reason on failure. A step of zero is treated as one.
    pub fn validate(&self, value: i32) -> Result<(), String> {
        match &self.kind {
            ControlKind::Boolean => {
                if value == 0 || value == 1 {
                    Ok(())
                } else {
                    Err("boolean controls take 0 or 1".to_string())
                }
            }
            ControlKind::Menu { items } => {
                if items.iter().any(|item| item.index == value) {
                    Ok(())
                } else {
                    let valid: Vec<String> = items.iter().map(|i| i.index.to_string()).collect();
                    Err(format!("not a menu item (valid: {})", valid.join(", ")))
                }
            }
            ControlKind::Integer => {
                if value < self.minimum || value > self.maximum {
                    return Err(format!("outside {}..={}", self.minimum, self.maximum));
                }
                let step = self.step.max(1) as i64;
                if (value as i64 - self.minimum as i64) % step != 0 {
                    return Err(format!(
                        "not on step {} from minimum {}",
                        step, self.minimum
                    ));
                }
                Ok(())
            }
        }
    }

    /// Why the control cannot be written, if it cannot
    fn not_writable_reason(&self) -> Option<&'static str> {
        if self.read_only {
            Some("read-only")
        } else if self.locked {
            Some("locked while auto exposure is active")
        } else if self.inactive {
            Some("inactive in the current mode")
        } else {
            None
        }
    }

    /// Label of the current menu item, if this is a menu
    pub fn menu_label(&self) -> Option<&str> {
        match &self.kind {
            ControlKind::Menu { items } => items
                .iter()
                .find(|item| item.index == self.value)
                .map(|item| item.name.as_str()),
            _ => None,
        }
    }
}

/// Build a snake_case identifier from a driver label
///
/// Runs of non-alphanumeric characters collapse into one underscore.
pub fn identifier_for(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Whether a master control value means auto exposure is engaged
fn auto_exposure_engaged(kind: &ControlKind, value: i32) -> bool {
    match kind {
        ControlKind::Boolean => value != 0,
        _ => ExposureMode::from_v4l2_value(value).is_some_and(ExposureMode::is_automatic),
    }
}

fn is_dependent(id: u32) -> bool {
    AUTO_EXPOSURE_DEPENDENTS.contains(&id)
}

type Entry = Arc<Mutex<ControlDescriptor>>;

/// Validated access to a device's controls
pub struct ControlRegistry {
    channel: Arc<dyn ControlChannel>,
    device: String,
    controls: RwLock<BTreeMap<u32, Entry>>,
    auto_exposure: RwLock<bool>,
}

impl std::fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRegistry")
            .field("device", &self.device)
            .field("controls", &self.len())
            .finish()
    }
}

impl ControlRegistry {
    /// Enumerate every supported control on `channel`
    pub fn enumerate(channel: Arc<dyn ControlChannel>) -> CameraResult<Self> {
        let registry = Self {
            channel,
            device: "camera".to_string(),
            controls: RwLock::new(BTreeMap::new()),
            auto_exposure: RwLock::new(false),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Enumerate the controls of an open device
    pub fn for_handle(handle: &DeviceHandle) -> CameraResult<Self> {
        let mut registry = Self::enumerate(handle.control_channel()?)?;
        registry.device = handle.path().to_string();
        Ok(registry)
    }

    /// Re-enumerate, e.g. after the handle renegotiated its format
    pub fn reload(&self) -> CameraResult<()> {
        let infos = self
            .channel
            .enumerate()
            .map_err(|e| CameraError::from_backend(&self.device, e))?;

        let mut fresh = BTreeMap::new();
        let mut seen = std::collections::HashSet::new();
        for info in &infos {
            let value = match self.channel.get(info.id) {
                Ok(value) => value,
                Err(e) => {
                    debug!(control = %info.name, error = %e, "Control not readable, using default");
                    info.default_value
                }
            };
            let Some(mut descriptor) = ControlDescriptor::from_info(info, value) else {
                debug!(control = %info.name, ctrl_type = ?info.ctrl_type, "Skipping unsupported control type");
                continue;
            };
            if !seen.insert(descriptor.identifier.clone()) {
                descriptor.identifier = format!("{}_{:x}", descriptor.identifier, descriptor.id);
            }
            fresh.insert(info.id, Arc::new(Mutex::new(descriptor)));
        }

        let mut gate = self.auto_exposure.write().unwrap_or_else(PoisonError::into_inner);
        *gate = fresh
            .get(&v4l2::V4L2_CID_EXPOSURE_AUTO)
            .map(|entry| {
                let d = entry.lock().unwrap_or_else(PoisonError::into_inner);
                auto_exposure_engaged(&d.kind, d.value)
            })
            .unwrap_or(false);
        apply_locks(&fresh, *gate);

        info!(device = %self.device, count = fresh.len(), auto_exposure = *gate, "Enumerated controls");
        *self.controls.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }

    /// Renegotiate `handle` and re-enumerate, since ranges, defaults and
    /// availability can change with the format
    ///
    /// On a negotiation failure the handle keeps its previous format and the
    /// descriptors are left untouched.
    pub fn renegotiate(
        &self,
        handle: &mut DeviceHandle,
        request: &FormatRequest,
    ) -> CameraResult<CameraFormat> {
        let format = handle.renegotiate(request)?;
        self.reload()?;
        Ok(format)
    }

    pub fn len(&self) -> usize {
        self.controls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: u32) -> CameraResult<Entry> {
        self.controls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CameraError::UnknownControl(format!("{:#010x}", id)))
    }

    /// Copies of all descriptors, ordered by control id
    pub fn descriptors(&self) -> Vec<ControlDescriptor> {
        self.controls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    pub fn descriptor(&self, id: u32) -> CameraResult<ControlDescriptor> {
        let entry = self.entry(id)?;
        let descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(descriptor)
    }

    /// Look up a control by identifier, label (case-insensitive) or numeric id
    pub fn find(&self, name: &str) -> CameraResult<ControlDescriptor> {
        let wanted = name.trim();
        let numeric = wanted
            .strip_prefix("0x")
            .map(|hex| u32::from_str_radix(hex, 16).ok())
            .unwrap_or_else(|| wanted.parse::<u32>().ok());

        self.descriptors()
            .into_iter()
            .find(|d| {
                d.identifier == wanted
                    || d.label.eq_ignore_ascii_case(wanted)
                    || numeric == Some(d.id)
            })
            .ok_or_else(|| CameraError::UnknownControl(name.to_string()))
    }

    /// Cached value, no device round trip
    pub fn get(&self, id: u32) -> CameraResult<i32> {
        Ok(self.descriptor(id)?.value)
    }

    /// Whether auto exposure currently locks its dependents
    pub fn auto_exposure_active(&self) -> bool {
        *self.auto_exposure.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and write `value`, returning the device's read-back value
    ///
    /// # Errors
    /// * `UnknownControl` - No such control
    /// * `ControlNotWritable` - Read-only, inactive or locked by auto exposure
    /// * `InvalidControlValue` - Wrong kind, out of range or off step
    pub fn set(&self, id: u32, value: i32) -> CameraResult<i32> {
        if id == v4l2::V4L2_CID_EXPOSURE_AUTO {
            let mut gate = self.auto_exposure.write().unwrap_or_else(PoisonError::into_inner);
            let entry = self.entry(id)?;
            let (applied, engaged) = {
                let mut descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner);
                let applied = self.write_locked(&mut descriptor, value)?;
                (applied, auto_exposure_engaged(&descriptor.kind, applied))
            };

            if engaged != *gate {
                info!(engaged, "Auto exposure changed");
            }
            *gate = engaged;
            self.refresh_dependents(engaged);
            return Ok(applied);
        }

        let _gate = if is_dependent(id) {
            Some(self.auto_exposure.read().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        let entry = self.entry(id)?;
        let mut descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_locked(&mut descriptor, value)
    }

    fn write_locked(&self, descriptor: &mut ControlDescriptor, value: i32) -> CameraResult<i32> {
        if let Some(reason) = descriptor.not_writable_reason() {
            debug!(control = %descriptor.identifier, value, reason, "Rejected write to control");
            return Err(CameraError::ControlNotWritable {
                control: descriptor.identifier.clone(),
                reason: reason.to_string(),
            });
        }

        if let Err(reason) = descriptor.validate(value) {
            debug!(control = %descriptor.identifier, value, reason = %reason, "Invalid control value");
            return Err(CameraError::InvalidControlValue {
                control: descriptor.identifier.clone(),
                value,
                reason,
            });
        }

        let applied = self
            .channel
            .set(descriptor.id, value)
            .map_err(|e| self.map_write_error(descriptor, value, e))?;

        if applied != value {
            warn!(control = %descriptor.identifier, requested = value, applied, "Driver adjusted control value");
        }
        debug!(control = %descriptor.identifier, value = applied, "Control set");
        descriptor.value = applied;
        Ok(applied)
    }

    fn map_write_error(&self, descriptor: &ControlDescriptor, value: i32, err: BackendError) -> CameraError {
        warn!(control = %descriptor.identifier, value, error = %err, "Device refused control write");
        match err {
            BackendError::Rejected(reason) => CameraError::InvalidControlValue {
                control: descriptor.identifier.clone(),
                value,
                reason,
            },
            BackendError::Denied(reason) => CameraError::ControlNotWritable {
                control: descriptor.identifier.clone(),
                reason,
            },
            other => CameraError::from_backend(&self.device, other),
        }
    }

    /// Update lock state and re-read flags and values after a mode change
    ///
    /// Caller holds the `auto_exposure` write gate.
    fn refresh_dependents(&self, engaged: bool) {
        let controls = self.controls.read().unwrap_or_else(PoisonError::into_inner);
        apply_locks(&controls, engaged);

        // Drivers toggle the inactive flag along with the mode
        let flags: BTreeMap<u32, u32> = match self.channel.enumerate() {
            Ok(infos) => infos.into_iter().map(|i| (i.id, i.flags)).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to re-read control flags");
                BTreeMap::new()
            }
        };

        for id in AUTO_EXPOSURE_DEPENDENTS {
            let Some(entry) = controls.get(&id) else { continue };
            let mut descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(flags) = flags.get(&id) {
                descriptor.inactive = flags & v4l2::V4L2_CTRL_FLAG_INACTIVE != 0;
                descriptor.read_only = flags & v4l2::V4L2_CTRL_FLAG_READ_ONLY != 0;
            }
            // Values drift while auto exposure runs; pick up where it left them
            match self.channel.get(id) {
                Ok(value) => descriptor.value = value,
                Err(e) => debug!(control = %descriptor.identifier, error = %e, "Failed to refresh dependent"),
            }
        }
    }

    /// Re-read one control from the device
    ///
    /// Refreshing the auto-exposure master also re-derives the lock state of
    /// its dependents, so a mode switched outside this registry is honored.
    pub fn refresh(&self, id: u32) -> CameraResult<i32> {
        if id == v4l2::V4L2_CID_EXPOSURE_AUTO {
            let mut gate = self.auto_exposure.write().unwrap_or_else(PoisonError::into_inner);
            let entry = self.entry(id)?;
            let (value, engaged) = {
                let mut descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner);
                let value = self
                    .channel
                    .get(id)
                    .map_err(|e| CameraError::from_backend(&self.device, e))?;
                descriptor.value = value;
                (value, auto_exposure_engaged(&descriptor.kind, value))
            };

            if engaged != *gate {
                info!(engaged, "Auto exposure changed outside the registry");
            }
            *gate = engaged;
            self.refresh_dependents(engaged);
            return Ok(value);
        }

        let entry = self.entry(id)?;
        let mut descriptor = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let value = self
            .channel
            .get(id)
            .map_err(|e| CameraError::from_backend(&self.device, e))?;
        descriptor.value = value;
        Ok(value)
    }

    /// Re-read every control from the device
    pub fn refresh_all(&self) -> CameraResult<()> {
        let ids: Vec<u32> = self
            .controls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.refresh(id)?;
        }
        Ok(())
    }

    /// Write every writable control's default value
    ///
    /// The auto-exposure master goes first so its dependents are only
    /// written when the default mode leaves them unlocked. Returns the
    /// controls that failed; the rest were applied.
    pub fn reset_to_defaults(&self) -> Vec<(String, CameraError)> {
        let mut failures = Vec::new();

        let descriptors = self.descriptors();
        let (master, others): (Vec<_>, Vec<_>) = descriptors
            .into_iter()
            .partition(|d| d.id == v4l2::V4L2_CID_EXPOSURE_AUTO);

        for descriptor in master {
            if let Err(e) = self.set(descriptor.id, descriptor.default) {
                failures.push((descriptor.identifier, e));
            }
        }

        for descriptor in others {
            if descriptor.read_only || descriptor.inactive {
                continue;
            }
            if is_dependent(descriptor.id) && self.auto_exposure_active() {
                debug!(control = %descriptor.identifier, "Left to auto exposure");
                continue;
            }
            if let Err(e) = self.set(descriptor.id, descriptor.default) {
                failures.push((descriptor.identifier, e));
            }
        }

        info!(device = %self.device, failed = failures.len(), "Reset controls to defaults");
        failures
    }

    /// Ordered (identifier, value) pairs of every control
    pub fn snapshot(&self) -> Vec<(String, i32)> {
        self.descriptors()
            .into_iter()
            .map(|d| (d.identifier, d.value))
            .collect()
    }
}

fn apply_locks(controls: &BTreeMap<u32, Entry>, engaged: bool) {
    for id in AUTO_EXPOSURE_DEPENDENTS {
        if let Some(entry) = controls.get(&id) {
            entry.lock().unwrap_or_else(PoisonError::into_inner).locked = engaged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer(min: i32, max: i32, step: i32) -> ControlDescriptor {
        ControlDescriptor {
            id: 1,
            identifier: "x".into(),
            label: "X".into(),
            kind: ControlKind::Integer,
            minimum: min,
            maximum: max,
            step,
            default: min,
            value: min,
            read_only: false,
            inactive: false,
            locked: false,
        }
    }

    #[test]
    fn test_identifier_for() {
        assert_eq!(identifier_for("Exposure Time, Absolute"), "exposure_time_absolute");
        assert_eq!(identifier_for("White Balance, Automatic"), "white_balance_automatic");
        assert_eq!(identifier_for("  Gain "), "gain");
    }

    #[test]
    fn test_validate_step_and_range() {
        let d = integer(0, 100, 5);
        assert!(d.validate(55).is_ok());
        assert!(d.validate(57).is_err());
        assert!(d.validate(105).is_err());
        assert!(d.validate(-5).is_err());

        // Offsets are measured from the minimum, not zero
        let d = integer(3, 2047, 2);
        assert!(d.validate(5).is_ok());
        assert!(d.validate(4).is_err());

        // Zero step behaves like one
        let d = integer(-10, 10, 0);
        assert!(d.validate(7).is_ok());
    }

    #[test]
    fn test_validate_menu_and_boolean() {
        let mut d = integer(1, 3, 1);
        d.kind = ControlKind::Menu {
            items: vec![MenuItem::new(1, "Manual Mode"), MenuItem::new(3, "Aperture Priority Mode")],
        };
        assert!(d.validate(3).is_ok());
        assert!(d.validate(2).is_err());

        d.kind = ControlKind::Boolean;
        assert!(d.validate(1).is_ok());
        assert!(d.validate(2).is_err());
    }

    #[test]
    fn test_auto_exposure_modes() {
        let menu = ControlKind::Menu { items: Vec::new() };
        assert!(auto_exposure_engaged(&menu, V4L2_EXPOSURE_AUTO));
        assert!(auto_exposure_engaged(&menu, V4L2_EXPOSURE_APERTURE_PRIORITY));
        assert!(!auto_exposure_engaged(&menu, V4L2_EXPOSURE_MANUAL));
        assert!(!auto_exposure_engaged(&menu, V4L2_EXPOSURE_SHUTTER_PRIORITY));
        assert!(auto_exposure_engaged(&ControlKind::Boolean, 1));
    }
}
