// SPDX-License-Identifier: GPL-3.0-only

//! Device handle: ownership, negotiation and lifecycle of one capture device
//!
//! At most one [`DeviceHandle`] owns a device path in the process. The lease
//! is keyed by the canonical path, so `/dev/v4l/by-id/...` and the
//! `/dev/videoN` it points to count as the same device.

use super::negotiation::negotiate;
use super::types::{BackendError, BackendResult, CameraFormat, FormatRequest, FrameInfo};
use super::v4l2_utils::canonical_device_path;
use super::{CaptureDevice, ControlChannel, DeviceProvider};
use crate::errors::{CameraError, CameraResult};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tracing::{debug, info, warn};

static LEASES: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a device path, released on drop
#[derive(Debug)]
struct DeviceLease {
    key: String,
}

impl DeviceLease {
    fn acquire(path: &str) -> CameraResult<Self> {
        let key = canonical_device_path(path);
        let mut leases = LEASES.lock().unwrap_or_else(PoisonError::into_inner);
        if !leases.insert(key.clone()) {
            return Err(CameraError::DeviceBusy(path.to_string()));
        }
        debug!(path, key = %key, "Acquired device lease");
        Ok(Self { key })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        LEASES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        debug!(key = %self.key, "Released device lease");
    }
}

/// An open capture device together with its negotiated format
pub struct DeviceHandle {
    provider: Arc<dyn DeviceProvider>,
    path: String,
    device: Option<Box<dyn CaptureDevice>>,
    lease: Option<DeviceLease>,
    negotiated: CameraFormat,
    supported: Vec<CameraFormat>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("negotiated", &self.negotiated)
            .finish()
    }
}

/// Negotiate against what `device` advertises and apply the result
///
/// The format the device reports back must itself be advertised.
fn apply_negotiated(
    device: &mut dyn CaptureDevice,
    request: &FormatRequest,
) -> CameraResult<(CameraFormat, Vec<CameraFormat>)> {
    let path = device.path().to_string();
    let supported = device
        .enumerate_formats()
        .map_err(|e| CameraError::from_backend(&path, e))?;
    let chosen = negotiate(&supported, request)?;

    let applied = device
        .set_format(&chosen)
        .map_err(|e| CameraError::from_backend(&path, e))?;

    if !supported.iter().any(|f| f.same_mode(&applied)) {
        warn!(path = %path, chosen = %chosen, applied = %applied, "Device applied an unadvertised format");
        return Err(CameraError::UnsupportedFormat(format!(
            "device applied {} which it does not advertise",
            applied
        )));
    }

    Ok((applied, supported))
}

impl DeviceHandle {
    /// Open `path` and negotiate the advertised format closest to `request`
    ///
    /// # Errors
    /// * `DeviceBusy` - Another handle in this process owns the device
    /// * `DeviceUnavailable` - The device cannot be opened
    /// * `UnsupportedFormat` - Nothing acceptable could be negotiated
    pub fn open(
        provider: Arc<dyn DeviceProvider>,
        path: &str,
        request: &FormatRequest,
    ) -> CameraResult<Self> {
        let lease = DeviceLease::acquire(path)?;

        let mut device = provider
            .open(path)
            .map_err(|e| CameraError::from_backend(path, e))?;
        let (negotiated, supported) = apply_negotiated(device.as_mut(), request)?;

        info!(path, format = %negotiated, "Opened capture device");

        Ok(Self {
            provider,
            path: path.to_string(),
            device: Some(device),
            lease: Some(lease),
            negotiated,
            supported,
        })
    }

    /// Device path this handle was opened with
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The format the device is actually running
    pub fn negotiated(&self) -> CameraFormat {
        self.negotiated
    }

    /// Every format the device advertised at the last negotiation
    pub fn supported_formats(&self) -> &[CameraFormat] {
        &self.supported
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Release the device and the exclusivity lease; safe to call twice
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            if device.is_streaming()
                && let Err(e) = device.stop_stream()
            {
                debug!(path = %self.path, error = %e, "Stream stop failed during close");
            }
            info!(path = %self.path, "Closed capture device");
        }
        self.lease = None;
    }

    /// Close and reopen with the last known good format
    ///
    /// # Errors
    /// * `DeviceUnavailable` - The device disappeared
    /// * `DeviceBusy` - Someone else grabbed the path in between
    pub fn reset(&mut self) -> CameraResult<()> {
        info!(path = %self.path, "Resetting capture device");
        self.close();

        let lease = DeviceLease::acquire(&self.path)?;
        let mut device = self
            .provider
            .open(&self.path)
            .map_err(|e| CameraError::from_backend(&self.path, e))?;
        let (negotiated, supported) =
            apply_negotiated(device.as_mut(), &FormatRequest::exact(&self.negotiated))?;

        if !negotiated.same_mode(&self.negotiated) {
            warn!(
                path = %self.path,
                previous = %self.negotiated,
                now = %negotiated,
                "Device came back with a different format"
            );
        }

        self.device = Some(device);
        self.lease = Some(lease);
        self.negotiated = negotiated;
        self.supported = supported;
        Ok(())
    }

    /// Negotiate a new format on an open, idle handle
    ///
    /// Controls may change with the format; prefer
    /// [`ControlRegistry::renegotiate`](super::ControlRegistry::renegotiate),
    /// which reloads the descriptors as well.
    pub fn renegotiate(&mut self, request: &FormatRequest) -> CameraResult<CameraFormat> {
        let previous = self.negotiated;
        let path = self.path.clone();
        let device = self.device_mut()?;
        if device.is_streaming() {
            return Err(CameraError::InvalidState(
                "cannot change format while streaming".to_string(),
            ));
        }

        match apply_negotiated(device.as_mut(), request) {
            Ok((negotiated, supported)) => {
                info!(path = %path, format = %negotiated, "Renegotiated format");
                self.negotiated = negotiated;
                self.supported = supported;
                Ok(negotiated)
            }
            Err(e) => {
                // Put the device back into the mode we still report
                if let Err(restore) = device.set_format(&previous) {
                    warn!(path = %path, error = %restore, "Failed to restore previous format");
                }
                Err(e)
            }
        }
    }

    /// Control access for [`ControlRegistry`](super::ControlRegistry)
    pub fn control_channel(&self) -> CameraResult<Arc<dyn ControlChannel>> {
        self.device
            .as_ref()
            .map(|d| d.control_channel())
            .ok_or_else(|| self.closed_error())
    }

    pub(crate) fn start_stream(&mut self) -> CameraResult<()> {
        let path = self.path.clone();
        self.device_mut()?
            .start_stream()
            .map_err(|e| CameraError::from_backend(&path, e))
    }

    pub(crate) fn stop_stream(&mut self) -> CameraResult<()> {
        let path = self.path.clone();
        match self.device.as_mut() {
            Some(device) => device
                .stop_stream()
                .map_err(|e| CameraError::from_backend(&path, e)),
            None => Ok(()),
        }
    }

    pub(crate) fn dequeue(&mut self, buffer: &mut Vec<u8>) -> BackendResult<FrameInfo> {
        match self.device.as_mut() {
            Some(device) => device.dequeue(buffer),
            None => Err(BackendError::Disconnected("device is closed".to_string())),
        }
    }

    fn device_mut(&mut self) -> CameraResult<&mut Box<dyn CaptureDevice>> {
        let path = &self.path;
        self.device.as_mut().ok_or_else(|| CameraError::DeviceUnavailable {
            path: path.clone(),
            reason: "device is closed".to_string(),
        })
    }

    fn closed_error(&self) -> CameraError {
        CameraError::DeviceUnavailable {
            path: self.path.clone(),
            reason: "device is closed".to_string(),
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}
