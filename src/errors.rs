// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture pipeline
//!
//! [`CameraError`] is what every public operation returns. Backends report
//! the narrower [`BackendError`](crate::backends::camera::BackendError),
//! which is mapped into a `CameraError` at the handle, registry and loop
//! boundaries so callers only ever match on one taxonomy.

use crate::backends::camera::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Errors surfaced to the application shell
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// The device path cannot be opened, or the device disappeared
    #[error("Device {path} is unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// Another handle in this process already owns the device
    #[error("Device {0} is already open")]
    DeviceBusy(String),

    /// No acceptable format could be negotiated
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Value rejected by range, step or kind validation
    #[error("Invalid value {value} for control '{control}': {reason}")]
    InvalidControlValue {
        control: String,
        value: i32,
        reason: String,
    },

    /// Control is read-only, inactive, or locked by auto exposure
    #[error("Control '{control}' is not writable: {reason}")]
    ControlNotWritable { control: String, reason: String },

    /// No control with this id or name exists on the device
    #[error("Unknown control: {0}")]
    UnknownControl(String),

    /// Frame acquisition failed
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Operation not valid in the current capture loop state
    #[error("Invalid capture state: {0}")]
    InvalidState(String),

    /// Source pixel format cannot produce the requested target
    #[error("Cannot convert {from} to {target}: {reason}")]
    UnsupportedConversion {
        from: String,
        target: String,
        reason: String,
    },

    /// Filesystem error while writing an export
    #[error("Failed to write {}: {reason}", .path.display())]
    WriteFailed { path: PathBuf, reason: String },

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CameraError {
    /// Map a backend failure that happened while talking to `path`
    pub fn from_backend(path: &str, err: BackendError) -> Self {
        match err {
            BackendError::NotFound(reason)
            | BackendError::Disconnected(reason)
            | BackendError::Io(reason) => CameraError::DeviceUnavailable {
                path: path.to_string(),
                reason,
            },
            BackendError::Timeout => CameraError::DeviceUnavailable {
                path: path.to_string(),
                reason: "timed out".to_string(),
            },
            BackendError::Unsupported(reason) => CameraError::UnsupportedFormat(reason),
            BackendError::Rejected(reason) => CameraError::CaptureFailed(reason),
            BackendError::Denied(reason) => CameraError::DeviceUnavailable {
                path: path.to_string(),
                reason,
            },
        }
    }

    /// Build a `WriteFailed` from an I/O error
    pub fn write_failed(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        CameraError::WriteFailed {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// True for errors that mean the device is gone rather than misused
    pub fn is_device_loss(&self) -> bool {
        matches!(self, CameraError::DeviceUnavailable { .. })
    }
}

impl From<serde_json::Error> for CameraError {
    fn from(err: serde_json::Error) -> Self {
        CameraError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mapping() {
        let err = CameraError::from_backend("/dev/video9", BackendError::NotFound("gone".into()));
        assert!(err.is_device_loss());
        assert_eq!(
            err.to_string(),
            "Device /dev/video9 is unavailable: gone"
        );

        let err = CameraError::from_backend("/dev/video0", BackendError::Unsupported("Y10B".into()));
        assert!(matches!(err, CameraError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_write_failed_display() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CameraError::write_failed("/tmp/x.png", &io);
        assert_eq!(err.to_string(), "Failed to write /tmp/x.png: denied");
    }
}
