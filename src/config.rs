// SPDX-License-Identifier: GPL-3.0-only

//! Persistent settings
//!
//! Stored as JSON at `<config dir>/usbcam/config.json`. Fields missing from
//! the file take their defaults, so older files keep loading.

use crate::backends::camera::{FormatRequest, PixelFormat};
use crate::constants::export::DEFAULT_BURST_COUNT;
use crate::constants::naming::DEFAULT_PREFIX;
use crate::constants::{APP_DIR_NAME, DEFAULT_DEVICE, JpegQuality, NamingRule};
use crate::errors::{CameraError, CameraResult};
use crate::pipelines::photo::ExportTarget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";

/// Camera format settings
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Framerate
    pub framerate: Option<u32>,
    /// Pixel format (e.g., "YUYV", "MJPG", "Y16")
    pub pixel_format: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: Some(30),
            pixel_format: "YUYV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture device node
    pub device_path: String,
    /// Requested capture format
    pub format: FormatSettings,
    /// Where exports are written
    pub output_dir: PathBuf,
    /// Prepended to every exported file name
    pub filename_prefix: String,
    /// Timestamp or sequential names
    pub naming_rule: NamingRule,
    /// Target format for snapshots and bursts
    pub export_format: ExportTarget,
    /// JPEG quality preset
    pub jpeg_quality: JpegQuality,
    /// Frames per burst
    pub burst_count: u32,
    /// Write a `_params.csv` control snapshot next to each image
    pub write_parameters: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE.to_string(),
            format: FormatSettings::default(),
            output_dir: Self::default_output_dir(),
            filename_prefix: DEFAULT_PREFIX.to_string(),
            naming_rule: NamingRule::default(),
            export_format: ExportTarget::default(),
            jpeg_quality: JpegQuality::default(),
            burst_count: DEFAULT_BURST_COUNT,
            write_parameters: false,
        }
    }
}

impl Config {
    /// `<pictures>/usbcam`, or `./usbcam` without a pictures directory
    pub fn default_output_dir() -> PathBuf {
        dirs::picture_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
    }

    /// Location of the config file, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> CameraResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    ///
    /// # Errors
    /// * `Config` - The file exists but cannot be read or parsed
    pub fn load_from(path: &Path) -> CameraResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(CameraError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let config: Config = serde_json::from_str(&text).map_err(|e| {
            CameraError::Config(format!("{} is malformed: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> CameraResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| CameraError::Config("no config directory".to_string()))?;
        self.save_to(&path)
    }

    /// Write pretty-printed JSON to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> CameraResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CameraError::write_failed(parent, &e))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| CameraError::write_failed(path, &e))?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// The capture request described by [`format`](Self::format)
    pub fn format_request(&self) -> CameraResult<FormatRequest> {
        let pixel_format = PixelFormat::parse(&self.format.pixel_format).ok_or_else(|| {
            CameraError::Config(format!(
                "invalid pixel format '{}'",
                self.format.pixel_format
            ))
        })?;
        Ok(FormatRequest::new(
            pixel_format,
            self.format.width,
            self.format.height,
            self.format.framerate.unwrap_or(30),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_request_parses_fourcc() {
        let mut config = Config::default();
        config.format.pixel_format = "mjpg".to_string();
        let request = config.format_request().unwrap();
        assert_eq!(request.pixel_format, PixelFormat::Mjpeg);
        assert_eq!(request.width, 640);

        config.format.pixel_format = "TOOLONG".to_string();
        assert!(matches!(config.format_request(), Err(CameraError::Config(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"burst_count": 9}"#).unwrap();
        assert_eq!(config.burst_count, 9);
        assert_eq!(config.device_path, DEFAULT_DEVICE);
        assert_eq!(config.naming_rule, NamingRule::Timestamp);
    }
}
