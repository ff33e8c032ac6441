// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default device node when none is configured
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Config directory name under `dirs::config_dir()`
pub const APP_DIR_NAME: &str = "usbcam";

/// Negotiated width and height must each be within this factor of the request
pub const RESOLUTION_TOLERANCE: u32 = 2;

/// JPEG quality presets
///
/// Users choose between file size and fidelity; the preset maps to the
/// encoder's 1-100 quality scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JpegQuality {
    /// Smaller files, visible artifacts
    Low,
    /// Balanced quality and file size
    Medium,
    /// High quality (default)
    #[default]
    High,
    /// Near-lossless, largest files
    Maximum,
}

impl JpegQuality {
    /// Get all preset variants for iteration
    pub const ALL: [JpegQuality; 4] = [
        JpegQuality::Low,
        JpegQuality::Medium,
        JpegQuality::High,
        JpegQuality::Maximum,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            JpegQuality::Low => "Low",
            JpegQuality::Medium => "Medium",
            JpegQuality::High => "High",
            JpegQuality::Maximum => "Maximum",
        }
    }

    /// Encoder quality value (1-100)
    pub fn value(&self) -> u8 {
        match self {
            JpegQuality::Low => 60,
            JpegQuality::Medium => 80,
            JpegQuality::High => 92,
            JpegQuality::Maximum => 98,
        }
    }
}

/// How exported files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamingRule {
    /// `{prefix}{yymmdd}_{hhmmss}[_{counter}].{ext}`
    #[default]
    Timestamp,
    /// `{prefix}{index:05}.{ext}`
    Sequential,
    /// Every save names its own file
    Manual,
}

impl NamingRule {
    pub const ALL: [NamingRule; 3] = [
        NamingRule::Timestamp,
        NamingRule::Sequential,
        NamingRule::Manual,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            NamingRule::Timestamp => "Timestamp",
            NamingRule::Sequential => "Sequential",
            NamingRule::Manual => "Manual",
        }
    }
}

/// File naming constants
pub mod naming {
    /// Width of the same-second counter suffix (`_000001`)
    pub const COUNTER_WIDTH: usize = 6;
    /// Highest counter that fits [`COUNTER_WIDTH`]
    pub const MAX_COUNTER: u32 = 999_999;
    /// Width of the sequential index (`00042`)
    pub const SEQUENCE_WIDTH: usize = 5;
    /// Highest index that fits [`SEQUENCE_WIDTH`]
    pub const MAX_SEQUENCE: u32 = 99_999;
    /// Date component format (`yymmdd`)
    pub const DATE_FORMAT: &str = "%y%m%d";
    /// Time component format (`hhmmss`)
    pub const TIME_FORMAT: &str = "%H%M%S";
    /// Suffix appended to an image stem for its parameter file
    pub const PARAMS_SUFFIX: &str = "_params";
    /// Default filename prefix
    pub const DEFAULT_PREFIX: &str = "IMG_";
}

/// Capture pipeline constants
pub mod capture {
    use super::Duration;

    /// Number of mmap buffers queued with the driver
    pub const STREAM_BUFFER_COUNT: u32 = 4;
    /// Longest a single dequeue may block before the loop checks for requests
    pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);
    /// Idle buffers kept by the frame buffer pool
    pub const POOL_CAPACITY: usize = 8;
    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;
    /// How long pause/resume wait for the capture thread to acknowledge
    pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Export constants
pub mod export {
    use super::Duration;

    /// Longest a burst waits for the next frame before giving up
    pub const BURST_FRAME_TIMEOUT: Duration = Duration::from_secs(2);
    /// Default number of frames in a burst
    pub const DEFAULT_BURST_COUNT: u32 = 5;
    /// Prefix of the temporary file an export is written to before renaming
    pub const TEMP_PREFIX: &str = ".usbcam-";
}

/// Common frame rates tried when a device reports a continuous interval range
pub const COMMON_FRAMERATES: &[u32] = &[60, 30, 25, 15, 10, 5];

/// Common resolutions offered when a device reports a stepwise size range
pub const COMMON_RESOLUTIONS: &[(u32, u32)] = &[
    (3840, 2160),
    (2592, 1944),
    (1920, 1080),
    (1280, 720),
    (1024, 768),
    (800, 600),
    (640, 480),
    (320, 240),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_values_in_range() {
        for preset in JpegQuality::ALL {
            assert!((1..=100).contains(&preset.value()));
        }
    }

    #[test]
    fn test_default_presets() {
        assert_eq!(JpegQuality::default(), JpegQuality::High);
        assert_eq!(NamingRule::default(), NamingRule::Timestamp);
    }
}
