// SPDX-License-Identifier: GPL-3.0-only

//! Photo export pipeline
//!
//! ```text
//! Sink → Decode → Encode → Temp file → Rename into place
//!                              ↓
//!                    <stem>_params.csv (optional)
//! ```
//!
//! Writes are atomic: an export lands under its final name only once it is
//! complete, so an interrupted burst never leaves a truncated image behind.

pub mod burst;
pub mod capture;
pub mod encoding;

pub use burst::{BurstReport, FrameSource};
pub use capture::PhotoCapture;
pub use encoding::{ExportTarget, PhotoEncoder, supported_targets};

use crate::backends::camera::CameraFrame;
use crate::config::Config;
use crate::constants::export::TEMP_PREFIX;
use crate::constants::{JpegQuality, NamingRule};
use crate::errors::{CameraError, CameraResult};
use crate::storage::{self, NamingScheme};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Single snapshot or part of a burst
///
/// Burst exports name every file from the first frame's timestamp, so a
/// burst reads as one run of counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingMode {
    #[default]
    Single,
    Burst,
}

/// What to export and where
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub target: ExportTarget,
    pub output_dir: PathBuf,
    pub mode: NamingMode,
    pub burst_count: u32,
    /// Permit conversions that discard sample precision
    pub allow_lossy: bool,
    /// Write a parameter sidecar when `parameters` is set
    pub write_parameters: bool,
    /// Control snapshot as (identifier, value)
    pub parameters: Option<Vec<(String, i32)>>,
}

impl ExportRequest {
    pub fn single(target: ExportTarget, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            output_dir: output_dir.into(),
            mode: NamingMode::Single,
            burst_count: 1,
            allow_lossy: false,
            write_parameters: false,
            parameters: None,
        }
    }

    pub fn burst(target: ExportTarget, output_dir: impl Into<PathBuf>, count: u32) -> Self {
        Self {
            mode: NamingMode::Burst,
            burst_count: count,
            ..Self::single(target, output_dir)
        }
    }

    pub fn allow_lossy(mut self, allow: bool) -> Self {
        self.allow_lossy = allow;
        self
    }

    /// Attach a control snapshot to be written next to each image
    pub fn with_parameters(mut self, parameters: Vec<(String, i32)>) -> Self {
        self.write_parameters = true;
        self.parameters = Some(parameters);
        self
    }
}

/// Converts frames and writes them under collision-free names
pub struct FrameExporter {
    encoder: PhotoEncoder,
    naming: Mutex<NamingScheme>,
    /// Directories whose existing names have been scanned
    resumed: Mutex<HashSet<PathBuf>>,
}

impl FrameExporter {
    pub fn new(prefix: &str, rule: NamingRule) -> Self {
        Self {
            encoder: PhotoEncoder::default(),
            naming: Mutex::new(NamingScheme::new(prefix, rule)),
            resumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.filename_prefix, config.naming_rule).with_jpeg_quality(config.jpeg_quality)
    }

    pub fn with_jpeg_quality(mut self, quality: JpegQuality) -> Self {
        self.encoder.set_quality(quality);
        self
    }

    /// Targets available for frames in `pixel_format`
    pub fn supported_targets(
        pixel_format: crate::backends::camera::PixelFormat,
        allow_lossy: bool,
    ) -> Vec<ExportTarget> {
        supported_targets(pixel_format, allow_lossy)
    }

    /// Restart naming (the next timestamp name has no counter)
    pub fn reset_naming(&self) {
        self.naming.lock().unwrap_or_else(PoisonError::into_inner).reset();
        self.resumed.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Convert `frame` and write it into `request.output_dir`
    ///
    /// # Errors
    /// * `UnsupportedConversion` - The frame cannot become `request.target`
    /// * `WriteFailed` - The directory or file could not be written
    /// * `InvalidState` - The naming rule is [`NamingRule::Manual`]; use
    ///   [`export_to`](Self::export_to)
    pub fn export_one(&self, frame: &CameraFrame, request: &ExportRequest) -> CameraResult<PathBuf> {
        self.export_named(frame, request, frame.timestamp.naive_local())
    }

    /// Convert `frame` and write it to exactly `path`
    ///
    /// An extension naming a known target picks the target; any other path
    /// gets `request.target`'s extension appended. An existing file at the
    /// final path is replaced.
    pub fn export_to(
        &self,
        frame: &CameraFrame,
        path: &Path,
        request: &ExportRequest,
    ) -> CameraResult<PathBuf> {
        let named_target = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ExportTarget::parse);
        let (target, path) = match named_target {
            Some(target) => (target, path.to_path_buf()),
            None => {
                let mut name = path.as_os_str().to_owned();
                name.push(".");
                name.push(request.target.extension());
                (request.target, PathBuf::from(name))
            }
        };

        let data = self.encoder.encode(frame, target, request.allow_lossy)?;
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| CameraError::write_failed(dir, &e))?;
        }
        self.write_export(&path, &data, frame, request)?;
        Ok(path)
    }

    /// [`export_one`](Self::export_one) with names derived from `name_time`
    /// rather than the frame's own timestamp
    pub(crate) fn export_named(
        &self,
        frame: &CameraFrame,
        request: &ExportRequest,
        name_time: NaiveDateTime,
    ) -> CameraResult<PathBuf> {
        let data = self.encoder.encode(frame, request.target, request.allow_lossy)?;

        let dir = &request.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| CameraError::write_failed(dir, &e))?;
        let path = self.reserve_path(dir, name_time, request.target)?;

        self.write_export(&path, &data, frame, request)?;
        Ok(path)
    }

    fn write_export(
        &self,
        path: &Path,
        data: &[u8],
        frame: &CameraFrame,
        request: &ExportRequest,
    ) -> CameraResult<()> {
        write_atomic(path, data)?;

        if request.write_parameters
            && let Some(parameters) = &request.parameters
        {
            let sidecar = storage::sidecar_path(path);
            let mut text = String::new();
            for (identifier, value) in parameters {
                text.push_str(&format!("{},{}\n", identifier, value));
            }
            write_atomic(&sidecar, text.as_bytes())?;
            debug!(path = %sidecar.display(), "Wrote parameter file");
        }

        info!(
            path = %path.display(),
            sequence = frame.sequence,
            mode = ?request.mode,
            "Frame exported"
        );
        Ok(())
    }

    /// [`export_one`](Self::export_one) on tokio's blocking pool
    pub async fn export_one_async(
        self: Arc<Self>,
        frame: Arc<CameraFrame>,
        request: ExportRequest,
    ) -> CameraResult<PathBuf> {
        let dir = request.output_dir.clone();
        tokio::task::spawn_blocking(move || self.export_one(&frame, &request))
            .await
            .map_err(|e| CameraError::WriteFailed {
                path: dir,
                reason: format!("export task failed: {}", e),
            })?
    }

    /// Pick the next unused name in `dir`
    fn reserve_path(
        &self,
        dir: &Path,
        name_time: NaiveDateTime,
        target: ExportTarget,
    ) -> CameraResult<PathBuf> {
        let mut naming = self.naming.lock().unwrap_or_else(PoisonError::into_inner);

        let first_use = self
            .resumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dir.to_path_buf());
        if first_use {
            naming.resume_from_dir(dir, name_time.date())?;
        }

        loop {
            let path = dir.join(naming.next(name_time, target.extension())?);
            if !path.exists() {
                return Ok(path);
            }
            warn!(path = %path.display(), "Name already taken, skipping");
        }
    }
}

/// Write to a hidden temporary file next to `path`, then rename it into place
fn write_atomic(path: &Path, data: &[u8]) -> CameraResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!("{}{}.tmp", TEMP_PREFIX, file_name));

    let result = std::fs::File::create(&temp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&temp, path));

    if let Err(e) = result {
        if let Err(cleanup) = std::fs::remove_file(&temp)
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            debug!(path = %temp.display(), error = %cleanup, "Failed to remove temporary file");
        }
        return Err(CameraError::write_failed(path, &e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::PixelFormat;

    fn gray_frame(sequence: u64) -> CameraFrame {
        CameraFrame::from_bytes(PixelFormat::Gray8, 2, 2, vec![1, 2, 3, 4], sequence)
    }

    #[test]
    fn test_export_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("out");
        let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);

        let path = exporter
            .export_one(&gray_frame(0), &ExportRequest::single(ExportTarget::Pgm, &dir))
            .unwrap();
        assert!(path.starts_with(&dir));
        assert!(path.exists());
    }

    #[test]
    fn test_no_temporary_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
        for i in 0..3 {
            exporter
                .export_one(&gray_frame(i), &ExportRequest::single(ExportTarget::Png, dir.path()))
                .unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| !n.starts_with(TEMP_PREFIX)));
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);

        let err = exporter
            .export_one(&gray_frame(0), &ExportRequest::single(ExportTarget::Pgm, blocker.join("sub")))
            .unwrap_err();
        assert!(matches!(err, CameraError::WriteFailed { .. }));
    }
}
