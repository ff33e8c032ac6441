// SPDX-License-Identifier: GPL-3.0-only

//! Burst export
//!
//! Pulls consecutive frames from a source and exports each under a fresh
//! name. The first failure ends the burst; files already written stay.

use super::{ExportRequest, FrameExporter, NamingMode};
use crate::backends::camera::{CameraFrame, RecvError, SinkReceiver};
use crate::constants::export::BURST_FRAME_TIMEOUT;
use crate::errors::{CameraError, CameraResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Something a burst can pull frames from
pub trait FrameSource {
    /// The next frame, `Ok(None)` once the source has ended
    fn next_frame(&mut self) -> CameraResult<Option<Arc<CameraFrame>>>;
}

impl FrameSource for SinkReceiver {
    fn next_frame(&mut self) -> CameraResult<Option<Arc<CameraFrame>>> {
        match self.recv_timeout(BURST_FRAME_TIMEOUT) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvError::Closed) => Ok(None),
            Err(RecvError::Timeout) => Err(CameraError::CaptureFailed(format!(
                "no frame within {:?}",
                BURST_FRAME_TIMEOUT
            ))),
        }
    }
}

impl FrameSource for std::vec::IntoIter<Arc<CameraFrame>> {
    fn next_frame(&mut self) -> CameraResult<Option<Arc<CameraFrame>>> {
        Ok(self.next())
    }
}

/// Outcome of a burst
#[derive(Debug, Clone, Default)]
pub struct BurstReport {
    /// Frames asked for
    pub requested: u32,
    /// Files written, in capture order
    pub written: Vec<PathBuf>,
    /// Index of the frame that failed and why
    pub failure: Option<(usize, CameraError)>,
    /// Stopped early by the cancel token or the end of the source
    pub cancelled: bool,
}

impl BurstReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && !self.cancelled && self.written.len() == self.requested as usize
    }
}

impl FrameExporter {
    /// Export `request.burst_count` frames from `source`
    pub fn export_burst<S>(&self, source: &mut S, request: &ExportRequest) -> BurstReport
    where
        S: FrameSource + ?Sized,
    {
        self.export_burst_with_cancel(source, request, &AtomicBool::new(false))
    }

    /// [`export_burst`](Self::export_burst) that stops once `cancel` is set
    ///
    /// Cancellation is checked between frames; a write in progress finishes.
    /// Every file is named from the first frame's timestamp. A request not
    /// in [`NamingMode::Burst`] fails at index 0 without writing anything.
    pub fn export_burst_with_cancel<S>(
        &self,
        source: &mut S,
        request: &ExportRequest,
        cancel: &AtomicBool,
    ) -> BurstReport
    where
        S: FrameSource + ?Sized,
    {
        let mut report = BurstReport {
            requested: request.burst_count,
            ..BurstReport::default()
        };
        if request.mode != NamingMode::Burst {
            warn!(mode = ?request.mode, "Burst export needs a burst request");
            report.failure = Some((
                0,
                CameraError::InvalidState("request is not a burst request".to_string()),
            ));
            return report;
        }
        info!(count = request.burst_count, target = %request.target, "Starting burst export");

        let mut name_time = None;
        for index in 0..request.burst_count as usize {
            if cancel.load(Ordering::SeqCst) {
                info!(index, "Burst cancelled");
                report.cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(index, "Frame source ended during burst");
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(index, error = %e, "Burst frame acquisition failed");
                    report.failure = Some((index, e));
                    break;
                }
            };

            let stamp = *name_time.get_or_insert_with(|| frame.timestamp.naive_local());
            match self.export_named(&frame, request, stamp) {
                Ok(path) => report.written.push(path),
                Err(e) => {
                    warn!(index, sequence = frame.sequence, error = %e, "Burst aborted");
                    report.failure = Some((index, e));
                    break;
                }
            }
        }

        info!(
            written = report.written.len(),
            requested = report.requested,
            "Burst export finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::PixelFormat;
    use crate::constants::NamingRule;
    use crate::pipelines::photo::ExportTarget;

    fn frame(format: PixelFormat, sequence: u64) -> Arc<CameraFrame> {
        Arc::new(CameraFrame::from_bytes(format, 2, 2, vec![10; 8], sequence))
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new("IMG_", NamingRule::Sequential);
        let request = ExportRequest::burst(ExportTarget::Png, dir.path(), 3);
        let mut source = vec![frame(PixelFormat::Gray8, 0)].into_iter();

        let report = exporter.export_burst_with_cancel(&mut source, &request, &AtomicBool::new(true));
        assert!(report.cancelled);
        assert!(report.written.is_empty());
    }

    #[test]
    fn test_single_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
        let request = ExportRequest::single(ExportTarget::Pgm, dir.path());
        let mut source = vec![frame(PixelFormat::Gray8, 0)].into_iter();

        let report = exporter.export_burst(&mut source, &request);
        assert!(matches!(report.failure, Some((0, CameraError::InvalidState(_)))));
        assert!(report.written.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_source_end_stops_burst() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FrameExporter::new("IMG_", NamingRule::Sequential);
        let request = ExportRequest::burst(ExportTarget::Pgm, dir.path(), 4);
        let mut source = vec![frame(PixelFormat::Gray8, 0), frame(PixelFormat::Gray8, 1)].into_iter();

        let report = exporter.export_burst(&mut source, &request);
        assert_eq!(report.written.len(), 2);
        assert!(report.cancelled);
        assert!(!report.is_complete());
    }
}
