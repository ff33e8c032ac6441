// SPDX-License-Identifier: GPL-3.0-only

//! Photo capture from a running capture loop
//!
//! Grabs a single frame from a sink without interrupting the other sinks.

use crate::backends::camera::{CameraFrame, RecvError, SinkReceiver};
use crate::errors::{CameraError, CameraResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Photo capture handler
pub struct PhotoCapture;

impl PhotoCapture {
    /// Wait for the next frame on `sink`
    ///
    /// A frame that was already waiting is discarded first, so the result
    /// is captured after the call.
    ///
    /// # Errors
    /// * `CaptureFailed` - Nothing arrived within `timeout`, or the loop stopped
    pub fn from_sink(sink: &SinkReceiver, timeout: Duration) -> CameraResult<Arc<CameraFrame>> {
        let _ = sink.try_recv();

        let frame = sink.recv_timeout(timeout).map_err(|e| match e {
            RecvError::Timeout => {
                CameraError::CaptureFailed(format!("no frame within {:?}", timeout))
            }
            RecvError::Closed => {
                CameraError::CaptureFailed("capture loop stopped".to_string())
            }
        })?;

        debug!(
            width = frame.width,
            height = frame.height,
            format = %frame.format,
            sequence = frame.sequence,
            "Frame captured for photo"
        );
        Ok(frame)
    }

    /// Wrap a frame obtained elsewhere
    pub fn from_frame(frame: CameraFrame) -> Arc<CameraFrame> {
        Arc::new(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::PixelFormat;

    #[test]
    fn test_capture_from_frame() {
        let frame = CameraFrame::from_bytes(PixelFormat::Rgb24, 4, 2, vec![0; 24], 7);
        let captured = PhotoCapture::from_frame(frame);
        assert_eq!(captured.width, 4);
        assert_eq!(captured.sequence, 7);
    }
}
