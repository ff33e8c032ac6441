// SPDX-License-Identifier: GPL-3.0-only

//! Capture loop
//!
//! One dedicated thread per loop pulls frames from the device as fast as
//! the device delivers them and hands each one to every subscribed sink.
//!
//! # States
//!
//! ```text
//!          start            pause
//!  Idle ──────────▶ Running ──────▶ Paused
//!   ▲                │  ▲  ◀──────   │
//!   │           read │  │ reset ok   │
//!   │          error ▼  │   resume   │
//!   │               Error            │
//!   │  fatal / stop  │               │
//!   └──── Stopping ◀─┴───────────────┘
//! ```
//!
//! A read error triggers exactly one device reset. If the reset fails, or
//! the first read after it fails again, the loop gives up: it records
//! `CaptureFailed`, closes its sinks and settles in `Idle` with the handle
//! waiting to be taken back by [`CaptureLoop::stop`].

use super::buffer_pool::{BufferPool, PooledBuffer};
use super::handle::DeviceHandle;
use super::sink::{SinkReceiver, SinkSet};
use super::types::{BackendError, CameraFormat, CameraFrame, FrameData, FrameInfo};
use crate::constants::capture::{ACK_TIMEOUT, FRAME_LOG_INTERVAL, POOL_CAPACITY};
use crate::errors::{CameraError, CameraResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Stopping,
    /// Recovering from a read error
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Pause,
    Resume,
    Stop,
}

struct Control {
    state: LoopState,
    request: Option<Request>,
    last_error: Option<CameraError>,
    /// Read error the last successful reset recovered from
    last_recovered: Option<CameraError>,
    format: Option<CameraFormat>,
}

struct Shared {
    name: String,
    control: Mutex<Control>,
    changed: Condvar,
    sinks: SinkSet,
    frames: AtomicU64,
    resets: AtomicU64,
    next_sequence: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state` unless a stop is already under way
    fn set_state(&self, state: LoopState) {
        let mut ctl = self.lock();
        if ctl.state != LoopState::Stopping || state == LoopState::Idle {
            ctl.state = state;
        }
        drop(ctl);
        self.changed.notify_all();
    }

    fn take_request(&self) -> Option<Request> {
        self.lock().request.take()
    }

    /// Block until a resume or stop arrives
    fn wait_while_paused(&self) -> Request {
        let mut ctl = self.lock();
        loop {
            match ctl.request.take() {
                Some(Request::Stop) => return Request::Stop,
                Some(Request::Resume) => return Request::Resume,
                // Already paused; the state change acknowledges it
                Some(Request::Pause) => self.changed.notify_all(),
                None => {}
            }
            ctl = self
                .changed
                .wait(ctl)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn fail(&self, reason: String) {
        error!(name = %self.name, reason = %reason, "Capture failed, giving up");
        self.lock().last_error = Some(CameraError::CaptureFailed(reason));
        self.sinks.close_all();
    }

    fn publish(&self, buffer: PooledBuffer, info: FrameInfo, format: CameraFormat) {
        if let Some(expected) = format.pixel_format.frame_size(format.width, format.height)
            && info.bytes_used < expected
        {
            warn!(
                name = %self.name,
                bytes = info.bytes_used,
                expected,
                "Discarding short frame"
            );
            return;
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Arc::new(CameraFrame {
            width: format.width,
            height: format.height,
            data: FrameData::Pooled(buffer),
            format: format.pixel_format,
            sequence,
            timestamp: chrono::Local::now(),
            captured_at: Instant::now(),
        });
        self.sinks.dispatch(&frame);

        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % FRAME_LOG_INTERVAL == 0 {
            debug!(
                name = %self.name,
                frames = count,
                device_sequence = info.device_sequence,
                "Capture progress"
            );
        }
    }
}

/// Counters describing a loop's activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames dispatched to sinks since the loop was created
    pub frames: u64,
    /// Automatic device resets performed
    pub resets: u64,
    /// Frames each live sink lost to newer ones
    pub sink_drops: Vec<(String, u64)>,
}

/// A capture loop driving one device handle
pub struct CaptureLoop {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<DeviceHandle>>,
    parked: Option<DeviceHandle>,
    callbacks: Vec<JoinHandle<()>>,
    pool: BufferPool,
}

impl CaptureLoop {
    /// Create an idle loop; `name` is used in logs and thread names
    pub fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                control: Mutex::new(Control {
                    state: LoopState::Idle,
                    request: None,
                    last_error: None,
                    last_recovered: None,
                    format: None,
                }),
                changed: Condvar::new(),
                sinks: SinkSet::default(),
                frames: AtomicU64::new(0),
                resets: AtomicU64::new(0),
                next_sequence: AtomicU64::new(0),
            }),
            worker: None,
            parked: None,
            callbacks: Vec::new(),
            pool: BufferPool::new(POOL_CAPACITY),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> LoopState {
        self.shared.lock().state
    }

    /// The recorded fatal error of the last run, if it ended in one
    pub fn last_error(&self) -> Option<CameraError> {
        self.shared.lock().last_error.clone()
    }

    /// The read error of the last reset that capture survived, if any
    pub fn last_recovered_error(&self) -> Option<CameraError> {
        self.shared.lock().last_recovered.clone()
    }

    /// Format of the frames currently being produced
    pub fn current_format(&self) -> Option<CameraFormat> {
        self.shared.lock().format
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames: self.shared.frames.load(Ordering::Relaxed),
            resets: self.shared.resets.load(Ordering::Relaxed),
            sink_drops: self.shared.sinks.drop_counts(),
        }
    }

    /// Register a pull sink
    pub fn subscribe(&self, name: &str) -> SinkReceiver {
        self.shared.sinks.subscribe(name)
    }

    /// Register a sink whose callback runs on its own thread
    ///
    /// The callback sees frames in capture order; if it falls behind it
    /// skips to the newest frame. It stops when the loop stops.
    pub fn add_callback_sink<F>(&mut self, name: &str, mut callback: F)
    where
        F: FnMut(Arc<CameraFrame>) + Send + 'static,
    {
        let receiver = self.shared.sinks.subscribe(name);
        let thread_name = name.to_string();
        self.callbacks.push(thread::spawn(move || {
            debug!(sink = %thread_name, "Callback sink started");
            while let Some(frame) = receiver.recv() {
                callback(frame);
            }
            debug!(sink = %thread_name, "Callback sink finished");
        }));
    }

    /// Start streaming from `handle` on a dedicated thread
    ///
    /// A closed handle is reopened first. On failure the handle stays with
    /// the loop and can be taken back with [`take_handle`](Self::take_handle).
    pub fn start(&mut self, mut handle: DeviceHandle) -> CameraResult<()> {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            self.parked = Some(handle);
            return Err(CameraError::InvalidState(format!(
                "capture loop '{}' is already running",
                self.shared.name
            )));
        }
        // A previous run that ended on its own still holds its handle
        drop(self.take_handle());

        if !handle.is_open()
            && let Err(e) = handle.reset()
        {
            self.parked = Some(handle);
            return Err(e);
        }
        if let Err(e) = handle.start_stream() {
            self.parked = Some(handle);
            return Err(e);
        }

        {
            let mut ctl = self.shared.lock();
            ctl.state = LoopState::Running;
            ctl.request = None;
            ctl.last_error = None;
            ctl.last_recovered = None;
            ctl.format = Some(handle.negotiated());
        }

        info!(name = %self.shared.name, path = %handle.path(), format = %handle.negotiated(), "Starting capture loop");

        let shared = Arc::clone(&self.shared);
        let pool = self.pool.clone();
        self.worker = Some(thread::spawn(move || capture_thread(shared, handle, pool)));
        Ok(())
    }

    /// Halt the stream without releasing the device
    pub fn pause(&self) -> CameraResult<()> {
        let mut ctl = self.shared.lock();
        match ctl.state {
            LoopState::Paused => return Ok(()),
            LoopState::Running | LoopState::Error => {}
            other => {
                return Err(CameraError::InvalidState(format!(
                    "cannot pause while {:?}",
                    other
                )));
            }
        }
        ctl.request = Some(Request::Pause);
        self.shared.changed.notify_all();

        let (ctl, _) = self
            .shared
            .changed
            .wait_timeout_while(ctl, ACK_TIMEOUT, |c| {
                !matches!(c.state, LoopState::Paused | LoopState::Idle)
            })
            .unwrap_or_else(PoisonError::into_inner);
        self.acknowledged(&ctl, LoopState::Paused)
    }

    /// Restart the stream after [`pause`](Self::pause)
    pub fn resume(&self) -> CameraResult<()> {
        let mut ctl = self.shared.lock();
        match ctl.state {
            LoopState::Running => return Ok(()),
            LoopState::Paused => {}
            other => {
                return Err(CameraError::InvalidState(format!(
                    "cannot resume while {:?}",
                    other
                )));
            }
        }
        ctl.request = Some(Request::Resume);
        self.shared.changed.notify_all();

        let (ctl, _) = self
            .shared
            .changed
            .wait_timeout_while(ctl, ACK_TIMEOUT, |c| c.state == LoopState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        self.acknowledged(&ctl, LoopState::Running)
    }

    fn acknowledged(&self, ctl: &Control, wanted: LoopState) -> CameraResult<()> {
        if ctl.state == wanted {
            return Ok(());
        }
        if let Some(err) = &ctl.last_error {
            return Err(err.clone());
        }
        Err(CameraError::InvalidState(format!(
            "capture thread did not acknowledge, state is {:?}",
            ctl.state
        )))
    }

    /// Stop the thread, halt the stream, close all sinks and return the handle
    ///
    /// Also collects the handle after the loop gave up on its own.
    pub fn stop(&mut self) -> CameraResult<DeviceHandle> {
        let Some(worker) = self.worker.take() else {
            return self.parked.take().ok_or_else(|| {
                CameraError::InvalidState(format!(
                    "capture loop '{}' is not running",
                    self.shared.name
                ))
            });
        };

        {
            let mut ctl = self.shared.lock();
            ctl.request = Some(Request::Stop);
            if ctl.state != LoopState::Idle {
                ctl.state = LoopState::Stopping;
            }
        }
        self.shared.changed.notify_all();
        debug!(name = %self.shared.name, "Waiting for capture thread to finish");

        let joined = worker.join();
        self.shared.sinks.close_all();
        for callback in self.callbacks.drain(..) {
            if callback.join().is_err() {
                warn!(name = %self.shared.name, "Callback sink panicked");
            }
        }
        {
            let mut ctl = self.shared.lock();
            ctl.state = LoopState::Idle;
            ctl.request = None;
        }
        self.shared.changed.notify_all();

        match joined {
            Ok(handle) => {
                info!(name = %self.shared.name, "Capture loop stopped");
                Ok(handle)
            }
            Err(_) => {
                error!(name = %self.shared.name, "Capture thread panicked");
                Err(CameraError::CaptureFailed("capture thread panicked".to_string()))
            }
        }
    }

    /// Take back a handle the loop is holding while idle
    ///
    /// Returns `None` while the loop is running.
    pub fn take_handle(&mut self) -> Option<DeviceHandle> {
        if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            return self.stop().ok();
        }
        self.parked.take()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!(name = %self.shared.name, "CaptureLoop dropped, stopping");
            if let Err(e) = self.stop() {
                warn!(name = %self.shared.name, error = %e, "Capture loop did not stop cleanly");
            }
        }
    }
}

/// Reopen the device and restart its stream
fn recover(handle: &mut DeviceHandle) -> CameraResult<()> {
    handle.reset()?;
    handle.start_stream()
}

fn capture_thread(shared: Arc<Shared>, mut handle: DeviceHandle, pool: BufferPool) -> DeviceHandle {
    debug!(name = %shared.name, "Capture thread started");
    // Set after a reset until a frame arrives; a failure meanwhile is fatal
    let mut recovering = false;

    loop {
        match shared.take_request() {
            Some(Request::Stop) => break,
            Some(Request::Pause) => {
                if let Err(e) = handle.stop_stream() {
                    warn!(name = %shared.name, error = %e, "Failed to halt stream for pause");
                }
                shared.set_state(LoopState::Paused);
                info!(name = %shared.name, "Capture paused");

                if shared.wait_while_paused() == Request::Stop {
                    break;
                }
                if let Err(e) = handle.start_stream() {
                    warn!(name = %shared.name, error = %e, "Stream restart failed, resetting device");
                    shared.resets.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = recover(&mut handle) {
                        shared.fail(format!("resume failed: {}", e));
                        break;
                    }
                    recovering = true;
                }
                shared.set_state(LoopState::Running);
                info!(name = %shared.name, "Capture resumed");
            }
            Some(Request::Resume) | None => {}
        }

        let mut buffer = pool.take();
        match handle.dequeue(buffer.as_mut_vec()) {
            Ok(info) => {
                recovering = false;
                shared.publish(buffer, info, handle.negotiated());
            }
            // Nothing within the device timeout; go check for requests
            Err(BackendError::Timeout) => {}
            Err(e) if recovering => {
                shared.fail(format!("read failed again after reset: {}", e));
                break;
            }
            Err(e) => {
                warn!(name = %shared.name, error = %e, "Frame read failed, resetting device");
                shared.set_state(LoopState::Error);
                shared.resets.fetch_add(1, Ordering::Relaxed);

                match recover(&mut handle) {
                    Ok(()) => {
                        recovering = true;
                        {
                            let mut ctl = shared.lock();
                            ctl.format = Some(handle.negotiated());
                            ctl.last_recovered = Some(CameraError::CaptureFailed(e.to_string()));
                        }
                        shared.set_state(LoopState::Running);
                        info!(name = %shared.name, "Device reset, capture continues");
                    }
                    Err(reset_err) => {
                        shared.fail(format!("{} (reset failed: {})", e, reset_err));
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = handle.stop_stream() {
        debug!(name = %shared.name, error = %e, "Stream stop failed on exit");
    }
    shared.set_state(LoopState::Idle);
    info!(name = %shared.name, "Capture thread exiting");
    handle
}
