// SPDX-License-Identifier: GPL-3.0-only

//! Frame sinks
//!
//! Every sink is a single-slot mailbox. The capture thread overwrites an
//! undelivered frame with the newer one (counted as a drop) and never
//! waits for a consumer, so a stalled sink costs frames, not throughput.

use super::types::CameraFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Why a receive returned without a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("timed out waiting for a frame")]
    Timeout,
    /// The capture loop stopped or closed this sink
    #[error("sink closed")]
    Closed,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Arc<CameraFrame>>,
    closed: bool,
}

pub(crate) struct Mailbox {
    name: String,
    slot: Mutex<SlotState>,
    ready: Condvar,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl Mailbox {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: Mutex::new(SlotState::default()),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place `frame`, replacing any undelivered one; false once closed
    fn offer(&self, frame: Arc<CameraFrame>) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        if slot.frame.replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(slot);
        self.ready.notify_one();
        true
    }

    fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.frame = None;
        drop(slot);
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take(&self, slot: &mut SlotState) -> Option<Arc<CameraFrame>> {
        let frame = slot.frame.take();
        if frame.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }
}

/// Pull end of a sink
///
/// Dropping the receiver unsubscribes it.
pub struct SinkReceiver {
    mailbox: Arc<Mailbox>,
}

impl SinkReceiver {
    pub fn name(&self) -> &str {
        &self.mailbox.name
    }

    /// Take the pending frame, if any
    pub fn try_recv(&self) -> Option<Arc<CameraFrame>> {
        let mut slot = self.mailbox.lock();
        self.mailbox.take(&mut slot)
    }

    /// Wait for the next frame; `None` once the sink is closed
    pub fn recv(&self) -> Option<Arc<CameraFrame>> {
        let mut slot = self.mailbox.lock();
        loop {
            if let Some(frame) = self.mailbox.take(&mut slot) {
                return Some(frame);
            }
            if slot.closed {
                return None;
            }
            slot = self
                .mailbox
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait at most `timeout` for the next frame
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<CameraFrame>, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.mailbox.lock();
        loop {
            if let Some(frame) = self.mailbox.take(&mut slot) {
                return Ok(frame);
            }
            if slot.closed {
                return Err(RecvError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvError::Timeout);
            }
            slot = self
                .mailbox
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Frames replaced before this receiver took them
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    /// Frames this receiver has taken
    pub fn delivered(&self) -> u64 {
        self.mailbox.delivered.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl Drop for SinkReceiver {
    fn drop(&mut self) {
        self.mailbox.close();
    }
}

impl std::fmt::Debug for SinkReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkReceiver")
            .field("name", &self.mailbox.name)
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// The set of sinks a capture loop dispatches to
#[derive(Default)]
pub(crate) struct SinkSet {
    sinks: Mutex<Vec<Arc<Mailbox>>>,
}

impl SinkSet {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Mailbox>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, name: &str) -> SinkReceiver {
        let mailbox = Arc::new(Mailbox::new(name));
        self.lock().push(Arc::clone(&mailbox));
        debug!(sink = name, "Sink subscribed");
        SinkReceiver { mailbox }
    }

    /// Hand `frame` to every open sink, forgetting closed ones
    pub(crate) fn dispatch(&self, frame: &Arc<CameraFrame>) {
        self.lock().retain(|mailbox| {
            let open = mailbox.offer(Arc::clone(frame));
            if !open {
                debug!(sink = %mailbox.name, "Removing closed sink");
            }
            open
        });
    }

    /// Close and forget every sink; blocked receivers wake with `Closed`
    pub(crate) fn close_all(&self) {
        for mailbox in self.lock().drain(..) {
            mailbox.close();
        }
    }

    /// (name, dropped) for every live sink
    pub(crate) fn drop_counts(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .map(|m| (m.name.clone(), m.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;

    fn frame(sequence: u64) -> Arc<CameraFrame> {
        Arc::new(CameraFrame::from_bytes(PixelFormat::Gray8, 2, 2, vec![0; 4], sequence))
    }

    #[test]
    fn test_newer_frame_replaces_undelivered() {
        let set = SinkSet::default();
        let rx = set.subscribe("preview");
        set.dispatch(&frame(1));
        set.dispatch(&frame(2));
        set.dispatch(&frame(3));

        assert_eq!(rx.try_recv().map(|f| f.sequence), Some(3));
        assert_eq!(rx.dropped(), 2);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_closed_sink_is_forgotten() {
        let set = SinkSet::default();
        let rx = set.subscribe("gone");
        drop(rx);
        set.dispatch(&frame(1));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_close_wakes_receiver() {
        let set = Arc::new(SinkSet::default());
        let rx = set.subscribe("waiter");
        let closer = Arc::clone(&set);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.close_all();
        });
        assert!(rx.recv().is_none());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(1)),
            Err(RecvError::Closed)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_timeout() {
        let set = SinkSet::default();
        let rx = set.subscribe("slow");
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvError::Timeout)
        ));
    }
}
