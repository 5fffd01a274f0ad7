//! Latest-frame slot for one writer and one reader
//!
//! The capture worker overwrites the slot every cycle; the producer reads
//! whatever is current. Nothing is queued: a frame that is overwritten
//! before it is read is gone, and a frame may be read more than once.
//!
//! # Sequence
//! Every publish bumps a monotonic sequence number, starting at 1.
//! Sequence 0 means nothing has been published yet.

use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Shared {
    sequence: AtomicU64,
    closed: AtomicBool,
    latest: Mutex<Option<Arc<Frame>>>,
    published: Condvar,
}

/// A frame taken out of the slot, tagged with its sequence number
#[derive(Debug, Clone)]
pub struct SlotFrame {
    pub sequence: u64,
    pub frame: Arc<Frame>,
}

/// Create a connected writer/reader pair
pub fn frame_slot() -> (SlotWriter, SlotReader) {
    let shared = Arc::new(Shared {
        sequence: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        latest: Mutex::new(None),
        published: Condvar::new(),
    });
    (
        SlotWriter {
            shared: Arc::clone(&shared),
        },
        SlotReader { shared },
    )
}

/// Writer side; not `Clone`, there is exactly one
pub struct SlotWriter {
    shared: Arc<Shared>,
}

impl SlotWriter {
    /// Replace the current frame, returning its sequence number
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let mut latest = self.shared.latest.lock();
        *latest = Some(frame);
        let seq = self.shared.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        drop(latest);
        self.shared.published.notify_all();
        seq
    }

    /// Wake any waiting reader; no more frames will follow
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let _latest = self.shared.latest.lock();
        self.shared.published.notify_all();
    }
}

impl Drop for SlotWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader side; not `Clone`, there is exactly one
pub struct SlotReader {
    shared: Arc<Shared>,
}

impl SlotReader {
    /// Current frame, if any has been published
    pub fn latest(&self) -> Option<SlotFrame> {
        let latest = self.shared.latest.lock();
        self.tag(latest.as_ref())
    }

    /// Like [`latest`](Self::latest) but gives up instead of waiting on the writer
    pub fn try_latest(&self) -> Option<SlotFrame> {
        let latest = self.shared.latest.try_lock()?;
        self.tag(latest.as_ref())
    }

    /// Wait up to `timeout` for a frame newer than `after`.
    ///
    /// Returns `None` on timeout or when the writer has closed without
    /// publishing anything newer.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<SlotFrame> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.shared.latest.lock();
        loop {
            if self.shared.sequence.load(Ordering::Acquire) > after {
                return self.tag(latest.as_ref());
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            if self.shared.published.wait_until(&mut latest, deadline).timed_out() {
                if self.shared.sequence.load(Ordering::Acquire) > after {
                    return self.tag(latest.as_ref());
                }
                return None;
            }
        }
    }

    pub fn sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // Caller holds the lock, so the sequence matches the frame.
    fn tag(&self, frame: Option<&Arc<Frame>>) -> Option<SlotFrame> {
        frame.map(|frame| SlotFrame {
            sequence: self.shared.sequence.load(Ordering::Acquire),
            frame: Arc::clone(frame),
        })
    }
}
