//! Frame Source: reads frames at the stream's native rate into the slot
//!
//! The loop never waits on the consumer. It stops at end of stream, on a
//! read error, or when the cancel token fires, and on the way out it
//! releases the source and cancels the token so the producer stops too.

use crate::cancel::CancelToken;
use crate::slot::SlotWriter;
use crate::source::VideoSource;
use crate::stats::RateMeter;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of the capture worker as seen by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Pending = 0,
    Running = 1,
    Stopped = 2,
}

/// Shared, lock-free view of [`CaptureState`]
#[derive(Debug, Clone, Default)]
pub struct SourceStatus(Arc<AtomicU8>);

impl SourceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> CaptureState {
        match self.0.load(Ordering::Acquire) {
            0 => CaptureState::Pending,
            1 => CaptureState::Running,
            _ => CaptureState::Stopped,
        }
    }

    pub fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == CaptureState::Running
    }
}

/// Why the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    ReadError,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureReport {
    pub frames_read: u64,
    pub fps: f64,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Used when the source reports an unusable rate
    pub fallback_fps: f64,
    /// Log the achieved read rate every `rate_window`
    pub debug: bool,
    pub rate_window: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            fallback_fps: 30.0,
            debug: false,
            rate_window: Duration::from_secs(3),
        }
    }
}

/// Time left in this frame's interval: `max(0, 1/fps - elapsed)`
pub fn pacing_delay(fps: f64, elapsed: Duration) -> Duration {
    if !(fps.is_finite() && fps > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(1.0 / fps)
        .unwrap_or(Duration::ZERO)
        .saturating_sub(elapsed)
}

/// Guard against zero, negative or NaN rates
pub fn effective_fps(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        tracing::warn!(reported, fallback, "source has no usable frame rate, using fallback");
        fallback
    }
}

/// Run the capture loop until end of stream or cancellation
pub fn run_capture<S: VideoSource>(
    mut source: S,
    writer: SlotWriter,
    status: SourceStatus,
    cancel: CancelToken,
    opts: CaptureOptions,
) -> CaptureReport {
    let fps = effective_fps(source.fps(), opts.fallback_fps);
    let (width, height) = source.dimensions();
    tracing::info!(fps, width, height, "capture started");
    status.set(CaptureState::Running);

    let mut meter = RateMeter::new(opts.rate_window);
    let mut frames_read = 0u64;

    let reason = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }

        let started = Instant::now();
        match source.read_frame() {
            Ok(Some(frame)) => {
                writer.publish(frame);
                frames_read += 1;
            }
            Ok(None) => {
                tracing::info!(frames_read, "end of video reached");
                break StopReason::EndOfStream;
            }
            Err(e) => {
                tracing::warn!(error = %e, frames_read, "frame read failed, stopping capture");
                break StopReason::ReadError;
            }
        }

        if opts.debug {
            if let Some(rate) = meter.tick() {
                tracing::debug!(capture_fps = rate, "capture rate");
            }
        }

        if cancel.sleep(pacing_delay(fps, started.elapsed())) {
            break StopReason::Cancelled;
        }
    };

    source.release();
    status.set(CaptureState::Stopped);
    writer.close();
    cancel.cancel();
    tracing::info!(?reason, frames_read, "capture stopped");

    CaptureReport {
        frames_read,
        fps,
        reason,
    }
}
