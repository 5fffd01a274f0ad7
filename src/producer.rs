//! Landmark Producer: frame -> pose -> text record -> transport
//!
//! Reads whatever the capture worker last published, so under a rate
//! mismatch a frame can be processed twice ([`FrameSync::Latest`]) or
//! skipped. [`FrameSync::Fresh`] waits for a newer sequence number instead
//! and never repeats a frame; it still skips frames the producer is too
//! slow to reach.

use crate::cancel::CancelToken;
use crate::capture::{CaptureState, SourceStatus};
use crate::config::{FrameSync, RelayConfig};
use crate::frame::Frame;
use crate::pose::skeleton::{draw_skeleton, DrawStyle};
use crate::pose::{encode_landmarks, PoseEstimate, PoseEstimator};
use crate::slot::{SlotReader, SlotWriter};
use crate::stats::{theoretical_max_fps, Every};
use crate::transport::{Transport, TransportStats};
use std::time::{Duration, Instant};

/// Back-off while the slot is still empty in `Latest` mode
const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct ProducerOptions {
    pub wait_poll: Duration,
    pub frame_sync: FrameSync,
    pub debug: bool,
    pub stats_period: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            wait_poll: Duration::from_millis(500),
            frame_sync: FrameSync::Latest,
            debug: false,
            stats_period: Duration::from_secs(1),
        }
    }
}

impl ProducerOptions {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            wait_poll: config.producer.wait_poll(),
            frame_sync: config.producer.frame_sync,
            debug: config.debug,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub frames_processed: u64,
    pub poses_detected: u64,
    pub estimator_errors: u64,
    pub transport: TransportStats,
}

pub struct LandmarkProducer<E, T> {
    estimator: E,
    transport: T,
    reader: SlotReader,
    status: SourceStatus,
    cancel: CancelToken,
    opts: ProducerOptions,
    preview: Option<SlotWriter>,
    report: ProducerReport,
}

impl<E: PoseEstimator, T: Transport> LandmarkProducer<E, T> {
    pub fn new(
        estimator: E,
        transport: T,
        reader: SlotReader,
        status: SourceStatus,
        cancel: CancelToken,
        opts: ProducerOptions,
    ) -> Self {
        Self {
            estimator,
            transport,
            reader,
            status,
            cancel,
            opts,
            preview: None,
            report: ProducerReport::default(),
        }
    }

    /// Publish annotated frames here while `debug` is set
    pub fn with_preview(mut self, preview: SlotWriter) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Wait for capture to start, then stream until it stops or is cancelled
    pub fn run(mut self) -> ProducerReport {
        if self.wait_for_capture() {
            tracing::info!(sync = ?self.opts.frame_sync, "beginning pose streaming");
            self.stream();
        }

        self.transport.close();
        if let Some(preview) = self.preview.take() {
            preview.close();
        }
        self.report.transport = self.transport.stats();
        tracing::info!(
            frames = self.report.frames_processed,
            poses = self.report.poses_detected,
            sent = self.report.transport.sent,
            "producer stopped"
        );
        self.report
    }

    fn wait_for_capture(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.status.get() {
                CaptureState::Running => return true,
                CaptureState::Stopped => return false,
                CaptureState::Pending => {}
            }
            tracing::info!("waiting for video and capture thread");
            if self.cancel.sleep(self.opts.wait_poll) {
                return false;
            }
        }
    }

    fn stream(&mut self) {
        let mut last_seq = 0u64;
        let mut stats_log = Every::new(self.opts.stats_period);

        while self.status.is_running() && !self.cancel.is_cancelled() {
            let taken = match self.opts.frame_sync {
                FrameSync::Latest => self.reader.latest(),
                FrameSync::Fresh => self.reader.wait_newer(last_seq, self.opts.wait_poll),
            };
            let Some(taken) = taken else {
                if self.opts.frame_sync == FrameSync::Latest {
                    self.cancel.sleep(IDLE_POLL);
                }
                continue;
            };
            last_seq = taken.sequence;

            let started = Instant::now();
            let payload = self.process_frame(&taken.frame);
            let processing = started.elapsed();

            self.transport.send(&payload);

            if self.opts.debug && stats_log.ready() {
                tracing::debug!(max_fps = theoretical_max_fps(processing), "theoretical maximum fps");
            }
        }
    }

    /// Mirror, estimate and encode one frame; `""` when no pose was found
    pub fn process_frame(&mut self, frame: &Frame) -> String {
        let mirrored = frame.mirrored();
        let estimate = match self.estimator.estimate(&mirrored) {
            Ok(estimate) => estimate,
            Err(e) => {
                self.report.estimator_errors += 1;
                tracing::warn!(error = %e, "pose estimation failed, sending empty frame");
                None
            }
        };

        self.report.frames_processed += 1;
        if estimate.is_some() {
            self.report.poses_detected += 1;
        }
        if self.opts.debug {
            self.publish_preview(mirrored, estimate.as_ref());
        }

        encode_landmarks(estimate.as_ref().map(|e| &e.world))
    }

    fn publish_preview(&self, mut frame: Frame, estimate: Option<&PoseEstimate>) {
        let Some(preview) = &self.preview else {
            return;
        };
        if let Some(image) = estimate.and_then(|e| e.image.as_ref()) {
            draw_skeleton(&mut frame, image, DrawStyle::PREVIEW);
        }
        preview.publish(frame);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{RelayError, Result};
    use crate::pose::tests::sample_pose;
    use crate::pose::LANDMARK_COUNT;
    use crate::slot::frame_slot;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;

    /// Pose on frames whose first pixel is bright
    pub(crate) struct MarkerEstimator;

    impl PoseEstimator for MarkerEstimator {
        fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseEstimate>> {
            match frame.pixel(0, 0) {
                Some([r, _, _]) if r >= 128 => Ok(Some(PoseEstimate {
                    world: sample_pose(0.0),
                    image: Some(sample_pose(0.5)),
                })),
                _ => Ok(None),
            }
        }
    }

    struct FailingEstimator;

    impl PoseEstimator for FailingEstimator {
        fn estimate(&mut self, _frame: &Frame) -> Result<Option<PoseEstimate>> {
            Err(RelayError::Estimator("model crashed".to_string()))
        }
    }

    /// Records every payload
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, payload: &str) {
            self.sent.lock().push(payload.to_string());
        }

        fn close(&mut self) {
            *self.closed.lock() = true;
        }

        fn stats(&self) -> TransportStats {
            TransportStats {
                sent: self.sent.lock().len() as u64,
                ..TransportStats::default()
            }
        }
    }

    fn producer<E: PoseEstimator>(
        estimator: E,
        opts: ProducerOptions,
    ) -> (LandmarkProducer<E, RecordingTransport>, SlotWriter, SourceStatus, CancelToken, RecordingTransport) {
        let (writer, reader) = frame_slot();
        let status = SourceStatus::new();
        let cancel = CancelToken::new();
        let transport = RecordingTransport::default();
        let p = LandmarkProducer::new(estimator, transport.clone(), reader, status.clone(), cancel.clone(), opts);
        (p, writer, status, cancel, transport)
    }

    #[test]
    fn test_no_pose_payload_is_empty() {
        let (mut p, ..) = producer(MarkerEstimator, ProducerOptions::default());
        assert_eq!(p.process_frame(&Frame::filled(4, 4, [0, 0, 0])), "");
        assert_eq!(p.report.frames_processed, 1);
        assert_eq!(p.report.poses_detected, 0);
    }

    #[test]
    fn test_full_pose_payload_has_33_records() {
        let (mut p, ..) = producer(MarkerEstimator, ProducerOptions::default());
        let payload = p.process_frame(&Frame::filled(4, 4, [255, 255, 255]));
        let indices: Vec<usize> = payload
            .lines()
            .map(|l| l.split('|').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(indices, (0..LANDMARK_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_frame_is_mirrored_before_estimation() {
        // Bright pixel on the right edge lands at (0, 0) after mirroring
        let mut frame = Frame::filled(4, 1, [0, 0, 0]);
        frame.put_pixel(3, 0, [255, 255, 255]);
        let (mut p, ..) = producer(MarkerEstimator, ProducerOptions::default());
        assert_eq!(p.process_frame(&frame).lines().count(), LANDMARK_COUNT);
    }

    #[test]
    fn test_estimator_error_sends_empty_payload() {
        let (mut p, ..) = producer(FailingEstimator, ProducerOptions::default());
        assert_eq!(p.process_frame(&Frame::filled(2, 2, [255; 3])), "");
        assert_eq!(p.report.estimator_errors, 1);
    }

    #[test]
    fn test_debug_preview_gets_annotated_frame() {
        let opts = ProducerOptions {
            debug: true,
            ..ProducerOptions::default()
        };
        let (p, ..) = producer(MarkerEstimator, opts);
        let (preview_writer, preview_reader) = frame_slot();
        let mut p = p.with_preview(preview_writer);

        p.process_frame(&Frame::filled(64, 64, [200, 200, 200]));
        let shown = preview_reader.latest().unwrap();
        assert_ne!(shown.frame.data(), Frame::filled(64, 64, [200, 200, 200]).data());
    }

    #[test]
    fn test_cancel_while_waiting_for_capture() {
        let opts = ProducerOptions {
            wait_poll: Duration::from_secs(30),
            ..ProducerOptions::default()
        };
        let (p, _writer, _status, cancel, transport) = producer(MarkerEstimator, opts);
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        cancel.cancel();
        let report = handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.frames_processed, 0);
        assert!(*transport.closed.lock());
    }

    #[test]
    fn test_latest_mode_streams_until_capture_stops() {
        let opts = ProducerOptions {
            wait_poll: Duration::from_millis(5),
            ..ProducerOptions::default()
        };
        let (p, writer, status, cancel, transport) = producer(MarkerEstimator, opts);
        status.set(CaptureState::Running);
        writer.publish(Frame::filled(2, 2, [255; 3]));
        let handle = thread::spawn(move || p.run());

        let start = Instant::now();
        while transport.sent.lock().len() < 3 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        status.set(CaptureState::Stopped);
        cancel.cancel();
        let report = handle.join().unwrap();

        // The same frame is re-processed while nothing newer arrives
        assert!(report.frames_processed >= 3);
        assert!(transport.sent.lock().iter().all(|p| p.lines().count() == LANDMARK_COUNT));
        assert!(*transport.closed.lock());
    }

    #[test]
    fn test_fresh_mode_processes_each_frame_once() {
        let opts = ProducerOptions {
            wait_poll: Duration::from_millis(5),
            frame_sync: FrameSync::Fresh,
            ..ProducerOptions::default()
        };
        let (p, writer, status, cancel, transport) = producer(MarkerEstimator, opts);
        status.set(CaptureState::Running);
        writer.publish(Frame::filled(2, 2, [255; 3]));
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(50));
        status.set(CaptureState::Stopped);
        cancel.cancel();
        handle.join().unwrap();

        assert_eq!(transport.sent.lock().len(), 1);
    }
}
