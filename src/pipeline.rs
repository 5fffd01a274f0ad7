//! One streaming session: a capture worker and a producer worker
//!
//! ```no_run
//! use pose_relay::RelayConfig;
//!
//! let config = RelayConfig::load_or_default("pose_relay.toml")?;
//! let pipeline = pose_relay::pipeline::open_session("clip.mp4", &config)?;
//! let report = pipeline.join()?;
//! println!("{} frames sent", report.producer.transport.sent);
//! # Ok::<(), pose_relay::RelayError>(())
//! ```

use crate::cancel::CancelToken;
use crate::capture::{run_capture, CaptureOptions, CaptureReport, CaptureState, SourceStatus};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::pose::sidecar::SidecarEstimator;
use crate::pose::PoseEstimator;
use crate::producer::{LandmarkProducer, ProducerOptions, ProducerReport};
use crate::slot::{frame_slot, SlotWriter};
use crate::source::{FfmpegSource, VideoSource};
use crate::transport::{build_transport, Transport};
use std::path::Path;
use std::thread::{self, JoinHandle};

pub const CAPTURE_THREAD: &str = "pose-relay-capture";
pub const PRODUCER_THREAD: &str = "pose-relay-producer";

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSettings {
    pub capture: CaptureOptions,
    pub producer: ProducerOptions,
}

impl PipelineSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            capture: CaptureOptions {
                fallback_fps: config.capture.fallback_fps,
                debug: config.debug,
                ..CaptureOptions::default()
            },
            producer: ProducerOptions::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineReport {
    pub capture: CaptureReport,
    pub producer: ProducerReport,
}

/// Stops the session if a worker unwinds before its own cleanup ran
struct StopOnExit {
    status: SourceStatus,
    cancel: CancelToken,
}

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.status.set(CaptureState::Stopped);
        self.cancel.cancel();
    }
}

pub struct Pipeline {
    cancel: CancelToken,
    status: SourceStatus,
    capture: Option<JoinHandle<CaptureReport>>,
    producer: Option<JoinHandle<ProducerReport>>,
}

impl Pipeline {
    /// Start both workers
    pub fn spawn<S, E, T>(source: S, estimator: E, transport: T, settings: PipelineSettings) -> Result<Self>
    where
        S: VideoSource + 'static,
        E: PoseEstimator + 'static,
        T: Transport + 'static,
    {
        Self::spawn_inner(source, estimator, transport, settings, None)
    }

    /// Like [`Pipeline::spawn`], also publishing annotated frames to `preview`
    /// while `settings.producer.debug` is set
    pub fn spawn_with_preview<S, E, T>(
        source: S,
        estimator: E,
        transport: T,
        settings: PipelineSettings,
        preview: SlotWriter,
    ) -> Result<Self>
    where
        S: VideoSource + 'static,
        E: PoseEstimator + 'static,
        T: Transport + 'static,
    {
        Self::spawn_inner(source, estimator, transport, settings, Some(preview))
    }

    fn spawn_inner<S, E, T>(
        source: S,
        estimator: E,
        transport: T,
        settings: PipelineSettings,
        preview: Option<SlotWriter>,
    ) -> Result<Self>
    where
        S: VideoSource + 'static,
        E: PoseEstimator + 'static,
        T: Transport + 'static,
    {
        let (writer, reader) = frame_slot();
        let status = SourceStatus::new();
        let cancel = CancelToken::new();

        let capture = {
            let guard = StopOnExit {
                status: status.clone(),
                cancel: cancel.clone(),
            };
            let (status, cancel) = (status.clone(), cancel.clone());
            thread::Builder::new()
                .name(CAPTURE_THREAD.to_string())
                .spawn(move || {
                    let _guard = guard;
                    run_capture(source, writer, status, cancel, settings.capture)
                })
                .map_err(|source| RelayError::Spawn {
                    program: CAPTURE_THREAD.to_string(),
                    source,
                })?
        };

        let mut producer =
            LandmarkProducer::new(estimator, transport, reader, status.clone(), cancel.clone(), settings.producer);
        if let Some(preview) = preview {
            producer = producer.with_preview(preview);
        }
        let guard = StopOnExit {
            status: status.clone(),
            cancel: cancel.clone(),
        };
        let spawned = thread::Builder::new()
            .name(PRODUCER_THREAD.to_string())
            .spawn(move || {
                let _guard = guard;
                producer.run()
            });

        let producer = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                cancel.cancel();
                let _ = capture.join();
                return Err(RelayError::Spawn {
                    program: PRODUCER_THREAD.to_string(),
                    source,
                });
            }
        };

        Ok(Self {
            cancel,
            status,
            capture: Some(capture),
            producer: Some(producer),
        })
    }

    /// Ask both workers to stop; returns immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared by both workers, e.g. for a Ctrl-C handler
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CaptureState {
        self.status.get()
    }

    pub fn is_finished(&self) -> bool {
        [self.capture.as_ref().map(JoinHandle::is_finished), self.producer.as_ref().map(JoinHandle::is_finished)]
            .into_iter()
            .all(|done| done.unwrap_or(true))
    }

    /// Wait for both workers. Every resource is released once this returns.
    pub fn join(mut self) -> Result<PipelineReport> {
        self.join_workers()
    }

    fn join_workers(&mut self) -> Result<PipelineReport> {
        let capture = self.capture.take().map(JoinHandle::join);
        let producer = self.producer.take().map(JoinHandle::join);

        let capture = match capture {
            Some(Ok(report)) => report,
            _ => return Err(RelayError::WorkerPanicked(CAPTURE_THREAD)),
        };
        let producer = match producer {
            Some(Ok(report)) => report,
            _ => return Err(RelayError::WorkerPanicked(PRODUCER_THREAD)),
        };
        Ok(PipelineReport { capture, producer })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.capture.is_some() || self.producer.is_some() {
            self.cancel.cancel();
            let _ = self.join_workers();
        }
    }
}

/// Build the production session for `video`: transport, then sidecar
/// estimator, then decoder, in that order
pub fn open_session<P: AsRef<Path>>(video: P, config: &RelayConfig) -> Result<Pipeline> {
    open_session_inner(video.as_ref(), config, None)
}

pub fn open_session_with_preview<P: AsRef<Path>>(
    video: P,
    config: &RelayConfig,
    preview: SlotWriter,
) -> Result<Pipeline> {
    open_session_inner(video.as_ref(), config, Some(preview))
}

fn open_session_inner(video: &Path, config: &RelayConfig, preview: Option<SlotWriter>) -> Result<Pipeline> {
    config.validate()?;
    let transport = build_transport(config)?;
    let estimator = SidecarEstimator::spawn(&config.estimator)?;
    let source = FfmpegSource::open(video, config.capture.overrides())?;
    let settings = PipelineSettings::from_config(config);
    tracing::info!(video = %video.display(), "starting pose relay session");

    match preview {
        Some(preview) => Pipeline::spawn_with_preview(source, estimator, transport, settings, preview),
        None => Pipeline::spawn(source, estimator, transport, settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::ScriptedSource;
    use crate::capture::StopReason;
    use crate::config::FrameSync;
    use crate::frame::Frame;
    use crate::pose::PoseEstimate;
    use crate::producer::tests::{MarkerEstimator, RecordingTransport};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    struct PanickingEstimator;

    impl PoseEstimator for PanickingEstimator {
        fn estimate(&mut self, _frame: &Frame) -> Result<Option<PoseEstimate>> {
            panic!("estimator blew up");
        }
    }

    fn settings(sync: FrameSync) -> PipelineSettings {
        PipelineSettings {
            capture: CaptureOptions::default(),
            producer: ProducerOptions {
                wait_poll: Duration::from_millis(10),
                frame_sync: sync,
                ..ProducerOptions::default()
            },
        }
    }

    fn endless(n: usize) -> Vec<Frame> {
        vec![Frame::filled(2, 2, [0, 0, 0]); n]
    }

    #[test]
    fn test_cancel_stops_both_workers_and_releases() {
        // ~10 minutes of video at 20 fps
        let source = ScriptedSource::new(endless(12_000), 20.0);
        let released = source.released.clone();
        let transport = RecordingTransport::default();
        let closed = transport.closed.clone();

        let pipeline = Pipeline::spawn(source, MarkerEstimator, transport, settings(FrameSync::Latest)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        pipeline.cancel();
        let report = pipeline.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.capture.reason, StopReason::Cancelled);
        assert!(released.load(Ordering::SeqCst));
        assert!(*closed.lock());
    }

    #[test]
    fn test_end_of_stream_finishes_session() {
        let source = ScriptedSource::new(endless(3), 50.0);
        let pipeline =
            Pipeline::spawn(source, MarkerEstimator, RecordingTransport::default(), settings(FrameSync::Fresh))
                .unwrap();

        let report = pipeline.join().unwrap();
        assert_eq!(report.capture.reason, StopReason::EndOfStream);
        assert_eq!(report.capture.frames_read, 3);
        assert!(report.producer.frames_processed <= 3);
    }

    #[test]
    fn test_producer_panic_is_reported() {
        let source = ScriptedSource::new(endless(12_000), 20.0);
        let released = source.released.clone();
        let pipeline = Pipeline::spawn(
            source,
            PanickingEstimator,
            RecordingTransport::default(),
            settings(FrameSync::Latest),
        )
        .unwrap();

        let err = pipeline.join().unwrap_err();
        assert!(matches!(err, RelayError::WorkerPanicked(PRODUCER_THREAD)));
        // Capture saw the cancel from the unwinding producer
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_cancels_running_session() {
        let source = ScriptedSource::new(endless(12_000), 20.0);
        let released = source.released.clone();
        let pipeline =
            Pipeline::spawn(source, MarkerEstimator, RecordingTransport::default(), settings(FrameSync::Latest))
                .unwrap();
        assert!(!pipeline.is_finished());
        drop(pipeline);
        assert!(released.load(Ordering::SeqCst));
    }
}
