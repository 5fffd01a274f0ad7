//! End-to-end sessions over fake video and pose model

use parking_lot::Mutex;
use pose_relay::pose::{decode_landmarks, Landmark, LANDMARK_COUNT};
use pose_relay::transport::DatagramTransport;
use pose_relay::{
    Frame, FrameSync, Pipeline, PipelineSettings, PoseEstimate, PoseEstimator, PoseLandmarks, Result, StopReason,
    Transport, TransportStats, VideoSource,
};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

const BRIGHT: [u8; 3] = [255, 255, 255];
const DARK: [u8; 3] = [0, 0, 0];

struct FakeVideo {
    frames: std::vec::IntoIter<Frame>,
    fps: f64,
}

impl FakeVideo {
    fn new(colours: &[[u8; 3]], fps: f64) -> Self {
        let frames: Vec<Frame> = colours.iter().map(|&c| Frame::filled(8, 6, c)).collect();
        Self {
            frames: frames.into_iter(),
            fps,
        }
    }
}

impl VideoSource for FakeVideo {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (8, 6)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.next())
    }

    fn release(&mut self) {}
}

/// Finds a person in bright frames only
struct BrightnessEstimator;

impl PoseEstimator for BrightnessEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseEstimate>> {
        if frame.pixel(0, 0) != Some(BRIGHT) {
            return Ok(None);
        }
        let mut joints = [Landmark::default(); LANDMARK_COUNT];
        for (i, joint) in joints.iter_mut().enumerate() {
            *joint = Landmark::new(i as f32 * 0.1, 1.0, -0.25);
        }
        Ok(Some(PoseEstimate {
            world: PoseLandmarks(joints),
            image: None,
        }))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<String>>>,
}

impl Transport for Recorder {
    fn send(&mut self, payload: &str) {
        self.sent.lock().push(payload.to_string());
    }

    fn close(&mut self) {}

    fn stats(&self) -> TransportStats {
        TransportStats {
            sent: self.sent.lock().len() as u64,
            ..TransportStats::default()
        }
    }
}

fn fresh_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.producer.frame_sync = FrameSync::Fresh;
    settings.producer.wait_poll = Duration::from_millis(5);
    settings
}

#[test]
fn three_frame_session_sends_pose_gap_pose() {
    let video = FakeVideo::new(&[BRIGHT, DARK, BRIGHT], 20.0);
    let recorder = Recorder::default();

    let pipeline = Pipeline::spawn(video, BrightnessEstimator, recorder.clone(), fresh_settings()).unwrap();
    let report = pipeline.join().unwrap();

    assert_eq!(report.capture.reason, StopReason::EndOfStream);
    assert_eq!(report.capture.frames_read, 3);
    assert_eq!(report.producer.frames_processed, 3);
    assert_eq!(report.producer.poses_detected, 2);

    let sent = recorder.sent.lock();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].lines().count(), LANDMARK_COUNT);
    assert_eq!(sent[1], "");
    assert_eq!(sent[2].lines().count(), LANDMARK_COUNT);
    assert_eq!(sent[0].lines().nth(2), Some("2|0.2|1|-0.25"));
}

#[test]
fn session_over_udp_delivers_every_frame() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let transport = DatagramTransport::connect(&receiver.local_addr().unwrap().to_string()).unwrap();

    let video = FakeVideo::new(&[DARK, BRIGHT, BRIGHT, DARK], 20.0);
    let pipeline = Pipeline::spawn(video, BrightnessEstimator, transport, fresh_settings()).unwrap();
    let report = pipeline.join().unwrap();
    assert_eq!(report.producer.transport.sent, 4);

    let mut buf = vec![0u8; 64 * 1024];
    let mut poses = Vec::new();
    for _ in 0..4 {
        let n = receiver.recv(&mut buf).unwrap();
        let payload = std::str::from_utf8(&buf[..n]).unwrap();
        poses.push(decode_landmarks(payload).unwrap().is_some());
    }
    assert_eq!(poses, vec![false, true, true, false]);
}

#[test]
fn cancelling_a_long_session_returns_promptly() {
    let video = FakeVideo::new(&vec![DARK; 10_000], 20.0);
    let recorder = Recorder::default();
    let pipeline = Pipeline::spawn(video, BrightnessEstimator, recorder.clone(), PipelineSettings::default()).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    let token = pipeline.cancel_token();
    token.cancel();

    let start = std::time::Instant::now();
    let report = pipeline.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.capture.reason, StopReason::Cancelled);
    assert!(report.capture.frames_read < 10_000);
    assert!(recorder.sent.lock().iter().all(|p| p.is_empty()));
}
