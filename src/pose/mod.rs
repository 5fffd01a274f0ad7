//! Pose landmarks, their text record format, and the estimator seam
//!
//! # Record format
//! One line per joint, `index|x|y|z\n`, indices 0..=32 in order.
//! A frame without a pose is the empty string.

pub mod sidecar;
pub mod skeleton;

use crate::error::{RelayError, Result};
use crate::frame::Frame;
use std::fmt::Write;

/// Joints per pose (MediaPipe BlazePose topology)
pub const LANDMARK_COUNT: usize = 33;

/// Joint names, indexed like the record lines
pub const LANDMARK_NAMES: [&str; LANDMARK_COUNT] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// A full set of joints for one detected person
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseLandmarks(pub [Landmark; LANDMARK_COUNT]);

impl PoseLandmarks {
    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.0.get(index)
    }

    /// Build from a list of `[x, y, z]`; the list must hold exactly 33 joints
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        if points.len() != LANDMARK_COUNT {
            return None;
        }
        let mut joints = [Landmark::default(); LANDMARK_COUNT];
        for (joint, point) in joints.iter_mut().zip(points) {
            *joint = Landmark::from(*point);
        }
        Some(Self(joints))
    }
}

/// What the model reports for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Metric, hip-centred coordinates; this is what gets streamed
    pub world: PoseLandmarks,
    /// Normalised image coordinates, used for drawing and CSV export
    pub image: Option<PoseLandmarks>,
}

/// A per-frame pose model.
///
/// `Ok(None)` means no person was found; that is a normal outcome.
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseEstimate>>;
}

impl<E: PoseEstimator + ?Sized> PoseEstimator for Box<E> {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseEstimate>> {
        (**self).estimate(frame)
    }
}

/// Serialise a pose to the record format; `None` gives `""`
pub fn encode_landmarks(pose: Option<&PoseLandmarks>) -> String {
    let Some(pose) = pose else {
        return String::new();
    };
    let mut out = String::with_capacity(LANDMARK_COUNT * 40);
    for (i, lm) in pose.iter().enumerate() {
        // Writing into a String cannot fail
        let _ = writeln!(out, "{}|{}|{}|{}", i, lm.x, lm.y, lm.z);
    }
    out
}

/// Parse a record block back into landmarks; `""` gives `None`
pub fn decode_landmarks(payload: &str) -> Result<Option<PoseLandmarks>> {
    if payload.is_empty() {
        return Ok(None);
    }

    let mut joints = [Landmark::default(); LANDMARK_COUNT];
    let mut count = 0;
    for (line_no, line) in payload.lines().enumerate() {
        if count == LANDMARK_COUNT {
            return Err(RelayError::InvalidRecord {
                line: line_no,
                reason: format!("more than {} joints", LANDMARK_COUNT),
            });
        }

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 4 {
            return Err(RelayError::InvalidRecord {
                line: line_no,
                reason: format!("expected 4 fields, got {}", fields.len()),
            });
        }

        let index: usize = fields[0].parse().map_err(|_| RelayError::InvalidRecord {
            line: line_no,
            reason: format!("bad index '{}'", fields[0]),
        })?;
        if index != count {
            return Err(RelayError::InvalidRecord {
                line: line_no,
                reason: format!("expected index {}, got {}", count, index),
            });
        }

        let mut coords = [0f32; 3];
        for (slot, field) in coords.iter_mut().zip(&fields[1..]) {
            *slot = field.parse().map_err(|_| RelayError::InvalidRecord {
                line: line_no,
                reason: format!("bad coordinate '{}'", field),
            })?;
        }
        joints[count] = Landmark::from(coords);
        count += 1;
    }

    if count != LANDMARK_COUNT {
        return Err(RelayError::InvalidRecord {
            line: count,
            reason: format!("expected {} joints, got {}", LANDMARK_COUNT, count),
        });
    }
    Ok(Some(PoseLandmarks(joints)))
}
