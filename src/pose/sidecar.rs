//! Pose estimation in an external model process
//!
//! The sidecar is spawned once and kept alive for the whole session.
//!
//! # Protocol
//! Request (stdin), per frame:
//! `u32 LE width | u32 LE height | u32 LE byte length | RGB24 bytes`
//!
//! Reply (stdout), one JSON line per frame:
//! `{"world": [[x, y, z], ...33] | null, "image": [[x, y, z], ...33] | null}`

use super::{PoseEstimate, PoseEstimator, PoseLandmarks};
use crate::config::EstimatorConfig;
use crate::error::{RelayError, Result};
use crate::frame::Frame;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    world: Option<Vec<[f32; 3]>>,
    #[serde(default)]
    image: Option<Vec<[f32; 3]>>,
}

pub struct SidecarEstimator {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl SidecarEstimator {
    /// Spawn the configured command with the model thresholds appended
    pub fn spawn(config: &EstimatorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| RelayError::Estimator("empty estimator command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--min-detection-confidence")
            .arg(config.min_detection_confidence.to_string())
            .arg("--min-tracking-confidence")
            .arg(config.min_tracking_confidence.to_string())
            .arg("--model-complexity")
            .arg(config.model_complexity.to_string());

        Self::from_command(cmd)
    }

    pub fn from_command(mut cmd: Command) -> Result<Self> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| RelayError::Spawn {
            program: program.clone(),
            source: e,
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RelayError::Estimator(format!(
                    "'{}' started without piped stdio",
                    program
                )));
            }
        };

        tracing::info!(program = %program, pid = child.id(), "pose sidecar started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    fn send_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        let mut header = [0u8; 12];
        header[0..4].copy_from_slice(&frame.width().to_le_bytes());
        header[4..8].copy_from_slice(&frame.height().to_le_bytes());
        header[8..12].copy_from_slice(&(frame.data().len() as u32).to_le_bytes());
        self.stdin.write_all(&header)?;
        self.stdin.write_all(frame.data())?;
        self.stdin.flush()
    }
}

impl PoseEstimator for SidecarEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseEstimate>> {
        self.send_frame(frame).map_err(RelayError::EstimatorIo)?;

        self.line.clear();
        let n = self
            .stdout
            .read_line(&mut self.line)
            .map_err(RelayError::EstimatorIo)?;
        if n == 0 {
            return Err(RelayError::Estimator("sidecar closed its output".to_string()));
        }
        parse_reply(&self.line)
    }
}

impl Drop for SidecarEstimator {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decode one reply line
pub fn parse_reply(line: &str) -> Result<Option<PoseEstimate>> {
    let reply: Reply = serde_json::from_str(line.trim())
        .map_err(|e| RelayError::Estimator(format!("bad reply: {}", e)))?;

    let Some(world) = reply.world else {
        return Ok(None);
    };
    let world = PoseLandmarks::from_points(&world).ok_or_else(|| {
        RelayError::Estimator(format!("world pose has {} joints", world.len()))
    })?;
    let image = match reply.image {
        Some(points) => Some(PoseLandmarks::from_points(&points).ok_or_else(|| {
            RelayError::Estimator(format!("image pose has {} joints", points.len()))
        })?),
        None => None,
    };
    Ok(Some(PoseEstimate { world, image }))
}
