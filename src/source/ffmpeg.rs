//! Video file decoding through the `ffmpeg` / `ffprobe` binaries
//!
//! Frames arrive as packed RGB24 on ffmpeg's stdout, one exact-size
//! chunk per frame. ffmpeg applies the container's rotation while decoding,
//! so [`StreamInfo`] reports the displayed size, not the coded one.

use super::VideoSource;
use crate::config::CaptureOverrides;
use crate::error::{RelayError, Result};
use crate::frame::Frame;
use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Stream parameters reported by `ffprobe`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Display rotation in degrees, normalised to 0, 90, 180 or 270
    pub rotation: u32,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

/// Older muxers store rotation as a `rotate` tag
#[derive(Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

/// Newer ffprobe reports the display matrix rotation here
#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        normalize_rotation(degrees)
    }
}

pub struct FfmpegSource {
    path: PathBuf,
    info: StreamInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buf: Vec<u8>,
}

impl FfmpegSource {
    /// Probe and start decoding `path`, applying `overrides` if given
    pub fn open<P: AsRef<Path>>(path: P, overrides: Option<CaptureOverrides>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let probed = probe(&path)?;

        let info = match overrides {
            // The scale filter runs after autorotation
            Some(o) => StreamInfo {
                width: o.width,
                height: o.height,
                fps: o.fps as f64,
                rotation: probed.rotation,
            },
            None => probed,
        };

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-nostdin")
            .arg("-i")
            .arg(&path);
        if let Some(o) = overrides {
            cmd.arg("-vf")
                .arg(format!("scale={}:{}", o.width, o.height))
                .arg("-r")
                .arg(o.fps.to_string());
        }
        cmd.arg("-an")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| RelayError::Spawn {
            program: "ffmpeg".to_string(),
            source: e,
        })?;
        let stdout = child.stdout.take();

        tracing::info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            rotation = info.rotation,
            custom = overrides.is_some(),
            "opened video"
        );

        Ok(Self {
            path,
            buf: vec![0u8; Frame::byte_len(info.width, info.height)],
            info,
            child: Some(child),
            stdout,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        match stdout.read_exact(&mut self.buf) {
            Ok(()) => Frame::from_rgb(self.info.width, self.info.height, self.buf.clone()).map(Some),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(RelayError::Decode(e)),
        }
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(path = %self.path.display(), "released video");
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Ask `ffprobe` for the first video stream's size and frame rate
pub fn probe(path: &Path) -> Result<StreamInfo> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,r_frame_rate:stream_tags=rotate:stream_side_data=rotation")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| RelayError::Spawn {
            program: "ffprobe".to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(RelayError::Probe {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    parse_probe(path, &output.stdout)
}

fn parse_probe(path: &Path, json: &[u8]) -> Result<StreamInfo> {
    let fail = |reason: String| RelayError::Probe {
        path: path.to_path_buf(),
        reason,
    };

    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| fail(format!("bad ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| fail("no video stream".to_string()))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            let rotation = stream.rotation();
            let (width, height) = if rotation % 180 == 90 {
                (height, width)
            } else {
                (width, height)
            };
            Ok(StreamInfo {
                width,
                height,
                fps: stream
                    .r_frame_rate
                    .as_deref()
                    .map(parse_frame_rate)
                    .unwrap_or(0.0),
                rotation,
            })
        }
        _ => Err(fail("missing frame size".to_string())),
    }
}

/// Snap to the nearest quarter turn in `0..360`
fn normalize_rotation(degrees: f64) -> u32 {
    if !degrees.is_finite() {
        return 0;
    }
    let quarter_turns = (degrees / 90.0).round().rem_euclid(4.0);
    quarter_turns as u32 * 90
}

/// `"30000/1001"` or `"25"` to frames per second; unusable input gives 0
pub fn parse_frame_rate(s: &str) -> f64 {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => s.trim().parse().unwrap_or(0.0),
    };
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
        assert_eq!(parse_frame_rate("n/a"), 0.0);
        assert_eq!(parse_frame_rate("-5/1"), 0.0);
    }

    #[test]
    fn test_parse_probe() {
        let json = br#"{"streams": [{"width": 640, "height": 480, "r_frame_rate": "60/1"}]}"#;
        let info = parse_probe(Path::new("clip.mp4"), json).unwrap();
        assert_eq!(
            info,
            StreamInfo {
                width: 640,
                height: 480,
                fps: 60.0,
                rotation: 0
            }
        );
    }

    #[test]
    fn test_parse_probe_rotated_side_data_swaps_size() {
        let json = br#"{"streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1",
            "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}]}"#;
        let info = parse_probe(Path::new("phone.mp4"), json).unwrap();
        assert_eq!((info.width, info.height, info.rotation), (1080, 1920, 270));
        assert_eq!(Frame::byte_len(info.width, info.height), 1080 * 1920 * 3);
    }

    #[test]
    fn test_parse_probe_rotate_tag() {
        let json = br#"{"streams": [{"width": 1280, "height": 720, "tags": {"rotate": "90"}}]}"#;
        let info = parse_probe(Path::new("old.mov"), json).unwrap();
        assert_eq!((info.width, info.height, info.rotation), (720, 1280, 90));

        let json = br#"{"streams": [{"width": 1280, "height": 720, "tags": {"rotate": "180"}}]}"#;
        let info = parse_probe(Path::new("flipped.mov"), json).unwrap();
        assert_eq!((info.width, info.height, info.rotation), (1280, 720, 180));
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0.0), 0);
        assert_eq!(normalize_rotation(-90.0), 270);
        assert_eq!(normalize_rotation(90.00001), 90);
        assert_eq!(normalize_rotation(450.0), 90);
        assert_eq!(normalize_rotation(f64::NAN), 0);
    }

    #[test]
    fn test_parse_probe_unknown_rate() {
        let json = br#"{"streams": [{"width": 2, "height": 2}]}"#;
        assert_eq!(parse_probe(Path::new("x"), json).unwrap().fps, 0.0);
    }

    #[test]
    fn test_parse_probe_without_video() {
        let err = parse_probe(Path::new("audio.wav"), br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, RelayError::Probe { .. }));
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(FfmpegSource::open("/nonexistent/clip.mp4", None).is_err());
    }
}
