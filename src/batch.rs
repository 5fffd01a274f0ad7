//! Offline conversion of an uploaded video
//!
//! Two independent passes over the file, each with its own decoder and
//! estimator: a skeleton animation rendered on a white canvas, and a CSV of
//! pixel-space landmark coordinates. Outputs are overwritten on re-run.

use crate::capture::effective_fps;
use crate::error::{RelayError, Result};
use crate::frame::Frame;
use crate::pose::skeleton::{draw_skeleton, DrawStyle};
use crate::pose::{PoseEstimator, PoseLandmarks};
use crate::source::{FfmpegSource, VideoSource};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

const CANVAS: [u8; 3] = [255, 255, 255];
const ENCODER_FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutputs {
    pub animation: PathBuf,
    pub csv: PathBuf,
}

/// Frame counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub frames: u64,
    pub poses: u64,
}

/// `media_root/animations/<stem>_animation.mp4` and `media_root/csv/<stem>_poses.csv`
pub fn output_paths(video: &Path, media_root: &Path) -> Result<BatchOutputs> {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::Output {
            path: video.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "video path has no file name"),
        })?;
    Ok(BatchOutputs {
        animation: media_root.join("animations").join(format!("{stem}_animation.mp4")),
        csv: media_root.join("csv").join(format!("{stem}_poses.csv")),
    })
}

/// One CSV row: `"{x}, {height - y}, {z} "` per landmark, pixel units
pub fn csv_row(image: &PoseLandmarks, width: u32, height: u32) -> String {
    let (w, h) = (width as f32, height as f32);
    let mut row = String::new();
    for lm in image.iter() {
        let x = (lm.x * w) as i64;
        let y = (lm.y * h) as i64;
        let z = (lm.z * w) as i64;
        let _ = write!(row, "{}, {}, {} ", x, height as i64 - y, z);
    }
    row
}

/// Destination for rendered frames
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalise the output
    fn finish(&mut self) -> Result<()>;
}

/// H.264 encoder fed with raw RGB24 on stdin
pub struct FfmpegEncoder {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegEncoder {
    pub fn spawn(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RelayError::Spawn {
                program: "ffmpeg".to_string(),
                source: e,
            })?;
        let stdin = child.stdin.take();
        Ok(Self {
            path: path.to_path_buf(),
            child: Some(child),
            stdin,
        })
    }

    fn output_err(&self, source: io::Error) -> RelayError {
        RelayError::Output {
            path: self.path.clone(),
            source,
        }
    }
}

impl FrameSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe));
        match stdin.and_then(|s| s.write_all(frame.data())) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.output_err(e)),
        }
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin lets ffmpeg write the trailer
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| self.output_err(e))?;
        if status.success() {
            Ok(())
        } else {
            Err(self.output_err(io::Error::new(
                io::ErrorKind::Other,
                format!("ffmpeg exited with {status}"),
            )))
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn estimate_or_skip<E: PoseEstimator + ?Sized>(estimator: &mut E, frame: &Frame) -> Option<PoseLandmarks> {
    match estimator.estimate(frame) {
        Ok(estimate) => estimate.and_then(|e| e.image),
        Err(e) => {
            tracing::warn!(error = %e, "pose estimation failed, treating frame as empty");
            None
        }
    }
}

/// Draw every frame's skeleton onto a blank canvas. Frames without a pose
/// come out blank.
pub fn render_animation<S, E, K>(source: &mut S, estimator: &mut E, sink: &mut K) -> Result<PassStats>
where
    S: VideoSource + ?Sized,
    E: PoseEstimator + ?Sized,
    K: FrameSink + ?Sized,
{
    let mut stats = PassStats::default();
    while let Some(frame) = source.read_frame()? {
        let mut canvas = Frame::filled(frame.width(), frame.height(), CANVAS);
        if let Some(image) = estimate_or_skip(estimator, &frame) {
            draw_skeleton(&mut canvas, &image, DrawStyle::ANIMATION);
            stats.poses += 1;
        }
        sink.write_frame(&canvas)?;
        stats.frames += 1;
    }
    sink.finish()?;
    Ok(stats)
}

/// Write one [`csv_row`] per frame that has a pose. Write failures are
/// reported against `dest`.
pub fn write_pose_csv<S, E, W>(source: &mut S, estimator: &mut E, out: &mut W, dest: &Path) -> Result<PassStats>
where
    S: VideoSource + ?Sized,
    E: PoseEstimator + ?Sized,
    W: Write + ?Sized,
{
    let output_err = |source: io::Error| RelayError::Output {
        path: dest.to_path_buf(),
        source,
    };

    let mut stats = PassStats::default();
    while let Some(frame) = source.read_frame()? {
        stats.frames += 1;
        if let Some(image) = estimate_or_skip(estimator, &frame) {
            writeln!(out, "{}", csv_row(&image, frame.width(), frame.height())).map_err(output_err)?;
            stats.poses += 1;
        }
    }
    out.flush().map_err(output_err)?;
    Ok(stats)
}

pub fn export_pose_csv<S, E>(source: &mut S, estimator: &mut E, path: &Path) -> Result<PassStats>
where
    S: VideoSource + ?Sized,
    E: PoseEstimator + ?Sized,
{
    let file = File::create(path).map_err(|source| RelayError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    write_pose_csv(source, estimator, &mut BufWriter::new(file), path)
}

/// Convert `video` into an animation and a CSV under `media_root`
pub fn convert_upload<F, E>(video: &Path, media_root: &Path, make_estimator: F) -> Result<BatchOutputs>
where
    F: FnMut() -> Result<E>,
    E: PoseEstimator,
{
    convert_with(
        video,
        media_root,
        |path| FfmpegSource::open(path, None),
        make_estimator,
        FfmpegEncoder::spawn,
    )
}

/// [`convert_upload`] with injectable decoder and encoder
pub fn convert_with<S, E, K, OpenS, MakeE, MakeK>(
    video: &Path,
    media_root: &Path,
    mut open_source: OpenS,
    mut make_estimator: MakeE,
    mut make_sink: MakeK,
) -> Result<BatchOutputs>
where
    S: VideoSource,
    E: PoseEstimator,
    K: FrameSink,
    OpenS: FnMut(&Path) -> Result<S>,
    MakeE: FnMut() -> Result<E>,
    MakeK: FnMut(&Path, u32, u32, f64) -> Result<K>,
{
    let outputs = output_paths(video, media_root)?;
    for dir in [&outputs.animation, &outputs.csv].into_iter().filter_map(|p| p.parent()) {
        fs::create_dir_all(dir).map_err(|source| RelayError::Output {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut source = open_source(video)?;
    let mut estimator = make_estimator()?;
    let (width, height) = source.dimensions();
    let fps = effective_fps(source.fps(), ENCODER_FALLBACK_FPS);
    let mut sink = make_sink(&outputs.animation, width, height, fps)?;
    let animated = render_animation(&mut source, &mut estimator, &mut sink)?;
    source.release();
    tracing::info!(path = %outputs.animation.display(), frames = animated.frames, poses = animated.poses, "animation written");

    let mut source = open_source(video)?;
    let mut estimator = make_estimator()?;
    let exported = export_pose_csv(&mut source, &mut estimator, &outputs.csv)?;
    source.release();
    tracing::info!(path = %outputs.csv.display(), rows = exported.poses, "pose csv written");

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::ScriptedSource;
    use crate::pose::tests::sample_pose;
    use crate::pose::{Landmark, PoseEstimate, LANDMARK_COUNT};

    /// Pose on every other frame, starting with the first
    struct AlternatingEstimator {
        calls: usize,
    }

    impl PoseEstimator for AlternatingEstimator {
        fn estimate(&mut self, _frame: &Frame) -> Result<Option<PoseEstimate>> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Ok(Some(PoseEstimate {
                    world: sample_pose(0.0),
                    image: Some(PoseLandmarks([Landmark::new(0.5, 0.25, -0.1); LANDMARK_COUNT])),
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[derive(Default)]
    struct MemorySink {
        frames: Vec<Frame>,
        finished: bool,
    }

    impl FrameSink for MemorySink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn frames(n: usize, w: u32, h: u32) -> Vec<Frame> {
        vec![Frame::filled(w, h, [10, 20, 30]); n]
    }

    #[test]
    fn test_output_paths() {
        let out = output_paths(Path::new("/uploads/dance.mov"), Path::new("/media")).unwrap();
        assert_eq!(out.animation, PathBuf::from("/media/animations/dance_animation.mp4"));
        assert_eq!(out.csv, PathBuf::from("/media/csv/dance_poses.csv"));
        assert!(output_paths(Path::new("/"), Path::new("/media")).is_err());
    }

    #[test]
    fn test_csv_row_flips_y_and_truncates() {
        let pose = PoseLandmarks([Landmark::new(0.5, 0.25, -0.1); LANDMARK_COUNT]);
        let row = csv_row(&pose, 640, 480);
        // x = 320, y = 480 - 120, z = trunc(-64.0)
        assert_eq!(row, "320, 360, -64 ".repeat(LANDMARK_COUNT));
    }

    #[test]
    fn test_csv_skips_frames_without_pose() {
        let mut source = ScriptedSource::new(frames(5, 640, 480), 25.0);
        let mut estimator = AlternatingEstimator { calls: 0 };
        let mut out = Vec::new();

        let stats = write_pose_csv(&mut source, &mut estimator, &mut out, Path::new("poses.csv")).unwrap();
        assert_eq!(stats, PassStats { frames: 5, poses: 3 });

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|l| l.starts_with("320, 360, -64 ")));
    }

    #[test]
    fn test_csv_keeps_decoder_error_variant() {
        let mut source = ScriptedSource::new(frames(5, 8, 8), 25.0);
        source.fail_after = Some(2);
        let mut estimator = AlternatingEstimator { calls: 0 };
        let mut out = Vec::new();

        let err = write_pose_csv(&mut source, &mut estimator, &mut out, Path::new("poses.csv")).unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_csv_write_failure_names_destination() {
        struct Full;

        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut source = ScriptedSource::new(frames(1, 8, 8), 25.0);
        let mut estimator = AlternatingEstimator { calls: 0 };
        let err = write_pose_csv(&mut source, &mut estimator, &mut Full, Path::new("out/poses.csv")).unwrap_err();
        match err {
            RelayError::Output { path, .. } => assert_eq!(path, PathBuf::from("out/poses.csv")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_animation_emits_every_frame() {
        let mut source = ScriptedSource::new(frames(4, 32, 32), 25.0);
        let mut estimator = AlternatingEstimator { calls: 0 };
        let mut sink = MemorySink::default();

        let stats = render_animation(&mut source, &mut estimator, &mut sink).unwrap();
        assert_eq!(stats, PassStats { frames: 4, poses: 2 });
        assert!(sink.finished);

        let blank = Frame::filled(32, 32, CANVAS);
        assert_ne!(sink.frames[0], blank);
        assert_eq!(sink.frames[1], blank);
        // All landmarks sit at (16, 8): a blue joint
        assert_eq!(sink.frames[0].pixel(16, 8), Some(DrawStyle::ANIMATION.joint));
    }

    #[test]
    fn test_convert_writes_both_outputs() {
        let media = tempfile::tempdir().unwrap();
        let video = Path::new("/uploads/jump.mp4");
        let mut opened = 0;
        let mut rendered = 0;

        let outputs = convert_with(
            video,
            media.path(),
            |_| {
                opened += 1;
                Ok(ScriptedSource::new(frames(3, 16, 16), 0.0))
            },
            || Ok(AlternatingEstimator { calls: 0 }),
            |path, w, h, fps| {
                assert_eq!(path, media.path().join("animations/jump_animation.mp4"));
                assert_eq!((w, h, fps), (2, 2, ENCODER_FALLBACK_FPS));
                rendered += 1;
                Ok(MemorySink::default())
            },
        )
        .unwrap();

        assert_eq!(opened, 2);
        assert_eq!(rendered, 1);
        assert!(outputs.animation.parent().unwrap().is_dir());
        let csv = fs::read_to_string(&outputs.csv).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn test_convert_overwrites_existing_csv() {
        let media = tempfile::tempdir().unwrap();
        let video = Path::new("clip.mp4");
        fs::create_dir_all(media.path().join("csv")).unwrap();
        fs::write(media.path().join("csv/clip_poses.csv"), "stale\nstale\nstale\nstale\n").unwrap();

        let outputs = convert_with(
            video,
            media.path(),
            |_| Ok(ScriptedSource::new(frames(1, 8, 8), 30.0)),
            || Ok(AlternatingEstimator { calls: 0 }),
            |_, _, _, _| Ok(MemorySink::default()),
        )
        .unwrap();
        let csv = fs::read_to_string(outputs.csv).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(!csv.contains("stale"));
    }
}
