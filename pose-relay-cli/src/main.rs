//! PoseRelay CLI - stream, convert and inspect pose landmarks
//!
//! Layout:
//!   - main.rs: argument parsing, interactive mode, session wiring
//!   - listen.rs: receivers that decode what the transports emit

mod listen;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use inquire::{Confirm, Select, Text};
use pose_relay::batch;
use pose_relay::pose::sidecar::SidecarEstimator;
use pose_relay::{CancelToken, FrameSync, PipelineReport, RelayConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "pose_relay.toml";

#[derive(Parser)]
#[command(name = "pose-relay")]
#[command(about = "Live body-pose landmark streaming", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream landmarks from a video to the configured transport
    Stream {
        /// Video file to play
        video: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Show the annotated frames in a window (needs the `gui` feature)
        #[arg(long)]
        preview: bool,
    },

    /// Render a skeleton animation and a landmark CSV for a video
    Convert {
        /// Video file to convert
        video: PathBuf,

        /// Directory that receives animations/ and csv/
        #[arg(short, long, default_value = "media")]
        media_root: PathBuf,

        /// Config file (estimator settings)
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Print frames arriving from a running stream
    Listen {
        #[command(flatten)]
        overrides: Overrides,

        /// Print every landmark instead of a one-line summary
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Flags layered over the config file
#[derive(Args, Clone, Default)]
struct Overrides {
    /// Config file; missing means defaults
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Rate logging and preview frames
    #[arg(short, long)]
    debug: bool,

    /// Named pipe instead of UDP
    #[arg(long)]
    pipe: bool,

    /// Named pipe path
    #[arg(long)]
    pipe_path: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Process each captured frame at most once
    #[arg(long)]
    fresh: bool,
}

impl Overrides {
    fn load(&self) -> Result<RelayConfig> {
        let mut config = RelayConfig::load_or_default(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        config.debug |= self.debug;
        config.transport.use_legacy_pipes |= self.pipe;
        if let Some(path) = &self.pipe_path {
            config.transport.pipe_path = path.clone();
        }
        if let Some(host) = &self.host {
            config.transport.host = host.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if self.fresh {
            config.producer.frame_sync = FrameSync::Fresh;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Stream {
            video,
            overrides,
            preview,
        }) => {
            let config = overrides.load()?;
            init_tracing(config.debug);
            stream(&video, &config, preview)
        }
        Some(Commands::Convert {
            video,
            media_root,
            config,
        }) => {
            let config = RelayConfig::load_or_default(&config)?;
            init_tracing(config.debug);
            convert(&video, &media_root, &config)
        }
        Some(Commands::Listen { overrides, verbose }) => {
            let config = overrides.load()?;
            init_tracing(config.debug);
            listen::run(&config, verbose, ctrlc_token()?)
        }
        None => run_interactive_mode(),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

/// Token cancelled by the first Ctrl-C; a second one exits immediately
fn ctrlc_token() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || {
        if handler.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("{}", style("Stopping... (Ctrl-C again to force)").yellow());
        handler.cancel();
    })
    .context("installing Ctrl-C handler")?;
    Ok(token)
}

// ═══════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════

fn stream(video: &Path, config: &RelayConfig, preview: bool) -> Result<()> {
    print_header();
    println!("   Video:     {}", style(video.display()).green());
    if config.transport.use_legacy_pipes {
        println!("   Transport: {}", style(format!("pipe {}", config.transport.pipe_path.display())).green());
    } else {
        println!("   Transport: {}", style(format!("udp {}", config.transport.addr())).green());
    }
    println!();

    let report = if preview {
        stream_with_preview(video, config)?
    } else {
        let pipeline = pose_relay::pipeline::open_session(video, config)
            .with_context(|| format!("starting session for {}", video.display()))?;
        let stop = ctrlc_token()?;
        let session = pipeline.cancel_token();
        // Bridge Ctrl-C into the session without holding the pipeline
        std::thread::spawn(move || {
            while !session.is_cancelled() {
                if stop.sleep(std::time::Duration::from_millis(200)) {
                    session.cancel();
                }
            }
        });
        pipeline.join()?
    };

    print_report(&report);
    Ok(())
}

#[cfg(feature = "gui")]
fn stream_with_preview(video: &Path, config: &RelayConfig) -> Result<PipelineReport> {
    let mut config = config.clone();
    config.debug = true;
    let (writer, reader) = pose_relay::frame_slot();
    let pipeline = pose_relay::pipeline::open_session_with_preview(video, &config, writer)
        .with_context(|| format!("starting session for {}", video.display()))?;

    let size = if config.capture.use_custom_settings {
        (config.capture.width, config.capture.height)
    } else {
        (960, 720)
    };
    if let Err(e) = pose_relay::preview::run_preview(reader, pipeline.cancel_token(), size) {
        tracing::warn!(error = %e, "preview window failed");
        pipeline.cancel();
    }
    Ok(pipeline.join()?)
}

#[cfg(not(feature = "gui"))]
fn stream_with_preview(_video: &Path, _config: &RelayConfig) -> Result<PipelineReport> {
    bail!("--preview needs a build with the `gui` feature")
}

fn convert(video: &Path, media_root: &Path, config: &RelayConfig) -> Result<()> {
    if !video.is_file() {
        bail!("{} is not a file", video.display());
    }
    println!("{} {}", style("Converting").cyan().bold(), video.display());

    let outputs = batch::convert_upload(video, media_root, || SidecarEstimator::spawn(&config.estimator))
        .with_context(|| format!("converting {}", video.display()))?;

    println!("   Animation: {}", style(outputs.animation.display()).green());
    println!("   CSV:       {}", style(outputs.csv.display()).green());
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!();
    println!("{}", style("═══════════════════════════════════════════").cyan());
    println!("{}", style("Session Summary").cyan().bold());
    println!("{}", style("═══════════════════════════════════════════").cyan());
    println!("   Stopped:      {:?}", report.capture.reason);
    println!("   Frames read:  {} @ {:.1} fps", report.capture.frames_read, report.capture.fps);
    println!("   Processed:    {}", report.producer.frames_processed);
    println!("   With pose:    {}", report.producer.poses_detected);
    println!(
        "   Sent/failed:  {}/{}",
        style(report.producer.transport.sent).green(),
        style(report.producer.transport.failed).red()
    );
    if report.producer.transport.connect_attempts > 0 {
        println!("   Pipe opens:   {}", report.producer.transport.connect_attempts);
    }
    println!("{}", style("═══════════════════════════════════════════").cyan());
}

// ═══════════════════════════════════════════════════════════════════════════
// Interactive Mode
// ═══════════════════════════════════════════════════════════════════════════

fn run_interactive_mode() -> Result<()> {
    print_header();

    let actions = vec!["Stream a video", "Convert a video", "Listen for landmarks"];
    let Ok(action) = Select::new("What to run:", actions)
        .with_help_message("↑↓ to move, Enter to select")
        .prompt()
    else {
        return Ok(());
    };

    let mut overrides = Overrides {
        config: PathBuf::from(DEFAULT_CONFIG),
        ..Overrides::default()
    };

    match action {
        "Convert a video" => {
            let Some(video) = prompt_video() else {
                return Ok(());
            };
            let media_root = Text::new("Media root:").with_default("media").prompt()?;
            let config = RelayConfig::load_or_default(DEFAULT_CONFIG)?;
            init_tracing(false);
            convert(&video, Path::new(&media_root), &config)
        }
        "Listen for landmarks" => {
            overrides.pipe = Confirm::new("Use the named pipe?").with_default(false).prompt()?;
            let config = overrides.load()?;
            init_tracing(false);
            listen::run(&config, false, ctrlc_token()?)
        }
        _ => {
            let Some(video) = prompt_video() else {
                return Ok(());
            };
            overrides.pipe = Confirm::new("Use the named pipe?").with_default(false).prompt()?;
            overrides.debug = Confirm::new("Debug logging?").with_default(false).prompt()?;
            let config = overrides.load()?;
            init_tracing(config.debug);
            stream(&video, &config, false)
        }
    }
}

fn prompt_video() -> Option<PathBuf> {
    let path = Text::new("Video file:")
        .with_help_message("Path to a video readable by ffmpeg")
        .prompt()
        .ok()?;
    if path.trim().is_empty() {
        println!("{}", style("Video path cannot be empty").red());
        return None;
    }
    Some(PathBuf::from(path.trim()))
}

fn print_header() {
    println!();
    println!("{}", style("PoseRelay").magenta().bold());
    println!("{}", style("33 landmarks per frame, straight to your engine").dim());
    println!();
}
