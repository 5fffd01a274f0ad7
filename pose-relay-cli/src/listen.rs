//! Receivers for both transports, for checking a stream by eye

use anyhow::{Context, Result};
use console::style;
use pose_relay::pose::{decode_landmarks, PoseLandmarks, LANDMARK_NAMES};
use pose_relay::transport::wire;
use pose_relay::{CancelToken, RelayConfig};
use std::io;
use std::net::UdpSocket;
use std::time::Duration;
#[cfg(target_os = "linux")]
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

const POLL: Duration = Duration::from_millis(500);
/// Pipe re-check interval while no writer is attached or no data is queued
#[cfg(target_os = "linux")]
const IDLE: Duration = Duration::from_millis(20);

pub fn run(config: &RelayConfig, verbose: bool, cancel: CancelToken) -> Result<()> {
    if config.transport.use_legacy_pipes {
        listen_pipe(config, verbose, &cancel)
    } else {
        listen_udp(config, verbose, &cancel)
    }
}

fn listen_udp(config: &RelayConfig, verbose: bool, cancel: &CancelToken) -> Result<()> {
    let addr = config.transport.addr();
    let socket = UdpSocket::bind(&addr).with_context(|| format!("binding {addr}"))?;
    socket.set_read_timeout(Some(POLL))?;
    println!("{} udp {}", style("Listening on").cyan().bold(), addr);

    let mut buf = vec![0u8; 64 * 1024];
    let mut count = 0u64;
    while !cancel.is_cancelled() {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e).context("receiving datagram"),
        };
        count += 1;
        match std::str::from_utf8(&buf[..n]) {
            Ok(payload) => show(count, payload, verbose),
            Err(e) => println!("{:>6}  {}", count, style(format!("not utf-8: {e}")).red()),
        }
    }
    println!("{} frames received", count);
    Ok(())
}

#[cfg(target_os = "linux")]
fn listen_pipe(config: &RelayConfig, verbose: bool, cancel: &CancelToken) -> Result<()> {
    let path = &config.transport.pipe_path;
    println!("{} pipe {}", style("Listening on").cyan().bold(), path.display());
    let count = receive_pipe(path, cancel, |count, payload| show(count, payload, verbose))?;
    println!("{} frames received", count);
    Ok(())
}

/// Read frames from the FIFO at `path` across writer sessions until
/// `cancel` fires. Returns the number of frames received.
#[cfg(target_os = "linux")]
fn receive_pipe<F>(path: &Path, cancel: &CancelToken, mut on_frame: F) -> Result<u64>
where
    F: FnMut(u64, &str),
{
    use rustix::fs::{Mode, OFlags};

    pose_relay::transport::create_fifo(path)?;

    let mut count = 0u64;
    while !cancel.is_cancelled() {
        // A non-blocking open returns at once even with no writer attached
        let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::NONBLOCK | OFlags::CLOEXEC, Mode::empty())
            .map_err(io::Error::from)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(PolledFifo {
            file: File::from(fd),
            cancel,
        });

        let mut attached = false;
        while !cancel.is_cancelled() {
            match wire::read_frame(&mut reader) {
                Ok(Some(payload)) => {
                    attached = true;
                    count += 1;
                    on_frame(count, &payload);
                }
                // End of stream means no writer: none yet, or the last one left
                Ok(None) => {
                    if std::mem::take(&mut attached) {
                        tracing::info!("writer disconnected");
                    }
                    cancel.sleep(IDLE);
                }
                Err(_) if cancel.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(error = %e, "bad frame, reopening pipe");
                    break;
                }
            }
        }
    }
    Ok(count)
}

/// FIFO read end that waits out `WouldBlock` until data arrives. Once the
/// token is cancelled it reads as end of stream.
#[cfg(target_os = "linux")]
struct PolledFifo<'a> {
    file: File,
    cancel: &'a CancelToken,
}

#[cfg(target_os = "linux")]
impl Read for PolledFifo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.cancel.sleep(IDLE) {
                        return Ok(0);
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn listen_pipe(_config: &RelayConfig, _verbose: bool, _cancel: &CancelToken) -> Result<()> {
    anyhow::bail!("pipe listening is only supported on Linux")
}

fn show(count: u64, payload: &str, verbose: bool) {
    match decode_landmarks(payload) {
        Ok(None) => println!("{:>6}  {}", count, style("no pose").dim()),
        Ok(Some(pose)) if verbose => {
            println!("{:>6}  {}", count, style("pose").green());
            print_pose(&pose);
        }
        Ok(Some(pose)) => {
            let nose = pose.0[0];
            println!(
                "{:>6}  {}  nose ({:+.3}, {:+.3}, {:+.3})",
                count,
                style("pose").green(),
                nose.x,
                nose.y,
                nose.z
            );
        }
        Err(e) => println!("{:>6}  {}", count, style(e).red()),
    }
}

fn print_pose(pose: &PoseLandmarks) {
    for (name, lm) in LANDMARK_NAMES.iter().zip(pose.iter()) {
        println!("        {:<18} {:+.4} {:+.4} {:+.4}", name, lm.x, lm.y, lm.z);
    }
}
