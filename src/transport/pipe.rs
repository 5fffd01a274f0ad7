//! Named-pipe transport (single host)
//!
//! The receiver may not exist yet, and may come and go. The handle is
//! opened lazily and at most once per reconnect interval:
//!
//! ```text
//! Disconnected --open ok--> Connected --write fails--> Connecting { retry_at }
//!      |                        ^                            |
//!      +--open fails--> Connecting { retry_at } --retry_at--+
//! ```
//!
//! Every frame is `u32 LE length | payload`, written as one buffer, after
//! which the stream is rewound to offset 0 where the endpoint is seekable.
//! Receivers must honour the length prefix rather than end of stream.

use super::{wire, Transport, TransportStats};
use rustix::fs::{FileType, Mode, OFlags};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A connected pipe endpoint
pub trait PipeStream: Write + Send {
    /// Return to offset 0 after a frame; no-op for non-seekable endpoints
    fn rewind(&mut self) -> io::Result<()>;
}

/// Opens the endpoint. An `Err` means "no receiver yet".
pub trait PipeConnector: Send {
    type Stream: PipeStream;

    fn connect(&mut self) -> io::Result<Self::Stream>;

    fn describe(&self) -> String;
}

enum PipeState<S> {
    Disconnected,
    Connecting { retry_at: Instant },
    Connected(S),
}

pub struct PipeTransport<C: PipeConnector> {
    connector: C,
    interval: Duration,
    state: PipeState<C::Stream>,
    last_attempt: Option<Instant>,
    stats: TransportStats,
}

impl<C: PipeConnector> PipeTransport<C> {
    pub fn new(connector: C, interval: Duration) -> Self {
        Self {
            connector,
            interval,
            state: PipeState::Disconnected,
            last_attempt: None,
            stats: TransportStats::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, PipeState::Connected(_))
    }

    fn ensure_connected(&mut self, now: Instant) -> bool {
        match &self.state {
            PipeState::Connected(_) => return true,
            PipeState::Connecting { retry_at } if now < *retry_at => return false,
            _ => {}
        }

        self.stats.connect_attempts += 1;
        self.last_attempt = Some(now);
        match self.connector.connect() {
            Ok(stream) => {
                tracing::info!(pipe = %self.connector.describe(), "pipe connected");
                self.state = PipeState::Connected(stream);
                true
            }
            Err(e) => {
                tracing::info!(pipe = %self.connector.describe(), reason = %e, "waiting for receiver");
                self.state = PipeState::Connecting {
                    retry_at: now + self.interval,
                };
                false
            }
        }
    }

    // Retry is gated on the last open attempt, not on the failure time.
    fn drop_connection(&mut self) {
        self.state = match self.last_attempt {
            Some(at) => PipeState::Connecting {
                retry_at: at + self.interval,
            },
            None => PipeState::Disconnected,
        };
    }
}

impl<C: PipeConnector> Transport for PipeTransport<C> {
    fn send(&mut self, payload: &str) {
        if !self.ensure_connected(Instant::now()) {
            return;
        }

        let PipeState::Connected(stream) = &mut self.state else {
            return;
        };
        match write_frame(stream, &wire::encode_frame(payload)) {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(pipe = %self.connector.describe(), error = %e, "pipe write failed, is the receiver open?");
                self.drop_connection();
            }
        }
    }

    fn close(&mut self) {
        if self.is_connected() {
            tracing::debug!(pipe = %self.connector.describe(), "pipe closed");
        }
        self.state = PipeState::Disconnected;
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

fn write_frame<S: PipeStream>(stream: &mut S, frame: &[u8]) -> io::Result<()> {
    stream.write_all(frame)?;
    stream.flush()?;
    stream.rewind()
}

/// File or FIFO opened through the filesystem
pub struct PipeEndpoint {
    file: File,
    seekable: bool,
}

impl Write for PipeEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl PipeStream for PipeEndpoint {
    fn rewind(&mut self) -> io::Result<()> {
        if self.seekable {
            self.file.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }
}

/// Opens a path that the receiver has created.
///
/// A FIFO is opened write-only and non-blocking, so a FIFO with no reader
/// fails with `ENXIO` instead of hanging. Any other file is opened
/// read-write, never created.
pub struct FsPipeConnector {
    path: PathBuf,
}

impl FsPipeConnector {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PipeConnector for FsPipeConnector {
    type Stream = PipeEndpoint;

    fn connect(&mut self) -> io::Result<PipeEndpoint> {
        let stat = rustix::fs::stat(&self.path)?;
        let is_fifo = FileType::from_raw_mode(stat.st_mode as _) == FileType::Fifo;

        let flags = if is_fifo {
            OFlags::WRONLY | OFlags::NONBLOCK | OFlags::CLOEXEC
        } else {
            OFlags::RDWR | OFlags::CLOEXEC
        };
        let fd = rustix::fs::open(&self.path, flags, Mode::empty())?;

        Ok(PipeEndpoint {
            file: File::from(fd),
            seekable: !is_fifo,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Create a FIFO for a receiver to listen on (mode 0600).
///
/// An existing FIFO at `path` is left as is.
#[cfg(target_os = "linux")]
pub fn create_fifo<P: AsRef<Path>>(path: P) -> crate::error::Result<()> {
    use rustix::fs::{mknodat, CWD};
    use rustix::io::Errno;

    let path = path.as_ref();
    match mknodat(CWD, path, FileType::Fifo, Mode::RUSR | Mode::WUSR, 0) {
        Ok(()) => Ok(()),
        Err(Errno::EXIST) if is_fifo(path) => Ok(()),
        Err(e) => Err(crate::error::RelayError::FifoCreate {
            path: path.to_path_buf(),
            source: e.into(),
        }),
    }
}

#[cfg(target_os = "linux")]
fn is_fifo(path: &Path) -> bool {
    rustix::fs::stat(path)
        .map(|st| FileType::from_raw_mode(st.st_mode as _) == FileType::Fifo)
        .unwrap_or(false)
}
