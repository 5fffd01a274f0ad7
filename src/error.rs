//! Error types for PoseRelay

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for PoseRelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur in PoseRelay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to probe a video file for its stream parameters
    #[error("Failed to probe video '{path}': {reason}")]
    Probe { path: PathBuf, reason: String },

    /// Failed to spawn an external helper process
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Failed while decoding frames from a video stream
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] io::Error),

    /// Failed to read a configuration file
    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("Invalid config value for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Transport address did not resolve
    #[error("Failed to resolve '{addr}': {reason}")]
    Resolve { addr: String, reason: String },

    /// Socket setup failed
    #[error("Failed to set up socket: {0}")]
    Socket(#[source] io::Error),

    /// Failed to create a FIFO for a pipe receiver
    #[error("Failed to create FIFO '{path}': {source}")]
    FifoCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Pose estimator process misbehaved
    #[error("Pose estimator error: {0}")]
    Estimator(String),

    /// Pose estimator I/O failed
    #[error("Pose estimator I/O failed: {0}")]
    EstimatorIo(#[source] io::Error),

    /// A landmark record did not match `index|x|y|z` x 33
    #[error("Invalid landmark record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    /// Frame buffer does not match its declared size
    #[error("Frame size mismatch: expected {expected} bytes, got {got} bytes")]
    FrameSize { expected: usize, got: usize },

    /// Batch conversion output failed
    #[error("Failed to write '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A pipeline worker thread panicked
    #[error("Worker thread '{0}' panicked")]
    WorkerPanicked(&'static str),
}
