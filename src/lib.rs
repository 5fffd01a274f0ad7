//! PoseRelay - live body-pose landmark streaming
//!
//! Decodes a video, estimates a 33-joint body pose per frame and pushes the
//! landmarks as text to a local consumer (game engine, visualiser) over UDP
//! or a named pipe.
//!
//! # Architecture
//!
//! - **Frame Source** (`capture`): paces reads at the video's native rate and
//!   overwrites a latest-frame slot
//! - **Landmark Producer** (`producer`): takes the current frame, mirrors it,
//!   estimates the pose and sends 33 `index|x|y|z` lines
//! - **Transport** (`transport`): best-effort UDP datagrams, or a length-prefixed
//!   named pipe with rate-limited reconnects
//!
//! The two workers share nothing but the slot, a [`SourceStatus`] and a
//! [`CancelToken`]. Either one stopping cancels the other.

pub mod batch;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pose;
#[cfg(feature = "gui")]
pub mod preview;
pub mod producer;
pub mod slot;
pub mod source;
pub mod stats;
pub mod transport;

pub use cancel::CancelToken;
pub use capture::{CaptureReport, CaptureState, SourceStatus, StopReason};
pub use config::{FrameSync, RelayConfig};
pub use error::{RelayError, Result};
pub use frame::Frame;
pub use pipeline::{Pipeline, PipelineReport, PipelineSettings};
pub use pose::{PoseEstimate, PoseEstimator, PoseLandmarks};
pub use producer::ProducerReport;
pub use slot::{frame_slot, SlotReader, SlotWriter};
pub use source::VideoSource;
pub use transport::{build_transport, Transport, TransportStats};
