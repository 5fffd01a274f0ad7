//! Delivery of landmark payloads to the external consumer
//!
//! Transports are best-effort. `send` never reports failure to the caller:
//! a missing receiver or a failed write is logged, counted and dropped, and
//! the producer carries on with the next frame.

pub mod datagram;
pub mod pipe;
pub mod wire;

use crate::config::RelayConfig;
use crate::error::Result;

pub use datagram::DatagramTransport;
#[cfg(target_os = "linux")]
pub use pipe::create_fifo;
pub use pipe::{FsPipeConnector, PipeConnector, PipeStream, PipeTransport};

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sent: u64,
    pub failed: u64,
    pub connect_attempts: u64,
}

pub trait Transport: Send {
    /// Deliver one payload, best-effort
    fn send(&mut self, payload: &str);

    /// Release the handle; later sends may reopen it
    fn close(&mut self);

    fn stats(&self) -> TransportStats;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, payload: &str) {
        (**self).send(payload)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Pick the strategy once, from `transport.use_legacy_pipes`
pub fn build_transport(config: &RelayConfig) -> Result<Box<dyn Transport>> {
    let t = &config.transport;
    if t.use_legacy_pipes {
        tracing::info!(path = %t.pipe_path.display(), "using named pipe transport");
        Ok(Box::new(PipeTransport::new(
            FsPipeConnector::new(&t.pipe_path),
            t.reconnect_interval(),
        )))
    } else {
        let transport = DatagramTransport::connect(&t.addr())?;
        tracing::info!(target = %transport.peer(), "using datagram transport");
        Ok(Box::new(transport))
    }
}
