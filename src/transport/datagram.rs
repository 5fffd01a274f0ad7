//! Connectionless datagram transport
//!
//! One payload per datagram, no acknowledgement, no fragmentation handling.
//! A 33-joint record is ~1-2 KB, well inside a single UDP datagram.

use super::{Transport, TransportStats};
use crate::error::{RelayError, Result};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

#[derive(Debug)]
pub struct DatagramTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    stats: TransportStats,
}

impl DatagramTransport {
    /// Resolve `addr` and associate a fresh ephemeral socket with it
    pub fn connect(addr: &str) -> Result<Self> {
        let peer = addr
            .to_socket_addrs()
            .map_err(|e| RelayError::Resolve {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| RelayError::Resolve {
                addr: addr.to_string(),
                reason: "no addresses".to_string(),
            })?;

        let bind: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(RelayError::Socket)?;
        socket.connect(peer).map_err(RelayError::Socket)?;

        Ok(Self {
            socket,
            peer,
            stats: TransportStats::default(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

impl Transport for DatagramTransport {
    fn send(&mut self, payload: &str) {
        match self.socket.send(payload.as_bytes()) {
            Ok(_) => self.stats.sent += 1,
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(peer = %self.peer, error = %e, bytes = payload.len(), "datagram dropped");
            }
        }
    }

    fn close(&mut self) {
        tracing::debug!(peer = %self.peer, sent = self.stats.sent, "datagram transport closed");
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}
