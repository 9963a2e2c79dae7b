//! Peer network locations
//!
//! An endpoint is where a packet for a peer gets sent: either a UDP
//! address or an already-opened byte stream. Endpoints compare
//! structurally (address tuple for UDP, remote-address string for
//! streams) so a peer behind a rebinding NAT shows up as a new endpoint
//! and replaces its own registry entry on the next observed packet.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

/// Write half of an upgraded stream connection, shared across tasks
pub type StreamConn = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// The two kinds of peer location the relay knows how to address
#[derive(Clone)]
pub enum EndpointKind {
    /// A datagram address reachable through the relay's own socket
    Udp(SocketAddr),
    /// An opened bidirectional stream plus its printable remote address
    Stream { conn: StreamConn, remote: String },
}

/// A peer's network location with an advisory last-seen timestamp
#[derive(Clone)]
pub struct Endpoint {
    kind: EndpointKind,
    last_seen: Instant,
}

impl Endpoint {
    /// Endpoint for a UDP source address
    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            kind: EndpointKind::Udp(addr),
            last_seen: Instant::now(),
        }
    }

    /// Endpoint for an upgraded stream connection
    pub fn stream(conn: StreamConn, remote: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Stream {
                conn,
                remote: remote.into(),
            },
            last_seen: Instant::now(),
        }
    }

    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    /// The UDP address, if this is a datagram endpoint
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            EndpointKind::Udp(addr) => Some(*addr),
            EndpointKind::Stream { .. } => None,
        }
    }

    /// When a packet was last observed from this endpoint. Advisory only;
    /// nothing in the relay evicts on it.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

impl PartialEq for Endpoint {
    /// Structural equality: same variant and same address (UDP) or same
    /// remote string (stream). `last_seen` does not participate.
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (EndpointKind::Udp(a), EndpointKind::Udp(b)) => a == b,
            (
                EndpointKind::Stream { remote: a, .. },
                EndpointKind::Stream { remote: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EndpointKind::Udp(addr) => write!(f, "UDP:{}", addr),
            EndpointKind::Stream { remote, .. } => write!(f, "Stream:{}", remote),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self)
    }
}
