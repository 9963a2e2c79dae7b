//! Keyed-frame relay client abstraction
//!
//! The gateway does not care how frames reach the relay service, only
//! that it can send a payload to a public key and receive payloads
//! tagged with their source key. These traits are that seam: the
//! binaries plug in the real service client, tests plug in an
//! in-process loopback.

use anyhow::Result;
use async_trait::async_trait;

use crate::identity::{PrivateKey, PublicKey};

/// Messages surfaced by a relay session.
///
/// Only `ReceivedPacket` carries peer payload; everything else is
/// service chatter the gateway observes and discards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// A frame from a peer, tagged with the sender's public key
    ReceivedPacket { source: PublicKey, data: Vec<u8> },
    /// Idle-channel keepalive from the service
    KeepAlive,
    /// Post-handshake service information
    ServerInfo,
    /// A peer disconnected from the service
    PeerGone(PublicKey),
    /// Liveness probe from the service
    Ping([u8; 8]),
    /// Answer to a liveness probe
    Pong([u8; 8]),
    /// Service health report
    Health,
}

/// An open session to the keyed-frame relay service.
///
/// Sends are at-most-once best-effort; the service may drop or reorder
/// frames. `close` is idempotent and causes a pending `recv` to fail
/// promptly.
#[async_trait]
pub trait RelayClient: Send + Sync + 'static {
    /// Send `payload` addressed to `remote`
    async fn send(&self, remote: &PublicKey, payload: &[u8]) -> Result<()>;

    /// Block until the next message or session failure
    async fn recv(&self) -> Result<RelayMessage>;

    /// Tear down the session, unblocking any pending `recv`
    async fn close(&self);
}

/// Opens relay sessions. The session is bound to `key`; the service
/// routes inbound frames on its public half.
#[async_trait]
pub trait RelayDial: Send + Sync {
    type Client: RelayClient;

    async fn dial(&self, key: &PrivateKey, url: &str) -> Result<Self::Client>;
}
