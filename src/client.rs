//! Client-side UDP forwarder
//!
//! A deliberately simple validation collaborator: one socket, one local
//! WireGuard peer, one remote relay server. The local peer's address is
//! learned from the first packet that does not come from the server;
//! after that, server traffic goes to the peer and peer traffic goes to
//! the server.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const RECV_BUF_SIZE: usize = 2048;

/// Single-peer UDP↔UDP forwarder
pub struct Forwarder {
    socket: UdpSocket,
    server_addr: SocketAddr,
    peer_addr: RwLock<Option<SocketAddr>>,
}

impl Forwarder {
    /// Bind the local socket and resolve the relay server address
    pub async fn bind(listen_addr: &str, server_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", listen_addr))?;

        let server_addr = tokio::net::lookup_host(server_addr)
            .await
            .with_context(|| format!("failed to resolve server address {}", server_addr))?
            .next()
            .with_context(|| format!("no addresses for {}", server_addr))?;

        info!(
            "forwarder listening on {} for relay server {}",
            socket.local_addr()?,
            server_addr
        );

        Ok(Self {
            socket,
            server_addr,
            peer_addr: RwLock::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to read local address")
    }

    /// Shuttle packets until cancellation
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut buf = [0u8; RECV_BUF_SIZE];

        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("forwarder shutting down");
                    return Ok(());
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok(pair) => pair,
                        Err(e) if shutdown.is_cancelled() => {
                            debug!("read error during shutdown: {}", e);
                            return Ok(());
                        }
                        Err(e) => return Err(e).context("failed to read UDP packet"),
                    }
                }
            };

            if src == self.server_addr {
                self.forward_to_peer(&buf[..len]).await;
            } else {
                self.learn_peer_addr(src);
                self.forward_to_server(&buf[..len]).await;
            }
        }
    }

    /// Remember the first local peer that talks to us
    fn learn_peer_addr(&self, addr: SocketAddr) {
        let mut peer = self.peer_addr.write().expect("peer lock poisoned");
        if peer.is_none() {
            info!("learned local peer address {}", addr);
            *peer = Some(addr);
        }
    }

    async fn forward_to_server(&self, packet: &[u8]) {
        if let Err(e) = self.socket.send_to(packet, self.server_addr).await {
            warn!("failed to forward to server: {}", e);
        }
    }

    async fn forward_to_peer(&self, packet: &[u8]) {
        let peer = *self.peer_addr.read().expect("peer lock poisoned");
        match peer {
            Some(addr) => {
                if let Err(e) = self.socket.send_to(packet, addr).await {
                    warn!("failed to forward to peer: {}", e);
                }
            }
            None => debug!("dropping server packet, no local peer learned yet"),
        }
    }
}
