//! UDP relay server
//!
//! Binds one UDP socket and shuttles WireGuard datagrams between peers
//! by session index. The read loop never blocks on processing: each
//! datagram is copied out of the reused receive buffer and handed to a
//! short-lived task that runs the processor and sends the copies from
//! the same socket, so replies appear to come from the relay itself.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::endpoint::{Endpoint, EndpointKind};
use crate::processor::Processor;
use crate::registry::Registry;

/// Receive buffer size; comfortably above any WireGuard datagram on a
/// standard MTU path
const RECV_BUF_SIZE: usize = 2048;

/// UDP listener that drives the relay processor
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    processor: Arc<Processor>,
}

impl UdpListener {
    /// Bind to `addr` and attach the processor
    pub async fn bind(addr: &str, processor: Arc<Processor>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", addr))?;

        Ok(Self {
            socket: Arc::new(socket),
            processor,
        })
    }

    /// The bound local address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to read local address")
    }

    /// Read and relay datagrams until `shutdown` fires or the socket
    /// fails. A cancellation observed during a blocked read returns
    /// cleanly; any other read error is fatal to this listener.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut buf = [0u8; RECV_BUF_SIZE];

        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("relay listener shutting down");
                    return Ok(());
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok(pair) => pair,
                        Err(e) if shutdown.is_cancelled() => {
                            debug!("read error during shutdown: {}", e);
                            return Ok(());
                        }
                        Err(e) => {
                            return Err(e).context("failed to read UDP packet");
                        }
                    }
                }
            };

            // The receive buffer is reused on the next iteration; the
            // packet must own its bytes before leaving this loop.
            let packet = buf[..len].to_vec();
            let socket = Arc::clone(&self.socket);
            let processor = Arc::clone(&self.processor);

            tokio::spawn(async move {
                handle_packet(socket, processor, packet, src).await;
            });
        }
    }
}

/// Process one datagram and send it to every computed destination
async fn handle_packet(
    socket: Arc<UdpSocket>,
    processor: Arc<Processor>,
    packet: Vec<u8>,
    src: SocketAddr,
) {
    let source = Endpoint::udp(src);

    let destinations = match processor.process(&packet, &source) {
        Ok(destinations) => destinations,
        Err(e) => {
            debug!("invalid packet from {}: {}", src, e);
            return;
        }
    };

    if destinations.is_empty() {
        debug!("no destination for packet from {} (learning phase)", src);
        return;
    }

    if destinations.len() == 1 {
        debug!("forwarding {} bytes from {} to {}", packet.len(), src, destinations[0]);
    } else {
        debug!(
            "broadcasting {} bytes from {} to {} peers",
            packet.len(),
            src,
            destinations.len()
        );
    }

    for dest in &destinations {
        forward(&socket, &packet, dest).await;
    }
}

/// Send a packet copy to one destination. Failures drop this destination
/// only; the listener keeps running.
async fn forward(socket: &UdpSocket, packet: &[u8], dest: &Endpoint) {
    match dest.kind() {
        EndpointKind::Udp(addr) => {
            if let Err(e) = socket.send_to(packet, addr).await {
                warn!("failed to forward to {}: {}", dest, e);
            }
        }
        EndpointKind::Stream { .. } => {
            // Stream forwarding is pending a stream listener definition.
            debug!("dropping packet for stream endpoint {}", dest);
        }
    }
}

/// Relay server: the UDP listener plus its shared registry
pub struct Server {
    listener: UdpListener,
    registry: Arc<Registry>,
}

impl Server {
    /// Build a server from configuration
    pub async fn new(config: &ServerConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let processor = Arc::new(Processor::new(Arc::clone(&registry)));
        let listener = UdpListener::bind(&config.udp_addr, processor).await?;

        info!("relay server listening on UDP {}", listener.local_addr()?);

        Ok(Self { listener, registry })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until cancellation or an unrecoverable socket error
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let result = self.listener.run(shutdown).await;
        if let Err(ref e) = result {
            error!("relay server exited with error: {:#}", e);
        }
        result
    }
}
