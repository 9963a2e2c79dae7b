//! UDP ↔ keyed-frame relay gateway
//!
//! Sidecar that makes a relay-reachable peer look like a plain UDP
//! endpoint to an unmodified WireGuard. Datagrams read from the local
//! socket are wrapped in relay frames addressed to the remote peer's
//! public key; frames received from the relay are unwrapped and written
//! to the local WireGuard endpoint. Payloads are never inspected,
//! modified, or reordered.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::identity::{PrivateKey, PublicKey};
use crate::relay_client::{RelayClient, RelayDial, RelayMessage};

/// Read buffer for the local socket; relay frames can carry anything up
/// to a full UDP datagram
const GATEWAY_BUF_SIZE: usize = 65535;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Log line prefix, e.g. "[gateway]" or "[peer1-gw]"
    pub prefix: String,
    /// Relay service URL, e.g. "https://relay.example.com/derp"
    pub relay_url: String,
    /// This peer's relay private key ("privkey:<hex>")
    pub private_key: String,
    /// Remote peer's relay public key ("nodekey:<hex>")
    pub remote_public_key: String,
    /// Local WireGuard UDP endpoint that received frames are written to
    pub wg_endpoint: String,
    /// Per-packet logging
    pub verbose: bool,
}

impl GatewayConfig {
    fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "[gateway]"
        } else {
            &self.prefix
        }
    }
}

/// Run a gateway over an already-bound local UDP socket.
///
/// Three tasks run until `shutdown` fires: a watcher that closes the
/// relay client on cancellation, the UDP→relay pump, and the relay→UDP
/// pump. Task errors are logged, not propagated; both transports are
/// best-effort. Returns once every task has wound down.
pub async fn run<D: RelayDial>(
    shutdown: CancellationToken,
    config: GatewayConfig,
    udp: UdpSocket,
    dialer: D,
) -> Result<()> {
    let prefix = config.prefix().to_string();

    info!("{} starting gateway (UDP ↔ relay)", prefix);

    let key: PrivateKey = config
        .private_key
        .parse()
        .with_context(|| format!("{} failed to parse private key", prefix))?;
    let remote_key: PublicKey = config
        .remote_public_key
        .parse()
        .with_context(|| format!("{} failed to parse remote public key", prefix))?;

    if config.verbose {
        info!("{} sending to remote relay key {}", prefix, remote_key.short());
    }

    let wg_addr: SocketAddr = resolve_endpoint(&config.wg_endpoint)
        .await
        .with_context(|| format!("{} invalid WireGuard endpoint", prefix))?;

    let client = Arc::new(
        dialer
            .dial(&key, &config.relay_url)
            .await
            .with_context(|| format!("{} failed to connect to relay service", prefix))?,
    );
    let udp = Arc::new(udp);

    info!("{} gateway ready (UDP ↔ relay)", prefix);

    // Shutdown watcher: closing the client is what unblocks a recv that
    // is already waiting on the wire.
    let watcher = {
        let shutdown = shutdown.clone();
        let client = Arc::clone(&client);
        let prefix = prefix.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            info!("{} gateway shutting down", prefix);
            client.close().await;
        })
    };

    // UDP → relay: wrap every local datagram and send it to the remote key
    let udp_to_relay = {
        let shutdown = shutdown.clone();
        let udp = Arc::clone(&udp);
        let client = Arc::clone(&client);
        let prefix = prefix.clone();
        let verbose = config.verbose;
        tokio::spawn(async move {
            let mut buf = vec![0u8; GATEWAY_BUF_SIZE];
            loop {
                let len = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = udp.recv_from(&mut buf) => match result {
                        Ok((len, _src)) => len,
                        Err(e) => {
                            if !shutdown.is_cancelled() {
                                error!("{} UDP read error: {}", prefix, e);
                            }
                            break;
                        }
                    },
                };

                if verbose {
                    debug!("{} → {} bytes from UDP, sending to relay", prefix, len);
                }

                if let Err(e) = client.send(&remote_key, &buf[..len]).await {
                    warn!("{} relay send error: {}", prefix, e);
                } else if verbose {
                    debug!("{} ✓ sent {} bytes to remote peer", prefix, len);
                }
            }
        })
    };

    // Relay → UDP: unwrap received frames and deliver them to WireGuard
    let relay_to_udp = {
        let shutdown = shutdown.clone();
        let udp = Arc::clone(&udp);
        let client = Arc::clone(&client);
        let prefix = prefix.clone();
        let verbose = config.verbose;
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = client.recv() => result,
                };

                match msg {
                    Ok(RelayMessage::ReceivedPacket { source, data }) => {
                        if verbose {
                            debug!(
                                "{} ← {} bytes from relay peer {}",
                                prefix,
                                data.len(),
                                source.short()
                            );
                        }
                        if let Err(e) = udp.send_to(&data, wg_addr).await {
                            warn!("{} UDP write error: {}", prefix, e);
                        } else if verbose {
                            debug!("{} ✓ wrote {} bytes to {}", prefix, data.len(), wg_addr);
                        }
                    }
                    // Service chatter: observed and discarded
                    Ok(other) => {
                        debug!("{} relay message: {:?}", prefix, message_kind(&other));
                    }
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        warn!("{} relay recv error: {}", prefix, e);
                    }
                }
            }
        })
    };

    shutdown.cancelled().await;

    for task in [watcher, udp_to_relay, relay_to_udp] {
        let _ = task.await;
    }

    info!("{} gateway stopped", prefix);
    Ok(())
}

/// Resolve a host:port string to its first socket address
async fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(endpoint)
        .await
        .with_context(|| format!("failed to resolve {}", endpoint))?
        .next()
        .with_context(|| format!("no addresses for {}", endpoint))
}

fn message_kind(msg: &RelayMessage) -> &'static str {
    match msg {
        RelayMessage::ReceivedPacket { .. } => "received-packet",
        RelayMessage::KeepAlive => "keep-alive",
        RelayMessage::ServerInfo => "server-info",
        RelayMessage::PeerGone(_) => "peer-gone",
        RelayMessage::Ping(_) => "ping",
        RelayMessage::Pong(_) => "pong",
        RelayMessage::Health => "health",
    }
}
