//! Gateway round-trip through an in-process loopback relay client.
//!
//! The loopback echoes every `send(key, bytes)` straight back as a
//! received packet from that key, standing in for a relay service with
//! a remote gateway behind it. Set `WGSPAN_DERP_URL` to run the
//! round-trip against a live relay service instead (the gateway then
//! addresses frames to its own key, so the service echoes them back).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wgspan::derp::DerpDialer;
use wgspan::{gateway, GatewayConfig, PrivateKey, PublicKey, RelayClient, RelayDial, RelayMessage};

struct LoopbackClient {
    tx: mpsc::Sender<RelayMessage>,
    rx: Mutex<mpsc::Receiver<RelayMessage>>,
    closed: CancellationToken,
}

#[async_trait]
impl RelayClient for LoopbackClient {
    async fn send(&self, remote: &PublicKey, payload: &[u8]) -> Result<()> {
        let echoed = RelayMessage::ReceivedPacket {
            source: *remote,
            data: payload.to_vec(),
        };
        if self.tx.send(echoed).await.is_err() {
            bail!("loopback closed");
        }
        Ok(())
    }

    async fn recv(&self) -> Result<RelayMessage> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => bail!("relay client is closed"),
            msg = rx.recv() => match msg {
                Some(msg) => Ok(msg),
                None => bail!("loopback closed"),
            },
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

struct LoopbackDial;

#[async_trait]
impl RelayDial for LoopbackDial {
    type Client = LoopbackClient;

    async fn dial(&self, _key: &PrivateKey, _url: &str) -> Result<LoopbackClient> {
        let (tx, rx) = mpsc::channel(64);
        Ok(LoopbackClient {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        })
    }
}

fn gateway_config(key: &PrivateKey, remote: &PublicKey, wg_endpoint: String) -> GatewayConfig {
    GatewayConfig {
        prefix: "[test-gw]".to_string(),
        relay_url: "https://relay.invalid/derp".to_string(),
        private_key: key.to_string(),
        remote_public_key: remote.to_string(),
        wg_endpoint,
        verbose: false,
    }
}

#[tokio::test]
async fn datagram_round_trips_through_the_gateway() {
    // The "WireGuard" side: a socket that should receive unwrapped frames
    let wg = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wg_addr = wg.local_addr().unwrap();

    // The gateway's own UDP listen socket
    let gw_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gw_addr = gw_socket.local_addr().unwrap();

    let key = PrivateKey::generate();
    let shutdown = CancellationToken::new();

    let run_handle = match std::env::var("WGSPAN_DERP_URL") {
        // Live service: send to our own key so the service echoes back
        Ok(url) => {
            let mut config = gateway_config(&key, &key.public(), wg_addr.to_string());
            config.relay_url = url;
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move { gateway::run(shutdown, config, gw_socket, DerpDialer).await },
            )
        }
        Err(_) => {
            let remote = PrivateKey::generate().public();
            let config = gateway_config(&key, &remote, wg_addr.to_string());
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move { gateway::run(shutdown, config, gw_socket, LoopbackDial).await },
            )
        }
    };

    // Let the gateway finish its startup before sending
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload: Vec<u8> = (0..100u8).collect();
    sender.send_to(&payload, gw_addr).await.unwrap();

    let mut buf = [0u8; 2048];
    let (len, _) = timeout(Duration::from_millis(500), wg.recv_from(&mut buf))
        .await
        .expect("payload should arrive at the WireGuard endpoint")
        .unwrap();
    assert_eq!(&buf[..len], &payload[..]);

    shutdown.cancel();
    timeout(Duration::from_secs(1), run_handle)
        .await
        .expect("gateway should wind down promptly")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn gateway_shutdown_completes_in_bounded_time() {
    let wg = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gw_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gw_addr = gw_socket.local_addr().unwrap();

    let key = PrivateKey::generate();
    let remote = PrivateKey::generate().public();
    let config = gateway_config(&key, &remote, wg.local_addr().unwrap().to_string());

    let shutdown = CancellationToken::new();
    let run_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { gateway::run(shutdown, config, gw_socket, LoopbackDial).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    timeout(Duration::from_secs(1), run_handle)
        .await
        .expect("all gateway tasks should observe cancellation")
        .unwrap()
        .unwrap();

    // The gateway's port is free again once run returns
    let rebound = UdpSocket::bind(gw_addr).await;
    assert!(rebound.is_ok(), "gateway port should be released");
}

#[tokio::test]
async fn multiple_datagrams_preserve_sizes_and_content() {
    let wg = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wg_addr = wg.local_addr().unwrap();
    let gw_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gw_addr = gw_socket.local_addr().unwrap();

    let key = PrivateKey::generate();
    let remote = PrivateKey::generate().public();
    let config = gateway_config(&key, &remote, wg_addr.to_string());

    let shutdown = CancellationToken::new();
    let run_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { gateway::run(shutdown, config, gw_socket, LoopbackDial).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sizes = [1usize, 16, 148, 1200];
    for (i, size) in sizes.iter().enumerate() {
        let payload = vec![i as u8; *size];
        sender.send_to(&payload, gw_addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_millis(500), wg.recv_from(&mut buf))
            .await
            .expect("each datagram should arrive")
            .unwrap();
        assert_eq!(&buf[..len], &payload[..]);
    }

    shutdown.cancel();
    timeout(Duration::from_secs(1), run_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
