use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use wgspan::derp::DerpDialer;
use wgspan::{gateway, identity, GatewayConfig};

#[derive(Parser, Debug)]
#[command(
    name = "wgspan-gateway",
    author,
    version,
    about = "UDP ↔ keyed-frame relay gateway sidecar for WireGuard",
    long_about = "Runs next to an unmodified WireGuard peer, exposing a local UDP\n\
        endpoint and tunneling its traffic over a TLS relay service addressed\n\
        by public key. Point the WireGuard peer endpoint at this gateway's\n\
        listen address and exchange relay public keys out of band.\n\n\
        Example:\n  \
          wgspan-gateway --key-file peer.key \\\n      \
              --remote-peer nodekey:aabb... \\\n      \
              --wg-endpoint 127.0.0.1:51820 --listen 127.0.0.1:51821"
)]
struct Args {
    /// Relay service URL
    #[arg(long, default_value = "https://derp.tailscale.com/derp")]
    relay_url: String,

    /// Path to the private key file (generated if missing)
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Remote peer's relay public key (nodekey:...)
    #[arg(long)]
    remote_peer: Option<String>,

    /// Local WireGuard endpoint that received frames are written to
    #[arg(long, default_value = "127.0.0.1:51820")]
    wg_endpoint: String,

    /// UDP listen address WireGuard sends to
    #[arg(long, default_value = "0.0.0.0:51821")]
    listen: String,

    /// Per-packet logging
    #[arg(long, short)]
    verbose: bool,

    /// Print the derived relay public key and exit
    #[arg(long)]
    show_pubkey: bool,
}

/// Cancellation source tied to SIGINT/SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();

    let signal_token = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::init();

    let key = identity::load_or_generate(args.key_file.as_deref())?;

    if args.show_pubkey {
        println!("{}", key.public());
        return Ok(());
    }

    let Some(remote_peer) = args.remote_peer else {
        bail!("--remote-peer is required");
    };

    if args.verbose {
        info!("our public key: {}", key.public());
        info!("remote peer key: {}", remote_peer);
    }

    let udp = UdpSocket::bind(&args.listen).await?;
    info!("UDP listener started on {}", udp.local_addr()?);

    let config = GatewayConfig {
        prefix: String::new(),
        relay_url: args.relay_url,
        private_key: key.to_string(),
        remote_public_key: remote_peer,
        wg_endpoint: args.wg_endpoint,
        verbose: args.verbose,
    };

    gateway::run(shutdown_token(), config, udp, DerpDialer).await
}
