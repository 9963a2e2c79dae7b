use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use wgspan::{Forwarder, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "wgspan",
    author,
    version,
    about = "WireGuard datagram relay for peers without a direct UDP path",
    long_about = "wgspan relays unmodified WireGuard datagrams between peers that cannot\n\
        reach each other directly. The relay learns peer session indices from\n\
        observed traffic and forwards by receiver index; no keys, no decryption,\n\
        no configuration of peers.\n\n\
        Examples:\n  \
          # Run the relay server\n  \
          wgspan server --udp-addr 0.0.0.0:51820\n\n  \
          # Run a client-side forwarder toward a relay server\n  \
          wgspan client --listen 127.0.0.1:51821 --server relay.example.com:51820"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the UDP relay server
    Server {
        /// UDP bind address (overrides the config file)
        #[arg(long)]
        udp_addr: Option<String>,

        /// Path to a TOML config file
        #[arg(long, short = 'C')]
        config: Option<PathBuf>,
    },
    /// Run a client-side UDP forwarder toward a relay server
    Client {
        /// Local UDP listen address
        #[arg(long, default_value = "127.0.0.1:51821")]
        listen: String,

        /// Relay server UDP address
        #[arg(long)]
        server: String,
    },
    /// Print version information
    Version,
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
    let cli = Cli::parse();
    env_logger::init();

    match cli.command {
        Command::Server { udp_addr, config } => {
            let mut server_config = match config {
                Some(path) => ServerConfig::load(&path)?,
                None => ServerConfig::load_or_default(),
            };
            if let Some(addr) = udp_addr {
                server_config.udp_addr = addr;
            }

            let server = Server::new(&server_config).await?;
            server.run(shutdown_token()).await?;
        }
        Command::Client { listen, server } => {
            let forwarder = Forwarder::bind(&listen, &server).await?;
            forwarder.run(shutdown_token()).await?;
        }
        Command::Version => {
            println!(
                "wgspan {} - WireGuard datagram relay",
                env!("CARGO_PKG_VERSION")
            );
        }
    }

    Ok(())
}
