//! wgspan: WireGuard datagram relay and keyed-frame relay gateway
//!
//! Two alternate data paths for WireGuard peers with no direct UDP
//! route, both preserving the WireGuard wire protocol end-to-end:
//!
//! - a UDP relay server that inspects packet headers (never payloads)
//!   and forwards datagrams between peers by session index
//! - a per-peer gateway sidecar that tunnels WireGuard UDP over a
//!   TLS-protected keyed-frame relay service, addressed by public key

pub mod client;
pub mod config;
pub mod derp;
pub mod endpoint;
pub mod gateway;
pub mod identity;
pub mod packet;
pub mod processor;
pub mod registry;
pub mod relay_client;
pub mod server;

// Re-export key types for easier access by consumers
pub use client::Forwarder;
pub use config::ServerConfig;
pub use derp::{DerpClient, DerpDialer};
pub use endpoint::{Endpoint, EndpointKind};
pub use gateway::GatewayConfig;
pub use identity::{PrivateKey, PublicKey};
pub use packet::{Message, MessageType, ParseError};
pub use processor::Processor;
pub use registry::Registry;
pub use relay_client::{RelayClient, RelayDial, RelayMessage};
pub use server::{Server, UdpListener};
